//! Configuration object graph (spec.md §6) — a `serde`-deserialized
//! JSON chassis/sequencer/rail tree plus a small set of runtime timing
//! knobs, matching the teacher's `config.rs` naming
//! (`AppConfig`/`load_app_config`/`load_app_config_from_str`) and its
//! "deserialize, then explicit `validate()` pass" shape.
//!
//! This module only owns the object graph and its validation; turning a
//! validated `RawAppConfig` into live `Chassis`/`System` values (opening
//! GPIO/I2C handles through a `Services` facade) is the caller's job —
//! this crate's config types carry no transport handles of their own.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::rail::Rail;
use crate::sequencer::PowerSequencerDevice;

/// Default pgood timeout (spec.md §6) applied when a chassis config
/// omits `pgood_timeout_ms`.
pub const PGOOD_TIMEOUT_MS_DEFAULT: u64 = 10_000;
/// Default fault-log delay (spec.md §6) applied when a chassis config
/// omits `fault_log_delay_ms`.
pub const FAULT_LOG_DELAY_MS_DEFAULT: u64 = 7_000;

/// Which `PowerSequencerDevice` constructor a sequencer config maps to
/// (spec.md §4.3's `GpiosOnly | Basic | PmbusUcd` variants). Not part of
/// the JSON schema fragment spec.md quotes verbatim, but a device has
/// to pick one of the three, so the schema is extended with this
/// optional discriminator, defaulting to `basic` (read-only PMBus
/// rails, no UCD90xxx GPIO-snapshot cache).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RawSequencerKind {
    GpiosOnly,
    #[default]
    Basic,
    PmbusUcd,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawGpioConfig {
    pub line: u32,
    #[serde(default)]
    pub active_low: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRailConfig {
    pub name: String,
    pub page: Option<u8>,
    pub presence: Option<String>,
    #[serde(default)]
    pub check_status_vout: bool,
    #[serde(default)]
    pub compare_voltage_to_limit: bool,
    pub gpio: Option<RawGpioConfig>,
    #[serde(default)]
    pub is_power_supply_rail: bool,
}

impl RawRailConfig {
    fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::configuration("rail name must not be empty"));
        }
        if let Some(page) = self.page {
            if page > 31 {
                return Err(CoreError::configuration(format!(
                    "rail '{}': page {page} out of range 0..=31",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn into_rail(self) -> CoreResult<Rail> {
        let mut builder = Rail::builder(self.name)
            .check_status_vout(self.check_status_vout)
            .compare_voltage_to_limit(self.compare_voltage_to_limit)
            .power_supply_rail(self.is_power_supply_rail);
        if let Some(page) = self.page {
            builder = builder.page(page);
        }
        if let Some(path) = self.presence {
            builder = builder.presence_path(path);
        }
        if let Some(gpio) = self.gpio {
            builder = builder.pgood_gpio(gpio.line, gpio.active_low);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSequencerConfig {
    pub name: String,
    pub bus: String,
    pub address: u16,
    pub power_control_gpio: String,
    pub power_good_gpio: String,
    #[serde(default)]
    pub kind: RawSequencerKind,
    #[serde(default)]
    pub rails: Vec<RawRailConfig>,
}

impl RawSequencerConfig {
    fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::configuration("sequencer name must not be empty"));
        }
        let mut seen = HashSet::new();
        for rail in &self.rails {
            rail.validate()?;
            if !seen.insert(rail.name.clone()) {
                return Err(CoreError::configuration(format!(
                    "sequencer '{}': duplicate rail id '{}'",
                    self.name, rail.name
                )));
            }
        }
        Ok(())
    }

    fn into_device(self) -> CoreResult<PowerSequencerDevice> {
        let rails = self
            .rails
            .into_iter()
            .map(RawRailConfig::into_rail)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(match self.kind {
            RawSequencerKind::GpiosOnly => PowerSequencerDevice::gpios_only(
                self.name,
                self.bus,
                self.address,
                self.power_control_gpio,
                self.power_good_gpio,
                rails,
            ),
            RawSequencerKind::Basic => PowerSequencerDevice::basic(
                self.name,
                self.bus,
                self.address,
                self.power_control_gpio,
                self.power_good_gpio,
                rails,
            ),
            RawSequencerKind::PmbusUcd => PowerSequencerDevice::pmbus_ucd(
                self.name,
                self.bus,
                self.address,
                self.power_control_gpio,
                self.power_good_gpio,
                rails,
            ),
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawChassisConfig {
    pub number: u32,
    pub inventory_path: String,
    #[serde(default)]
    pub sequencers: Vec<RawSequencerConfig>,
    /// Overrides `PGOOD_TIMEOUT_MS_DEFAULT` (spec.md §6) for this
    /// chassis.
    pub pgood_timeout_ms: Option<u64>,
    /// Overrides `FAULT_LOG_DELAY_MS_DEFAULT` (spec.md §6) for this
    /// chassis.
    pub fault_log_delay_ms: Option<u64>,
}

impl RawChassisConfig {
    fn validate(&self) -> CoreResult<()> {
        if self.number < 1 {
            return Err(CoreError::configuration(
                "chassis number must be >= 1 (0 denotes the whole system)",
            ));
        }
        let mut seen = HashSet::new();
        for seq in &self.sequencers {
            seq.validate()?;
            if !seen.insert(seq.name.clone()) {
                return Err(CoreError::configuration(format!(
                    "chassis {}: duplicate sequencer name '{}'",
                    self.number, seq.name
                )));
            }
        }
        Ok(())
    }

    /// Builds a `Chassis` from this config. Leaves monitoring
    /// uninitialized and does not open any sequencer — those are the
    /// caller's concern (spec.md §4.5, §4.6) once a `Services` handle is
    /// available.
    pub fn into_chassis(self) -> CoreResult<crate::chassis::Chassis> {
        let pgood_timeout = std::time::Duration::from_millis(
            self.pgood_timeout_ms.unwrap_or(PGOOD_TIMEOUT_MS_DEFAULT),
        );
        let fault_log_delay = std::time::Duration::from_millis(
            self.fault_log_delay_ms.unwrap_or(FAULT_LOG_DELAY_MS_DEFAULT),
        );
        let devices = self
            .sequencers
            .into_iter()
            .map(RawSequencerConfig::into_device)
            .collect::<CoreResult<Vec<_>>>()?;
        let mut chassis = crate::chassis::Chassis::new(self.number, self.inventory_path, devices)?;
        chassis.set_power_good_timeout(pgood_timeout);
        chassis.set_power_good_fault_log_delay(fault_log_delay);
        Ok(chassis)
    }
}

/// Top-level configuration document (spec.md §6, plus the ambient
/// runtime-knob wrapper SPEC_FULL.md §6 adds).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawAppConfig {
    pub chassis: Vec<RawChassisConfig>,
}

impl RawAppConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.chassis.is_empty() {
            return Err(CoreError::configuration("config must list at least one chassis"));
        }
        let mut seen = HashSet::new();
        for chassis in &self.chassis {
            chassis.validate()?;
            if !seen.insert(chassis.number) {
                return Err(CoreError::configuration(format!(
                    "duplicate chassis number {}",
                    chassis.number
                )));
            }
        }
        Ok(())
    }

    /// Validates, then builds one `Chassis` per entry, in config order.
    pub fn into_chassis_list(self) -> CoreResult<Vec<crate::chassis::Chassis>> {
        self.validate()?;
        self.chassis
            .into_iter()
            .map(RawChassisConfig::into_chassis)
            .collect()
    }
}

/// Parses and validates an `AppConfig` from a JSON string (teacher's
/// `load_app_config_from_str` naming and signature from `config.rs`).
pub fn load_app_config_from_str(config_str: &str) -> CoreResult<RawAppConfig> {
    let config: RawAppConfig = serde_json::from_str(config_str)
        .map_err(|e| CoreError::configuration(format!("failed to parse config: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Reads and parses the config file at `path` (teacher's
/// `load_app_config` naming from `config.rs`, generalized to take an
/// explicit path since this crate has no fixed `utils::filesystem`
/// convention of its own).
pub fn load_app_config(path: &str) -> CoreResult<RawAppConfig> {
    let config_str = std::fs::read_to_string(path)
        .map_err(|e| CoreError::configuration(format!("failed to read config file '{path}': {e}")))?;
    let config = load_app_config_from_str(&config_str)?;
    debug!(
        "parsed app config: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> &'static str {
        r#"
        {
            "chassis": [
                {
                    "number": 1,
                    "inventory_path": "/system/chassis0",
                    "pgood_timeout_ms": 5000,
                    "sequencers": [
                        {
                            "name": "pseq0",
                            "bus": "i2c-1",
                            "address": 64,
                            "power_control_gpio": "pseq0-control",
                            "power_good_gpio": "pseq0-pgood",
                            "kind": "basic",
                            "rails": [
                                { "name": "vdd", "page": 0, "check_status_vout": true }
                            ]
                        }
                    ]
                }
            ]
        }
        "#
    }

    #[test]
    fn round_trips_a_well_formed_config() {
        let config = load_app_config_from_str(sample_config()).unwrap();
        assert_eq!(config.chassis.len(), 1);
        assert_eq!(config.chassis[0].sequencers[0].rails[0].name, "vdd");
    }

    #[test]
    fn builds_chassis_from_validated_config() {
        let config = load_app_config_from_str(sample_config()).unwrap();
        let mut chassis_list = config.into_chassis_list().unwrap();
        assert_eq!(chassis_list.len(), 1);
        let chassis = chassis_list.remove(0);
        assert_eq!(chassis.number(), 1);
        assert_eq!(chassis.inventory_path(), "/system/chassis0");
    }

    #[test]
    fn rejects_chassis_number_zero() {
        let config = RawAppConfig {
            chassis: vec![RawChassisConfig {
                number: 0,
                inventory_path: "/system/chassis0".to_string(),
                sequencers: vec![],
                pgood_timeout_ms: None,
                fault_log_delay_ms: None,
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_rail_ids() {
        let json = r#"
        {
            "chassis": [
                {
                    "number": 1,
                    "inventory_path": "/system/chassis0",
                    "sequencers": [
                        {
                            "name": "pseq0",
                            "bus": "i2c-1",
                            "address": 64,
                            "power_control_gpio": "pseq0-control",
                            "power_good_gpio": "pseq0-pgood",
                            "rails": [
                                { "name": "vdd", "page": 0, "check_status_vout": true },
                                { "name": "vdd", "page": 1, "check_status_vout": true }
                            ]
                        }
                    ]
                }
            ]
        }
        "#;
        let err = load_app_config_from_str(json).unwrap_err();
        assert!(err.to_string().contains("duplicate rail id"));
    }

    #[test]
    fn rejects_rail_page_out_of_range() {
        let json = r#"
        {
            "chassis": [
                {
                    "number": 1,
                    "inventory_path": "/system/chassis0",
                    "sequencers": [
                        {
                            "name": "pseq0",
                            "bus": "i2c-1",
                            "address": 64,
                            "power_control_gpio": "pseq0-control",
                            "power_good_gpio": "pseq0-pgood",
                            "rails": [
                                { "name": "vdd", "page": 32, "check_status_vout": true }
                            ]
                        }
                    ]
                }
            ]
        }
        "#;
        let err = load_app_config_from_str(json).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn rejects_duplicate_chassis_numbers() {
        let json = r#"
        {
            "chassis": [
                { "number": 1, "inventory_path": "/system/chassis0", "sequencers": [] },
                { "number": 1, "inventory_path": "/system/chassis1", "sequencers": [] }
            ]
        }
        "#;
        let err = load_app_config_from_str(json).unwrap_err();
        assert!(err.to_string().contains("duplicate chassis number"));
    }

    #[test]
    fn timing_overrides_default_when_omitted() {
        let json = r#"
        {
            "chassis": [
                { "number": 1, "inventory_path": "/system/chassis0", "sequencers": [] }
            ]
        }
        "#;
        let config = load_app_config_from_str(json).unwrap();
        assert_eq!(config.chassis[0].pgood_timeout_ms, None);
    }
}
