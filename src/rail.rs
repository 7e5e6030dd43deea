//! Per-rail pgood-check policy (spec.md §3, §4.1).
//!
//! A `Rail` is immutable after construction. It describes *how* to
//! decide whether one regulated voltage is in spec: by a GPIO bit, by
//! the PMBus STATUS_VOUT command, by comparing READ_VOUT against
//! VOUT_UV_FAULT_LIMIT, or any combination. `has_pgood_fault` evaluates
//! the configured checks in a fixed order and is the leaf of the
//! fault-isolation walk that `PowerSequencerDevice::find_pgood_fault`
//! performs.

use crate::error::CoreResult;
use crate::i2c;
use crate::sequencer::PowerSequencerDevice;
use crate::services::{AdditionalData, Services};

/// Configuration for a rail's pgood GPIO check: the bit at
/// `line_offset` in the sequencer's GPIO snapshot must equal
/// `active_low ? 0 : 1` for the rail to be considered good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgoodGpioCheck {
    pub line_offset: u32,
    pub active_low: bool,
}

/// A single regulated voltage monitored by a `PowerSequencerDevice`.
/// See spec.md §3 for the field-by-field contract.
#[derive(Debug, Clone)]
pub struct Rail {
    id: String,
    presence_path: Option<String>,
    page: Option<u8>,
    is_power_supply_rail: bool,
    check_status_vout: bool,
    compare_voltage_to_limit: bool,
    pgood_gpio: Option<PgoodGpioCheck>,
}

pub struct RailBuilder {
    id: String,
    presence_path: Option<String>,
    page: Option<u8>,
    is_power_supply_rail: bool,
    check_status_vout: bool,
    compare_voltage_to_limit: bool,
    pgood_gpio: Option<PgoodGpioCheck>,
}

impl Rail {
    pub fn builder(id: impl Into<String>) -> RailBuilder {
        RailBuilder {
            id: id.into(),
            presence_path: None,
            page: None,
            is_power_supply_rail: false,
            check_status_vout: false,
            compare_voltage_to_limit: false,
            pgood_gpio: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn page(&self) -> Option<u8> {
        self.page
    }

    pub fn is_power_supply_rail(&self) -> bool {
        self.is_power_supply_rail
    }

    /// True when no presence path is configured (the rail is treated as
    /// always present), or the presence service confirms it.
    pub async fn is_present(&self, services: &dyn Services) -> CoreResult<bool> {
        match &self.presence_path {
            None => Ok(true),
            Some(path) => services.presence(path).await,
        }
    }

    /// Evaluates the configured checks in order: GPIO, STATUS_VOUT,
    /// then voltage-vs-UV-limit. The first violated check wins: it
    /// populates `additional_data` with `RAIL_NAME` plus its specific
    /// captured field(s) and this returns `Ok(true)`. If the rail isn't
    /// present, no check runs and this returns `Ok(false)`. Device read
    /// failures propagate (the caller — `find_pgood_fault` — logs and
    /// moves on to the next rail, per spec.md §4.6 isolation algorithm).
    pub async fn has_pgood_fault(
        &self,
        device: &mut PowerSequencerDevice,
        services: &dyn Services,
        additional_data: &mut AdditionalData,
    ) -> CoreResult<bool> {
        if !self.is_present(services).await? {
            return Ok(false);
        }

        if let Some(check) = self.pgood_gpio {
            let values = device.get_gpio_values()?;
            let bit = values.get(check.line_offset as usize).copied().ok_or_else(|| {
                crate::error::CoreError::internal(format!(
                    "gpio snapshot too short for line offset {}",
                    check.line_offset
                ))
            })?;
            let expected_good = if check.active_low { 0 } else { 1 };
            if bit != expected_good {
                additional_data.insert("RAIL_NAME".to_string(), self.id.clone());
                additional_data.insert("GPIO_VALUES".to_string(), format_gpio_values(&values));
                return Ok(true);
            }
        }

        if self.check_status_vout {
            let page = self.require_page()?;
            let status_vout = device.get_status_vout(page)?;
            if status_vout != 0 {
                additional_data.insert("RAIL_NAME".to_string(), self.id.clone());
                additional_data.insert("STATUS_VOUT".to_string(), format!("{status_vout:#04x}"));
                if let Ok(status_word) = device.get_status_word(page) {
                    additional_data
                        .insert("STATUS_WORD".to_string(), format!("{status_word:#06x}"));
                }
                if let Ok(mfr_status) = device.get_mfr_status(page) {
                    additional_data
                        .insert("MFR_STATUS".to_string(), format!("{mfr_status:#06x}"));
                }
                return Ok(true);
            }
        }

        if self.compare_voltage_to_limit {
            let page = self.require_page()?;
            let read_vout = device.get_read_vout(page)?;
            let uv_limit = device.get_vout_uv_fault_limit(page)?;
            if read_vout < uv_limit {
                additional_data.insert("RAIL_NAME".to_string(), self.id.clone());
                additional_data.insert("READ_VOUT".to_string(), format!("{read_vout:.3}"));
                additional_data
                    .insert("VOUT_UV_FAULT_LIMIT".to_string(), format!("{uv_limit:.3}"));
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn require_page(&self) -> CoreResult<u8> {
        self.page.ok_or_else(|| {
            crate::error::CoreError::internal(format!(
                "rail '{}' has a PMBus check configured without a page",
                self.id
            ))
        })
    }
}

pub fn format_gpio_values(values: &[u8]) -> String {
    let joined = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{joined}]")
}

impl RailBuilder {
    pub fn presence_path(mut self, path: impl Into<String>) -> Self {
        self.presence_path = Some(path.into());
        self
    }

    pub fn page(mut self, page: u8) -> Self {
        self.page = Some(page);
        self
    }

    pub fn power_supply_rail(mut self, yes: bool) -> Self {
        self.is_power_supply_rail = yes;
        self
    }

    pub fn check_status_vout(mut self, yes: bool) -> Self {
        self.check_status_vout = yes;
        self
    }

    pub fn compare_voltage_to_limit(mut self, yes: bool) -> Self {
        self.compare_voltage_to_limit = yes;
        self
    }

    pub fn pgood_gpio(mut self, line_offset: u32, active_low: bool) -> Self {
        self.pgood_gpio = Some(PgoodGpioCheck {
            line_offset,
            active_low,
        });
        self
    }

    /// Validates the spec.md §3 invariant (at least one check is
    /// meaningful) and builds the rail.
    pub fn build(self) -> CoreResult<Rail> {
        if self.id.is_empty() {
            return Err(crate::error::CoreError::configuration(
                "rail id must not be empty",
            ));
        }
        if self.pgood_gpio.is_none() && !self.check_status_vout && !self.compare_voltage_to_limit
        {
            return Err(crate::error::CoreError::configuration(format!(
                "rail '{}' has no pgood check configured (gpio, status_vout, or uv-limit)",
                self.id
            )));
        }
        if (self.check_status_vout || self.compare_voltage_to_limit) && self.page.is_none() {
            return Err(crate::error::CoreError::configuration(format!(
                "rail '{}' requires a PMBus page for its configured check",
                self.id
            )));
        }
        Ok(Rail {
            id: self.id,
            presence_path: self.presence_path,
            page: self.page,
            is_power_supply_rail: self.is_power_supply_rail,
            check_status_vout: self.check_status_vout,
            compare_voltage_to_limit: self.compare_voltage_to_limit,
            pgood_gpio: self.pgood_gpio,
        })
    }
}

// helper so tests below can read PMBus constants without pulling in the
// whole sequencer module.
pub use i2c::pmbus;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::tests_support::basic_device_with_rail;
    use crate::services::mock::MockServices;

    #[test]
    fn build_rejects_rail_with_no_checks() {
        let err = Rail::builder("vdd").build().unwrap_err();
        assert!(err.to_string().contains("no pgood check"));
    }

    #[test]
    fn build_rejects_pmbus_check_without_page() {
        let err = Rail::builder("vdd").check_status_vout(true).build().unwrap_err();
        assert!(err.to_string().contains("PMBus page"));
    }

    #[tokio::test]
    async fn absent_rail_never_faults() {
        let services = MockServices::new();
        services.set_presence("/system/vdd", false);
        let rail = Rail::builder("vdd")
            .presence_path("/system/vdd")
            .check_status_vout(true)
            .page(0)
            .build()
            .unwrap();
        let mut device = basic_device_with_rail(rail.clone());
        let mut data = AdditionalData::new();
        assert!(!rail
            .has_pgood_fault(&mut device, &services, &mut data)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn status_vout_nonzero_faults_and_captures_fields() {
        let services = MockServices::new();
        let rail = Rail::builder("vdd").check_status_vout(true).page(0).build().unwrap();
        let mut device = basic_device_with_rail(rail.clone());
        device.i2c_mut().registers.insert(pmbus::STATUS_VOUT, 0x80);
        let mut data = AdditionalData::new();
        assert!(rail
            .has_pgood_fault(&mut device, &services, &mut data)
            .await
            .unwrap());
        assert_eq!(data.get("RAIL_NAME").unwrap(), "vdd");
        assert_eq!(data.get("STATUS_VOUT").unwrap(), "0x80");
    }

    #[tokio::test]
    async fn uv_limit_violation_faults_and_captures_fields() {
        let services = MockServices::new();
        let rail = Rail::builder("vdd")
            .compare_voltage_to_limit(true)
            .page(0)
            .build()
            .unwrap();
        let mut device = basic_device_with_rail(rail.clone());
        device
            .i2c_mut()
            .registers
            .insert(pmbus::READ_VOUT, i2c::millivolts_to_register(900));
        device
            .i2c_mut()
            .registers
            .insert(pmbus::VOUT_UV_FAULT_LIMIT, i2c::millivolts_to_register(1000));
        let mut data = AdditionalData::new();
        assert!(rail
            .has_pgood_fault(&mut device, &services, &mut data)
            .await
            .unwrap());
        assert_eq!(data.get("READ_VOUT").unwrap(), "0.900");
        assert_eq!(data.get("VOUT_UV_FAULT_LIMIT").unwrap(), "1.000");
    }

    #[tokio::test]
    async fn healthy_rail_reports_no_fault() {
        let services = MockServices::new();
        let rail = Rail::builder("vdd").check_status_vout(true).page(0).build().unwrap();
        let mut device = basic_device_with_rail(rail.clone());
        let mut data = AdditionalData::new();
        assert!(!rail
            .has_pgood_fault(&mut device, &services, &mut data)
            .await
            .unwrap());
        assert!(data.is_empty());
    }
}
