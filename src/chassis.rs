//! Chassis pgood state machine (spec.md §3, §4.6) — the densest piece
//! of this crate. Owns a chassis's sequencers and status monitor, drives
//! the power-on/off transition, and on a sustained pgood fault invokes
//! the isolation walk (`PowerSequencerDevice::find_pgood_fault`) to
//! blame a specific rail before handing a structured error to
//! `Services::error_log`.
//!
//! Resolved ambiguity (see DESIGN.md): spec.md §4.6 states the
//! in-transition flag is "true iff desired and observed are both
//! defined and unequal," yet also describes a `desired==on &&
//! observed==off` fault-accumulation branch that only makes sense once
//! the *original* transition has already completed once (scenario 3:
//! pgood asserts, then later drops — isolation must fire without
//! waiting out a stale `pgood_timeout` measured from the original
//! `set_power_state` call). This implementation tracks that with
//! `transition_started_at`: it holds the deadline anchor only while a
//! transition has never yet converged; the public `is_in_transition()`
//! accessor still matches the literal spec formula (desired ≠ observed,
//! both defined) for external invariant checks.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::chassis_status_monitor::{ChassisStatusMonitor, ChassisStatusMonitorOptions};
use crate::error::{CoreError, CoreResult};
use crate::sequencer::{PgoodFaultResult, PowerSequencerDevice};
use crate::services::{AdditionalData, ErrorLogIdentifier, Services, Severity};

/// Default pgood timeout (spec.md §6): `PGOOD_TIMEOUT` seconds at build
/// time.
pub const DEFAULT_PGOOD_TIMEOUT: Duration = Duration::from_secs(10);

/// Default fault-log delay (spec.md §6): 7 seconds.
pub const DEFAULT_FAULT_LOG_DELAY: Duration = Duration::from_secs(7);

/// Desired/observed chassis power state (spec.md §3). `PowerGood` is
/// represented separately as `Option<bool>` since it (unlike
/// `PowerState`) is sampled, not commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    fn as_good(self) -> bool {
        matches!(self, PowerState::On)
    }
}

/// A pending or logged pgood fault (spec.md §3). `counts_as_fault`
/// distinguishes a power-off timeout (spec.md §4.6: "not considered a
/// power-good fault") from every other fault kind, which all count.
#[derive(Debug, Clone)]
pub struct PgoodFault {
    pub was_timeout: bool,
    pub counts_as_fault: bool,
    pub was_logged: bool,
    pub first_seen_at: Instant,
}

/// Owns a chassis's sequencers and status monitor and runs the pgood
/// state machine (spec.md §4.6).
pub struct Chassis {
    number: u32,
    inventory_path: String,
    sequencers: Vec<PowerSequencerDevice>,
    monitor: Option<ChassisStatusMonitor>,
    desired_power_state: Option<PowerState>,
    observed_power_good: Option<bool>,
    transition_started_at: Option<Instant>,
    pgood_timeout: Duration,
    fault_log_delay: Duration,
    power_supply_error: String,
    fault: Option<PgoodFault>,
    /// De-glitches repeated identical transport errors (spec.md §7:
    /// "logged once per kind"), keyed by sequencer name.
    transport_errors_logged: HashMap<String, HashSet<String>>,
}

impl Chassis {
    pub fn new(
        number: u32,
        inventory_path: impl Into<String>,
        sequencers: Vec<PowerSequencerDevice>,
    ) -> CoreResult<Self> {
        if number < 1 {
            return Err(CoreError::configuration(
                "chassis number must be >= 1 (0 denotes the whole system)",
            ));
        }
        Ok(Chassis {
            number,
            inventory_path: inventory_path.into(),
            sequencers,
            monitor: None,
            desired_power_state: None,
            observed_power_good: None,
            transition_started_at: None,
            pgood_timeout: DEFAULT_PGOOD_TIMEOUT,
            fault_log_delay: DEFAULT_FAULT_LOG_DELAY,
            power_supply_error: String::new(),
            fault: None,
            transport_errors_logged: HashMap::new(),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn inventory_path(&self) -> &str {
        &self.inventory_path
    }

    pub fn power_state(&self) -> Option<PowerState> {
        self.desired_power_state
    }

    pub fn power_good(&self) -> Option<bool> {
        self.observed_power_good
    }

    pub fn monitor(&self) -> Option<&ChassisStatusMonitor> {
        self.monitor.as_ref()
    }

    pub fn monitor_mut(&mut self) -> Option<&mut ChassisStatusMonitor> {
        self.monitor.as_mut()
    }

    pub fn set_power_good_timeout(&mut self, timeout: Duration) {
        self.pgood_timeout = timeout;
    }

    pub fn set_power_good_fault_log_delay(&mut self, delay: Duration) {
        self.fault_log_delay = delay;
    }

    pub fn power_supply_error(&self) -> &str {
        &self.power_supply_error
    }

    /// Set by the (out-of-scope, bus-driven) power-supply status
    /// monitor when a PSU reports its own fault identifier (spec.md
    /// §3, §4.3) — joined into the isolation payload ahead of a generic
    /// `PowerSequencerVoltageFault` when the winning rail is a
    /// power-supply rail.
    pub fn set_power_supply_error(&mut self, identifier: impl Into<String>) {
        self.power_supply_error = identifier.into();
    }

    /// Constructs the status monitor. Idempotent: replaces any prior
    /// monitor (spec.md §4.6).
    pub fn initialize_monitoring(&mut self, options: ChassisStatusMonitorOptions) {
        self.monitor = Some(ChassisStatusMonitor::new(options));
    }

    /// True iff desired and observed power-good are both defined and
    /// unequal (spec.md §3 invariant).
    pub fn is_in_transition(&self) -> bool {
        match (self.desired_power_state, self.observed_power_good) {
            (Some(d), Some(o)) => d.as_good() != o,
            _ => false,
        }
    }

    pub fn has_power_good_fault(&self) -> bool {
        self.fault.as_ref().is_some_and(|f| f.counts_as_fault)
    }

    pub fn get_power_good_fault(&self) -> Option<&PgoodFault> {
        self.fault.as_ref()
    }

    fn monitor_ref(&self) -> CoreResult<&ChassisStatusMonitor> {
        self.monitor
            .as_ref()
            .ok_or_else(|| CoreError::internal("chassis monitoring has not been initialized"))
    }

    /// Decision table from spec.md §4.6. Returns `(true, "")` when the
    /// transition may proceed, or `(false, reason)` for the first
    /// violated check.
    pub fn can_set_power_state(&self, new: PowerState) -> (bool, String) {
        let monitor = match &self.monitor {
            Some(m) => m,
            None => return (false, "chassis monitoring has not been initialized".to_string()),
        };

        if self.observed_power_good == Some(new.as_good()) {
            return (false, "Chassis is already at requested state".to_string());
        }

        match monitor.is_present() {
            Ok(true) => {}
            Ok(false) => return (false, "Chassis is not present".to_string()),
            Err(e) => return (false, format!("Error determining chassis status: {e}")),
        }

        if matches!(new, PowerState::On) {
            match monitor.is_enabled() {
                Ok(true) => {}
                Ok(false) => return (false, "Chassis is not enabled".to_string()),
                Err(e) => return (false, format!("Error determining chassis status: {e}")),
            }
            match monitor.is_input_power_good() {
                Ok(true) => {}
                Ok(false) => return (false, "Chassis does not have input power".to_string()),
                Err(e) => return (false, format!("Error determining chassis status: {e}")),
            }
        }

        match monitor.is_available() {
            Ok(true) => {}
            Ok(false) => return (false, "Chassis is not available".to_string()),
            Err(e) => return (false, format!("Error determining chassis status: {e}")),
        }

        (true, String::new())
    }

    /// Status-good check used by `System::set_initial_selected_chassis_if_needed`
    /// — the same checks as `can_set_power_state` minus the
    /// "already at requested state" short-circuit, since that check is
    /// about the *transition*, not the chassis's general eligibility to
    /// be selected (spec.md §4.7).
    pub fn status_is_good(&self, new: PowerState) -> CoreResult<bool> {
        let monitor = self.monitor_ref()?;
        if !monitor.is_present()? {
            return Ok(false);
        }
        if matches!(new, PowerState::On) {
            if !monitor.is_enabled()? {
                return Ok(false);
            }
            if !monitor.is_input_power_good()? {
                return Ok(false);
            }
        }
        if !monitor.is_available()? {
            return Ok(false);
        }
        Ok(true)
    }

    /// Commands every sequencer to the new state. A failure on one
    /// sequencer does not stop the others — all are attempted, and the
    /// *last* error is re-raised afterward (spec.md §4.6, §7).
    pub async fn set_power_state(&mut self, new: PowerState, services: &dyn Services) -> CoreResult<()> {
        let (ok, reason) = self.can_set_power_state(new);
        if !ok {
            return Err(CoreError::internal(reason));
        }

        if matches!(new, PowerState::On) {
            self.clear_error_history();
        }

        let mut last_err = None;
        for seq in &mut self.sequencers {
            if let Err(e) = seq.open(services) {
                error!("chassis {}: error opening sequencer '{}': {e}", self.number, seq.name());
                services
                    .log_error(&[format!("error opening sequencer '{}': {e}", seq.name())])
                    .await;
                last_err = Some(e);
                continue;
            }
            let result = match new {
                PowerState::On => seq.power_on(services),
                PowerState::Off => seq.power_off(services),
            };
            if let Err(e) = result {
                error!("chassis {}: error driving sequencer '{}': {e}", self.number, seq.name());
                services
                    .log_error(&[format!("error driving sequencer '{}': {e}", seq.name())])
                    .await;
                last_err = Some(e);
            }
        }

        self.desired_power_state = Some(new);
        self.transition_started_at = Some(services.now());
        info!("chassis {}: set_power_state({new:?})", self.number);

        if let Some(e) = last_err {
            return Err(e);
        }
        Ok(())
    }

    /// One tick: refresh pgood, update the in-transition bookkeeping,
    /// then check for (and possibly isolate) a fault. Ordering is fixed
    /// (spec.md §5): isolation depends on the freshly-sampled
    /// `observed_power_good`.
    pub async fn monitor(&mut self, services: &dyn Services) -> CoreResult<()> {
        self.update_power_good(services).await?;
        self.check_for_pgood_error(services).await?;
        Ok(())
    }

    async fn update_power_good(&mut self, services: &dyn Services) -> CoreResult<()> {
        let present = self.monitor_ref()?.is_present()?;
        let input_power_good = self.monitor_ref()?.is_input_power_good()?;

        if !present || !input_power_good {
            let _ = self.close_devices(services).await;
            self.desired_power_state = Some(PowerState::Off);
            self.observed_power_good = Some(false);
            self.transition_started_at = None;
            return Ok(());
        }

        let available = self.monitor_ref()?.is_available()?;
        if !available {
            self.desired_power_state = None;
            self.observed_power_good = None;
            self.transition_started_at = None;
            return Ok(());
        }

        let was_in_transition = self.is_in_transition();

        let mut results = Vec::with_capacity(self.sequencers.len());
        for seq in &mut self.sequencers {
            if let Err(e) = seq.open(services) {
                self.log_transport_error_once(seq.name(), &e.to_string());
                continue;
            }
            match seq.get_power_good() {
                Ok(v) => results.push(v),
                Err(e) => {
                    self.log_transport_error_once(seq.name(), &e.to_string());
                }
            }
        }

        if self.sequencers.is_empty() {
            self.observed_power_good = Some(true);
        } else if results.is_empty() {
            // every sequencer read threw: leave the previous value as-is.
        } else if results.iter().all(|v| *v) {
            self.observed_power_good = Some(true);
        } else if results.iter().all(|v| !*v) {
            self.observed_power_good = Some(false);
        } else if was_in_transition {
            // mixed, still converging toward the first target: keep the
            // previous observation rather than flapping mid-transition.
        } else {
            self.observed_power_good = Some(false);
        }

        // Once desired and observed agree, the transition is complete;
        // the deadline anchor is cleared so a later re-divergence is
        // treated as a fault, not a restarted transition (see module
        // doc comment).
        if !self.is_in_transition() {
            self.transition_started_at = None;
        }

        Ok(())
    }

    fn log_transport_error_once(&mut self, device: &str, message: &str) {
        let seen = self.transport_errors_logged.entry(device.to_string()).or_default();
        if seen.insert(message.to_string()) {
            warn!("chassis {}: transport error on '{device}': {message}", self.number);
        } else {
            debug!("chassis {}: repeated transport error on '{device}' suppressed", self.number);
        }
    }

    async fn check_for_pgood_error(&mut self, services: &dyn Services) -> CoreResult<()> {
        let present = self.monitor_ref()?.is_present()?;
        let available = self.monitor_ref()?.is_available()?;
        let input_power_good = self.monitor_ref()?.is_input_power_good()?;
        let Some(observed) = self.observed_power_good else {
            return Ok(());
        };
        if !present || !available || !input_power_good {
            return Ok(());
        }
        let Some(desired) = self.desired_power_state else {
            return Ok(());
        };

        let desired_on = desired.as_good();
        if desired_on == observed {
            return Ok(());
        }

        if let Some(started_at) = self.transition_started_at {
            let elapsed = services.now().saturating_duration_since(started_at);
            if elapsed < self.pgood_timeout {
                return Ok(());
            }

            let identifier = if desired_on {
                ErrorLogIdentifier::PowerOnTimeout
            } else {
                ErrorLogIdentifier::PowerOffTimeout
            };
            let severity = if desired_on {
                Severity::Critical
            } else {
                Severity::Informational
            };
            let mut data = AdditionalData::new();
            data.insert("CALLOUT_INVENTORY_PATH".to_string(), self.inventory_path.clone());
            services.error_log(identifier.as_str(), severity, data).await;

            self.fault = Some(PgoodFault {
                was_timeout: true,
                counts_as_fault: desired_on,
                was_logged: true,
                first_seen_at: services.now(),
            });

            // Snap desired to observed: the timeout forecloses this
            // transition attempt.
            self.desired_power_state = Some(if observed { PowerState::On } else { PowerState::Off });
            self.transition_started_at = None;
            return Ok(());
        }

        // Already converged once before; this is a post-convergence
        // pgood drop. Only `desired==on && observed==off` is isolated —
        // the inverse (pgood asserting while desired is off) has no
        // isolation counterpart in spec.md §4.6.
        if !desired_on || observed {
            return Ok(());
        }

        if self.fault.is_none() {
            self.fault = Some(PgoodFault {
                was_timeout: false,
                counts_as_fault: true,
                was_logged: false,
                first_seen_at: services.now(),
            });
        }

        let fault = self.fault.as_ref().expect("just set above");
        if !fault.was_logged
            && services.now().saturating_duration_since(fault.first_seen_at) >= self.fault_log_delay
        {
            self.log_power_good_fault(services).await?;
            self.fault.as_mut().expect("still set").was_logged = true;
        }

        Ok(())
    }

    /// Walks sequencers in configured order, asking each to isolate a
    /// faulting rail (spec.md §4.6). First device + first rail wins. If
    /// none implicates itself, falls back to the power-supply error (if
    /// any was pre-set) or a generic `Shutdown`.
    async fn log_power_good_fault(&mut self, services: &dyn Services) -> CoreResult<()> {
        for seq in &mut self.sequencers {
            let mut data = AdditionalData::new();
            match seq
                .find_pgood_fault(services, &self.power_supply_error, &mut data)
                .await
            {
                Ok(PgoodFaultResult::RailFault) => {
                    services
                        .error_log(ErrorLogIdentifier::PowerSequencerVoltageFault.as_str(), Severity::Critical, data)
                        .await;
                    return Ok(());
                }
                Ok(PgoodFaultResult::PowerSupplyError(identifier)) => {
                    services.error_log(&identifier, Severity::Critical, data).await;
                    return Ok(());
                }
                Ok(PgoodFaultResult::None) => continue,
                Err(e) => {
                    let msg = format!("Unable to find rail fault status for device '{}': {e}", seq.name());
                    warn!("{msg}");
                    services.log_info(&msg).await;
                    continue;
                }
            }
        }

        let mut data = AdditionalData::new();
        data.insert("CALLOUT_INVENTORY_PATH".to_string(), self.inventory_path.clone());
        services
            .error_log(ErrorLogIdentifier::Shutdown.as_str(), Severity::Critical, data)
            .await;
        Ok(())
    }

    /// Closes every open sequencer. The first failure is recorded but
    /// every sequencer is still closed (spec.md §4.6).
    pub async fn close_devices(&mut self, services: &dyn Services) -> CoreResult<()> {
        let mut first_err = None;
        for seq in &mut self.sequencers {
            if let Err(e) = seq.close(services) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Clears fault and power-supply-error state (spec.md §4.6). Called
    /// explicitly or implicitly on power-on.
    pub fn clear_error_history(&mut self) {
        self.fault = None;
        self.power_supply_error.clear();
        self.transport_errors_logged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rail::Rail;
    use crate::sequencer::PowerSequencerDevice;
    use crate::services::mock::MockServices;

    fn healthy_options() -> ChassisStatusMonitorOptions {
        ChassisStatusMonitorOptions {
            is_present_monitored: true,
            is_available_monitored: true,
            is_enabled_monitored: true,
            is_input_power_status_monitored: true,
            ..Default::default()
        }
    }

    fn healthy_chassis(sequencers: Vec<PowerSequencerDevice>) -> Chassis {
        let mut c = Chassis::new(1, "/system/chassis0", sequencers).unwrap();
        c.initialize_monitoring(healthy_options());
        let m = c.monitor_mut().unwrap();
        m.handle_present_changed(true);
        m.handle_available_changed(true);
        m.handle_enabled_changed(true);
        m.handle_input_power_status_changed(crate::services::InputPowerStatus::Good);
        c
    }

    #[test]
    fn chassis_number_zero_is_rejected() {
        assert!(Chassis::new(0, "/system/chassis0", vec![]).is_err());
    }

    #[tokio::test]
    async fn healthy_on_scenario() {
        // Seed scenario 1: one sequencer, pgood initially false, then
        // asserts after set_power_state(on).
        let services = MockServices::new();
        let pgood = services.gpio_line("pseq0-pgood");
        pgood.set(0);
        let device = PowerSequencerDevice::gpios_only(
            "pseq0",
            "i2c-1",
            0x40,
            "pseq0-control",
            "pseq0-pgood",
            vec![],
        );
        let mut chassis = healthy_chassis(vec![device]);

        chassis.set_power_state(PowerState::On, &services).await.unwrap();
        pgood.set(1);
        chassis.monitor(&services).await.unwrap();

        assert_eq!(chassis.power_good(), Some(true));
        assert!(matches!(chassis.power_state(), Some(PowerState::On)));
        assert!(!chassis.has_power_good_fault());
        assert_eq!(services.error_log_count(), 0);
    }

    #[tokio::test]
    async fn power_on_timeout_logs_once() {
        // Seed scenario 2.
        let services = MockServices::new();
        let device = PowerSequencerDevice::gpios_only(
            "pseq0",
            "i2c-1",
            0x40,
            "pseq0-control",
            "pseq0-pgood",
            vec![],
        );
        let mut chassis = healthy_chassis(vec![device]);
        chassis.set_power_good_timeout(Duration::from_millis(10));

        chassis.set_power_state(PowerState::On, &services).await.unwrap();
        services.advance_time(Duration::from_millis(11));
        chassis.monitor(&services).await.unwrap();

        assert_eq!(services.error_log_count(), 1);
        let entry = services.last_error_log().unwrap();
        assert_eq!(entry.identifier, "Power.Error.PowerOnTimeout");
        let fault = chassis.get_power_good_fault().unwrap();
        assert!(fault.was_timeout);
        assert!(fault.was_logged);

        // A second monitor() must not re-log.
        chassis.monitor(&services).await.unwrap();
        assert_eq!(services.error_log_count(), 1);
    }

    #[tokio::test]
    async fn rail_isolation_scenario() {
        // Seed scenario 3: two sequencers, pgood asserts then drops
        // because the second sequencer's rail reports STATUS_VOUT fault.
        let services = MockServices::new();
        let pgood0 = services.gpio_line("pseq0-pgood");
        pgood0.set(1);
        let device0 = PowerSequencerDevice::gpios_only(
            "pseq0",
            "i2c-1",
            0x40,
            "pseq0-control",
            "pseq0-pgood",
            vec![],
        );

        let rail = Rail::builder("vdd").check_status_vout(true).page(0).build().unwrap();
        let pgood1 = services.gpio_line("pseq1-pgood");
        pgood1.set(1);
        let mut device1 = PowerSequencerDevice::basic(
            "pseq1",
            "i2c-1",
            0x41,
            "pseq1-control",
            "pseq1-pgood",
            vec![rail],
        );
        device1.open(&services).unwrap();

        let mut chassis = healthy_chassis(vec![device0, device1]);
        chassis.set_power_good_fault_log_delay(Duration::ZERO);

        chassis.set_power_state(PowerState::On, &services).await.unwrap();
        chassis.monitor(&services).await.unwrap();
        assert_eq!(chassis.power_good(), Some(true));
        assert!(chassis.get_power_good_fault().is_none());

        // pgood drops and the rail starts reporting a fault.
        pgood1.set(0);
        services
            .i2c_device("i2c-1", 0x41)
            .0
            .lock()
            .unwrap()
            .registers
            .insert(crate::i2c::pmbus::STATUS_VOUT, 0x80);
        chassis.monitor(&services).await.unwrap();

        assert_eq!(services.error_log_count(), 1);
        let entry = services.last_error_log().unwrap();
        assert_eq!(entry.identifier, "Power.Error.PowerSequencerVoltageFault");
        assert_eq!(entry.additional_data.get("DEVICE_NAME").unwrap(), "pseq1");
        assert_eq!(entry.additional_data.get("RAIL_NAME").unwrap(), "vdd");
        assert_eq!(entry.additional_data.get("STATUS_VOUT").unwrap(), "0x80");
    }

    #[tokio::test]
    async fn power_supply_attribution_scenario() {
        // Seed scenario 4.
        let services = MockServices::new();
        let rail = Rail::builder("vdd")
            .check_status_vout(true)
            .page(0)
            .power_supply_rail(true)
            .build()
            .unwrap();
        let pgood = services.gpio_line("pseq0-pgood");
        pgood.set(1);
        let mut device = PowerSequencerDevice::basic(
            "pseq0",
            "i2c-1",
            0x40,
            "pseq0-control",
            "pseq0-pgood",
            vec![rail],
        );
        device.open(&services).unwrap();

        let mut chassis = healthy_chassis(vec![device]);
        chassis.set_power_good_fault_log_delay(Duration::ZERO);

        chassis.set_power_state(PowerState::On, &services).await.unwrap();
        chassis.monitor(&services).await.unwrap();
        // The PSU status monitor (out of this crate's scope) reports its
        // own fault identifier sometime during the on-duration.
        chassis.set_power_supply_error("Power.PowerSupply.Error.IoutOCFault");

        pgood.set(0);
        services
            .i2c_device("i2c-1", 0x40)
            .0
            .lock()
            .unwrap()
            .registers
            .insert(crate::i2c::pmbus::STATUS_VOUT, 0x80);
        chassis.monitor(&services).await.unwrap();

        let entry = services.last_error_log().unwrap();
        assert_eq!(entry.identifier, "Power.PowerSupply.Error.IoutOCFault");
    }

    #[tokio::test]
    async fn mixed_sequencer_pgood_during_transition_keeps_previous_value() {
        // Seed scenario 5.
        let services = MockServices::new();
        let pgood0 = services.gpio_line("pseq0-pgood");
        let pgood1 = services.gpio_line("pseq1-pgood");
        pgood0.set(1);
        pgood1.set(1);
        let device0 =
            PowerSequencerDevice::gpios_only("pseq0", "i2c-1", 0x40, "pseq0-control", "pseq0-pgood", vec![]);
        let device1 =
            PowerSequencerDevice::gpios_only("pseq1", "i2c-1", 0x41, "pseq1-control", "pseq1-pgood", vec![]);
        let mut chassis = healthy_chassis(vec![device0, device1]);

        chassis.set_power_state(PowerState::On, &services).await.unwrap();
        chassis.monitor(&services).await.unwrap();
        assert_eq!(chassis.power_good(), Some(true));

        chassis.set_power_state(PowerState::Off, &services).await.unwrap();
        pgood0.set(0);
        pgood1.set(1);
        chassis.monitor(&services).await.unwrap();

        assert_eq!(chassis.power_good(), Some(true));
        assert!(chassis.is_in_transition());
        assert!(!chassis.has_power_good_fault());
    }

    #[tokio::test]
    async fn recovered_set_power_state_surfaces_last_error() {
        // Seed scenario 6: first sequencer fails to open, second
        // succeeds; the error is surfaced but the second still powers on.
        let services = MockServices::new();
        let failing =
            PowerSequencerDevice::gpios_only("pseq0", "i2c-1", 0x40, "pseq0-control", "pseq0-pgood", vec![]);
        // Force the open() to fail by poisoning the gpio request.
        services.gpio_line("pseq0-pgood").0.lock().unwrap().fail_request = true;
        let pgood1 = services.gpio_line("pseq1-pgood");
        let device1 =
            PowerSequencerDevice::gpios_only("pseq1", "i2c-1", 0x41, "pseq1-control", "pseq1-pgood", vec![]);

        let mut chassis = healthy_chassis(vec![failing, device1]);
        let result = chassis.set_power_state(PowerState::On, &services).await;
        assert!(result.is_err());
        assert!(matches!(chassis.power_state(), Some(PowerState::On)));

        // Clear the poison and let both sequencers report pgood.
        services.gpio_line("pseq0-pgood").0.lock().unwrap().fail_request = false;
        pgood1.set(1);
        services.gpio_line("pseq0-pgood").set(1);
        chassis.monitor(&services).await.unwrap();
        assert_eq!(chassis.power_good(), Some(true));
        assert!(!chassis.is_in_transition());
    }

    #[test]
    fn clear_error_history_resets_fault_and_power_supply_error() {
        let mut chassis = healthy_chassis(vec![]);
        chassis.set_power_supply_error("Power.PowerSupply.Error.IoutOCFault");
        chassis.clear_error_history();
        assert_eq!(chassis.power_supply_error(), "");
        assert!(chassis.get_power_good_fault().is_none());
    }

    #[test]
    fn pgood_timeout_zero_is_immediate() {
        let services = MockServices::new();
        let device =
            PowerSequencerDevice::gpios_only("pseq0", "i2c-1", 0x40, "pseq0-control", "pseq0-pgood", vec![]);
        let mut chassis = healthy_chassis(vec![device]);
        chassis.set_power_good_timeout(Duration::ZERO);
        assert_eq!(chassis.pgood_timeout, Duration::ZERO);
    }

    #[test]
    fn empty_sequencer_list_is_unconditionally_on() {
        let chassis = healthy_chassis(vec![]);
        assert_eq!(chassis.sequencers.len(), 0);
    }
}
