//! System orchestrator (spec.md §4.7) — owns every chassis, routes
//! `set_power_state` to the chassis the caller has committed to
//! controlling, and aggregates their status into one system-wide view.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::chassis::{Chassis, PowerState};
use crate::chassis_status_monitor::ChassisStatusMonitorOptions;
use crate::error::{CoreError, CoreResult};
use crate::services::Services;

/// Owns all chassis (spec.md §3). `selected_chassis` is the set of
/// chassis numbers the user has committed to controlling; it is
/// computed once (on the first successful `set_power_state` or the
/// first `monitor()` with usable status) and then tracked going
/// forward.
pub struct System {
    chassis: Vec<Chassis>,
    selected_chassis: BTreeSet<u32>,
    desired_power_state: Option<PowerState>,
    observed_power_good: Option<bool>,
}

impl System {
    pub fn new(chassis: Vec<Chassis>) -> Self {
        System {
            chassis,
            selected_chassis: BTreeSet::new(),
            desired_power_state: None,
            observed_power_good: None,
        }
    }

    pub fn chassis(&self) -> &[Chassis] {
        &self.chassis
    }

    pub fn chassis_mut(&mut self) -> &mut [Chassis] {
        &mut self.chassis
    }

    pub fn chassis_by_number(&self, number: u32) -> Option<&Chassis> {
        self.chassis.iter().find(|c| c.number() == number)
    }

    pub fn chassis_by_number_mut(&mut self, number: u32) -> Option<&mut Chassis> {
        self.chassis.iter_mut().find(|c| c.number() == number)
    }

    pub fn selected_chassis(&self) -> &BTreeSet<u32> {
        &self.selected_chassis
    }

    pub fn desired_power_state(&self) -> Option<PowerState> {
        self.desired_power_state
    }

    pub fn observed_power_good(&self) -> Option<bool> {
        self.observed_power_good
    }

    /// Cascades monitor construction to every chassis (spec.md §4.7).
    pub fn initialize_monitoring(&mut self, options: ChassisStatusMonitorOptions) {
        for c in &mut self.chassis {
            c.initialize_monitoring(options);
        }
    }

    /// Populates `selected_chassis`, if empty, with every chassis whose
    /// status is fully good (spec.md §4.7). Individual chassis status
    /// errors are logged at Info, not fatal; if none qualify, fails.
    async fn ensure_selected_chassis(&mut self, new: PowerState, services: &dyn Services) -> CoreResult<()> {
        if !self.selected_chassis.is_empty() {
            return Ok(());
        }
        for c in &self.chassis {
            match c.status_is_good(new) {
                Ok(true) => {
                    self.selected_chassis.insert(c.number());
                }
                Ok(false) => {}
                Err(e) => {
                    info!("chassis {}: status check failed: {e}", c.number());
                    services
                        .log_info(&format!("chassis {}: status check failed: {e}", c.number()))
                        .await;
                }
            }
        }
        if self.selected_chassis.is_empty() {
            return Err(CoreError::internal("No chassis can be set to that state"));
        }
        Ok(())
    }

    /// Routes a power-state change to every selected chassis. All
    /// selected chassis are attempted even if one fails; the *last*
    /// failure is re-raised afterward (spec.md §4.7, mirroring
    /// `Chassis::set_power_state`'s own per-sequencer policy). Any
    /// failure clears `selected_chassis` so the next call recomputes it
    /// from scratch.
    pub async fn set_power_state(&mut self, new: PowerState, services: &dyn Services) -> CoreResult<()> {
        if self.chassis.is_empty() || self.chassis.iter().all(|c| c.monitor().is_none()) {
            return Err(CoreError::internal(
                "system has no chassis with initialized monitoring",
            ));
        }

        self.ensure_selected_chassis(new, services).await?;

        let mut last_err = None;
        let numbers: Vec<u32> = self.selected_chassis.iter().copied().collect();
        for number in numbers {
            if let Some(c) = self.chassis_by_number_mut(number) {
                if let Err(e) = c.set_power_state(new, services).await {
                    warn!("chassis {number}: set_power_state failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        if last_err.is_some() {
            self.selected_chassis.clear();
        }

        self.desired_power_state = Some(new);

        if let Some(e) = last_err {
            return Err(e);
        }
        Ok(())
    }

    /// Ticks every chassis independently; a chassis's failure is caught
    /// and logged, never stopping the others (spec.md §4.7, §5).
    /// Recomputes `selected_chassis` and the system-wide aggregate
    /// afterward.
    pub async fn monitor(&mut self, services: &dyn Services) {
        for c in &mut self.chassis {
            if let Err(e) = c.monitor(services).await {
                warn!("chassis {}: monitor failed: {e}", c.number());
                services
                    .log_info(&format!("chassis {}: monitor failed: {e}", c.number()))
                    .await;
            }
        }

        self.selected_chassis = self
            .chassis
            .iter()
            .filter(|c| c.power_good().is_some())
            .map(|c| c.number())
            .collect();

        // `selected_chassis` only ever contains chassis with a defined
        // `power_good()` (filtered above), so the aggregate is undefined
        // exactly when the selected set is empty.
        self.observed_power_good = if self.selected_chassis.is_empty() {
            None
        } else {
            Some(
                self.chassis
                    .iter()
                    .filter(|c| self.selected_chassis.contains(&c.number()))
                    .all(|c| c.power_good() == Some(true)),
            )
        };

        if self.desired_power_state.is_none() {
            if let Some(good) = self.observed_power_good {
                self.desired_power_state = Some(if good { PowerState::On } else { PowerState::Off });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::PowerSequencerDevice;
    use crate::services::mock::MockServices;
    use crate::services::InputPowerStatus;

    fn healthy_options() -> ChassisStatusMonitorOptions {
        ChassisStatusMonitorOptions {
            is_present_monitored: true,
            is_available_monitored: true,
            is_enabled_monitored: true,
            is_input_power_status_monitored: true,
            ..Default::default()
        }
    }

    fn healthy_chassis(number: u32, services: &MockServices, gpio_name: &str) -> Chassis {
        let device = PowerSequencerDevice::gpios_only(
            format!("pseq{number}"),
            "i2c-1",
            0x40 + number as u16,
            format!("{gpio_name}-control"),
            gpio_name,
            vec![],
        );
        let mut c = Chassis::new(number, format!("/system/chassis{number}"), vec![device]).unwrap();
        c.initialize_monitoring(healthy_options());
        let m = c.monitor_mut().unwrap();
        m.handle_present_changed(true);
        m.handle_available_changed(true);
        m.handle_enabled_changed(true);
        m.handle_input_power_status_changed(InputPowerStatus::Good);
        let _ = services.gpio_line(gpio_name);
        c
    }

    #[tokio::test]
    async fn set_power_state_fails_without_any_initialized_chassis() {
        let services = MockServices::new();
        let chassis = Chassis::new(1, "/system/chassis1", vec![]).unwrap();
        let mut system = System::new(vec![chassis]);
        let err = system.set_power_state(PowerState::On, &services).await.unwrap_err();
        assert!(err.to_string().contains("initialized"));
    }

    #[tokio::test]
    async fn set_power_state_selects_and_powers_on_healthy_chassis() {
        let services = MockServices::new();
        let chassis = healthy_chassis(1, &services, "pgood1");
        let mut system = System::new(vec![chassis]);

        system.set_power_state(PowerState::On, &services).await.unwrap();
        assert_eq!(system.selected_chassis(), &BTreeSet::from([1]));

        services.gpio_line("pgood1").set(1);
        system.monitor(&services).await;

        assert_eq!(system.observed_power_good(), Some(true));
        assert!(matches!(system.desired_power_state(), Some(PowerState::On)));
    }

    #[tokio::test]
    async fn monitor_aggregates_with_logical_and_across_selected_chassis() {
        let services = MockServices::new();
        let c1 = healthy_chassis(1, &services, "pgood1");
        let c2 = healthy_chassis(2, &services, "pgood2");
        let mut system = System::new(vec![c1, c2]);

        system.set_power_state(PowerState::On, &services).await.unwrap();
        services.gpio_line("pgood1").set(1);
        services.gpio_line("pgood2").set(0);
        system.monitor(&services).await;

        assert_eq!(system.observed_power_good(), Some(false));
    }

    #[tokio::test]
    async fn undefined_chassis_is_excluded_from_selection_not_the_aggregate() {
        // A chassis whose status monitor never received an Available
        // signal errors out of `monitor()` every tick, so it never
        // acquires a defined `power_good()` and is excluded from
        // `selected_chassis` entirely -- it does not poison the
        // aggregate for chassis that did report.
        let services = MockServices::new();
        let c1 = healthy_chassis(1, &services, "pgood1");
        let mut c2 = Chassis::new(2, "/system/chassis2", vec![]).unwrap();
        c2.initialize_monitoring(ChassisStatusMonitorOptions {
            is_available_monitored: true,
            ..Default::default()
        });
        let mut system = System::new(vec![c1, c2]);
        system.set_power_state(PowerState::On, &services).await.unwrap();
        services.gpio_line("pgood1").set(1);
        system.monitor(&services).await;

        assert_eq!(system.selected_chassis(), &BTreeSet::from([1]));
        assert_eq!(system.observed_power_good(), Some(true));
    }

    #[tokio::test]
    async fn empty_selected_chassis_yields_undefined_aggregate() {
        let services = MockServices::new();
        let mut c1 = Chassis::new(1, "/system/chassis1", vec![]).unwrap();
        c1.initialize_monitoring(ChassisStatusMonitorOptions {
            is_present_monitored: true,
            ..Default::default()
        });
        // present is never signaled -> monitor() fails every tick -> power_good stays None.
        let mut system = System::new(vec![c1]);
        system.monitor(&services).await;
        assert!(system.selected_chassis().is_empty());
        assert_eq!(system.observed_power_good(), None);
    }
}
