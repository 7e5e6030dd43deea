//! Chassis presence/availability/power status cache (spec.md §4.5).
//!
//! Grounded in `chassis_status_monitor.hpp`'s `ChassisStatusMonitor`
//! abstract base and its `BMCChassisStatusMonitor` implementation: a set
//! of `ChassisStatusMonitorOptions` flags decide which attributes are
//! actually tracked, and each accessor either returns a safe default (if
//! disabled) or the last value a bus-signal callback stored (if
//! enabled, erroring when nothing has arrived yet). The physical D-Bus
//! matches (`NameOwnerChanged`/`InterfacesAdded`/`PropertiesChanged`)
//! are the message-bus transport's concern (spec.md §1, out of scope);
//! this module only owns the cache those callbacks would update and the
//! read-side contract callers (`Chassis`) depend on.

use crate::error::{CoreError, CoreResult};
use crate::services::InputPowerStatus;

/// Which attributes this monitor actually tracks. An attribute that
/// isn't monitored reports a safe default rather than failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChassisStatusMonitorOptions {
    pub is_present_monitored: bool,
    pub is_available_monitored: bool,
    pub is_enabled_monitored: bool,
    pub is_power_state_monitored: bool,
    pub is_power_good_monitored: bool,
    pub is_input_power_status_monitored: bool,
    pub is_power_supplies_status_monitored: bool,
}

/// Cached chassis status, kept fresh by bus-signal callbacks (spec.md
/// §3, §4.5). Every `handle_*` method is the Rust analogue of a
/// `*Callback` in the original: it may not fail, mirroring "signal
/// handlers must not throw."
#[derive(Debug, Clone)]
pub struct ChassisStatusMonitor {
    options: ChassisStatusMonitorOptions,
    present: Option<bool>,
    available: Option<bool>,
    enabled: Option<bool>,
    power_state: Option<i32>,
    power_good: Option<i32>,
    input_power_status: Option<InputPowerStatus>,
    power_supplies_status: Option<InputPowerStatus>,
}

impl ChassisStatusMonitor {
    pub fn new(options: ChassisStatusMonitorOptions) -> Self {
        ChassisStatusMonitor {
            options,
            present: None,
            available: None,
            enabled: None,
            power_state: None,
            power_good: None,
            input_power_status: None,
            power_supplies_status: None,
        }
    }

    pub fn options(&self) -> ChassisStatusMonitorOptions {
        self.options
    }

    pub fn is_present(&self) -> CoreResult<bool> {
        if !self.options.is_present_monitored {
            return Ok(true);
        }
        self.present
            .ok_or_else(|| CoreError::internal("Present property value could not be obtained"))
    }

    pub fn is_available(&self) -> CoreResult<bool> {
        if !self.options.is_available_monitored {
            return Ok(true);
        }
        self.available
            .ok_or_else(|| CoreError::internal("Available property value could not be obtained"))
    }

    pub fn is_enabled(&self) -> CoreResult<bool> {
        if !self.options.is_enabled_monitored {
            return Ok(true);
        }
        self.enabled
            .ok_or_else(|| CoreError::internal("Enabled property value could not be obtained"))
    }

    pub fn get_power_state(&self) -> CoreResult<i32> {
        if !self.options.is_power_state_monitored {
            return Err(CoreError::internal(
                "Power state property value is not being monitored",
            ));
        }
        self.power_state.ok_or_else(|| {
            CoreError::internal("Power state property value could not be obtained")
        })
    }

    pub fn get_power_good(&self) -> CoreResult<i32> {
        if !self.options.is_power_good_monitored {
            return Err(CoreError::internal(
                "Power good property value is not being monitored",
            ));
        }
        self.power_good
            .ok_or_else(|| CoreError::internal("Power good property value could not be obtained"))
    }

    pub fn is_powered_on(&self) -> CoreResult<bool> {
        Ok(self.get_power_state()? == 1 && self.get_power_good()? == 1)
    }

    pub fn is_powered_off(&self) -> CoreResult<bool> {
        Ok(self.get_power_state()? == 0 && self.get_power_good()? == 0)
    }

    pub fn get_input_power_status(&self) -> CoreResult<InputPowerStatus> {
        if !self.options.is_input_power_status_monitored {
            return Ok(InputPowerStatus::Good);
        }
        self.input_power_status.ok_or_else(|| {
            CoreError::internal("Input power Status property value could not be obtained")
        })
    }

    pub fn is_input_power_good(&self) -> CoreResult<bool> {
        Ok(self.get_input_power_status()? == InputPowerStatus::Good)
    }

    pub fn get_power_supplies_status(&self) -> CoreResult<InputPowerStatus> {
        if !self.options.is_power_supplies_status_monitored {
            return Ok(InputPowerStatus::Good);
        }
        self.power_supplies_status.ok_or_else(|| {
            CoreError::internal("Power supplies power Status property value could not be obtained")
        })
    }

    pub fn is_power_supplies_power_good(&self) -> CoreResult<bool> {
        Ok(self.get_power_supplies_status()? == InputPowerStatus::Good)
    }

    /// `PropertiesChanged` callback equivalent for the Present property.
    pub fn handle_present_changed(&mut self, value: bool) {
        self.present = Some(value);
    }

    pub fn handle_available_changed(&mut self, value: bool) {
        self.available = Some(value);
    }

    pub fn handle_enabled_changed(&mut self, value: bool) {
        self.enabled = Some(value);
    }

    pub fn handle_power_state_changed(&mut self, value: i32) {
        self.power_state = Some(value);
    }

    pub fn handle_power_good_changed(&mut self, value: i32) {
        self.power_good = Some(value);
    }

    pub fn handle_input_power_status_changed(&mut self, status: InputPowerStatus) {
        self.input_power_status = Some(status);
    }

    pub fn handle_power_supplies_status_changed(&mut self, status: InputPowerStatus) {
        self.power_supplies_status = Some(status);
    }

    /// `NameOwnerChanged` callback equivalent: the owning service
    /// disappeared (or changed). Cached values are left untouched —
    /// spec.md §3: "values never regress to undefined... they stay
    /// cached until replaced" — it is the caller's responsibility (the
    /// bus-signal dispatch loop, an external collaborator) to re-fetch
    /// every monitored attribute from the new owner and call the
    /// `handle_*` setters above once it does.
    pub fn handle_name_owner_changed(&mut self, _new_owner: Option<&str>) {}
}
