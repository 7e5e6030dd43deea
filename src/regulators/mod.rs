//! Regulators rule/action interpreter (spec.md §4.4).
//!
//! A small recursive expression language for scripted per-device
//! operations: presence detection, startup configuration, sensor
//! monitoring, and phase-fault detection all reduce to an `Action` tree
//! evaluated against an `ActionEnvironment`. Grounded in
//! `phosphor-regulators/src/actions/*` (action.hpp's single
//! `execute(environment) -> bool` contract) and `action_environment.hpp`
//! (device-id indirection, rule call-stack depth, phase-fault set,
//! additional-data map).

use crate::error::{CoreError, CoreResult};
use crate::services::{AdditionalData, Services};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

/// Maximum rule call stack depth (spec.md §4.4, §8): depth 30 succeeds,
/// depth 31 fails with "Maximum rule depth exceeded".
pub const MAX_RULE_DEPTH: usize = 30;

/// PMBus `VOUT_COMMAND`, written by `PmbusWriteVoutCommand` to set a
/// rail's target output voltage.
const VOUT_COMMAND: u8 = 0x21;

/// A redundant-phase fault kind (spec.md §7: "two consecutive
/// detections before logging"). `N` means all redundant phases are
/// gone; `NPlus1` means one redundant phase remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseFaultType {
    N,
    NPlus1,
}

impl PhaseFaultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseFaultType::N => "n",
            PhaseFaultType::NPlus1 => "n+1",
        }
    }
}

/// A regulator device addressable by the action language: just enough
/// to issue I2C transactions against it. Distinct from
/// `sequencer::PowerSequencerDevice`, which drives chassis power rather
/// than individual regulator configuration (spec.md §9: devices are
/// referenced by ID through an `IDMap`, not owned by the action tree).
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub bus: String,
    pub address: u16,
}

impl Device {
    pub fn new(id: impl Into<String>, bus: impl Into<String>, address: u16) -> Self {
        Device {
            id: id.into(),
            bus: bus.into(),
            address,
        }
    }
}

/// A named, reusable sequence of actions (spec.md §4.4: `run_rule(id)`).
/// Running a rule executes its actions in order and returns the last
/// one's result, mirroring `action_utils::execute`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(id: impl Into<String>, actions: Vec<Action>) -> Self {
        Rule {
            id: id.into(),
            actions,
        }
    }
}

/// Maps string IDs to the `Device`/`Rule` objects actions refer to
/// indirectly (spec.md §9). Owns its entries rather than the
/// non-owning references of the original — the `System` object graph
/// this crate builds is a single owned tree, so there is no lifetime to
/// thread through.
#[derive(Debug, Default)]
pub struct IDMap {
    devices: HashMap<String, Device>,
    rules: HashMap<String, Rule>,
}

impl IDMap {
    pub fn new() -> Self {
        IDMap::default()
    }

    pub fn add_device(&mut self, device: Device) -> CoreResult<()> {
        if self.devices.contains_key(&device.id) {
            return Err(CoreError::configuration(format!(
                "duplicate device id '{}'",
                device.id
            )));
        }
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub fn add_rule(&mut self, rule: Rule) -> CoreResult<()> {
        if self.rules.contains_key(&rule.id) {
            return Err(CoreError::configuration(format!(
                "duplicate rule id '{}'",
                rule.id
            )));
        }
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn get_device(&self, id: &str) -> CoreResult<&Device> {
        self.devices
            .get(id)
            .ok_or_else(|| CoreError::internal(format!("unable to find device with id '{id}'")))
    }

    pub fn get_rule(&self, id: &str) -> CoreResult<&Rule> {
        self.rules
            .get(id)
            .ok_or_else(|| CoreError::internal(format!("unable to find rule with id '{id}'")))
    }
}

/// The execution environment threaded through one `Action::execute`
/// walk (spec.md §4.4): current device ID, an optional volts value
/// handed between `pmbus_read_sensor` and `pmbus_write_vout_command`,
/// the rule call-stack depth, phase faults detected so far, and
/// additional error data captured along the way.
#[derive(Debug, Default)]
pub struct ActionEnvironment {
    pub device_id: String,
    pub volts: Option<f64>,
    rule_depth: usize,
    phase_faults: HashSet<PhaseFaultType>,
    /// Consecutive-detection streak per phase-fault kind (spec.md §7:
    /// "two consecutive detections before logging"), grounded in
    /// `phase_fault_detection.cpp`'s fault-count tracking. A caller
    /// re-running the same action tree across monitoring passes reuses
    /// one `ActionEnvironment` (or copies this map forward) so the
    /// streak survives between ticks.
    phase_fault_streak: HashMap<PhaseFaultType, u32>,
    additional_data: AdditionalData,
}

impl ActionEnvironment {
    pub fn new(device_id: impl Into<String>) -> Self {
        ActionEnvironment {
            device_id: device_id.into(),
            volts: None,
            rule_depth: 0,
            phase_faults: HashSet::new(),
            phase_fault_streak: HashMap::new(),
            additional_data: AdditionalData::new(),
        }
    }

    pub fn add_additional_error_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.additional_data.insert(key.into(), value.into());
    }

    pub fn additional_data(&self) -> &AdditionalData {
        &self.additional_data
    }

    /// Records one detection of `fault_type`. Only confirmed (added to
    /// `phase_faults()`) once detected on two consecutive calls; a
    /// single blip doesn't count (spec.md §7). Returns whether the
    /// fault is now confirmed.
    pub fn add_phase_fault(&mut self, fault_type: PhaseFaultType) -> bool {
        let streak = self.phase_fault_streak.entry(fault_type).or_insert(0);
        *streak += 1;
        if *streak >= 2 {
            self.phase_faults.insert(fault_type);
            true
        } else {
            false
        }
    }

    /// Resets the consecutive-detection streak for `fault_type`. Call
    /// when a monitoring pass does not observe the fault, so a later
    /// detection starts a fresh streak instead of accumulating across a
    /// gap.
    pub fn clear_phase_fault_streak(&mut self, fault_type: PhaseFaultType) {
        self.phase_fault_streak.remove(&fault_type);
    }

    pub fn phase_faults(&self) -> &HashSet<PhaseFaultType> {
        &self.phase_faults
    }

    fn increment_rule_depth(&mut self, rule_id: &str) -> CoreResult<()> {
        if self.rule_depth >= MAX_RULE_DEPTH {
            return Err(CoreError::internal(format!(
                "Maximum rule depth exceeded by rule {rule_id}"
            )));
        }
        self.rule_depth += 1;
        Ok(())
    }

    fn decrement_rule_depth(&mut self) {
        self.rule_depth = self.rule_depth.saturating_sub(1);
    }

    pub fn rule_depth(&self) -> usize {
        self.rule_depth
    }
}

/// The `Action` tree: a closed, recursive algebraic data type (spec.md
/// §9) rather than a class hierarchy. A single recursive evaluator
/// (`execute`) replaces virtual dispatch.
#[derive(Debug, Clone)]
pub enum Action {
    And(Vec<Action>),
    Or(Vec<Action>),
    Not(Box<Action>),
    If {
        condition: Box<Action>,
        then_actions: Vec<Action>,
        else_actions: Vec<Action>,
    },
    RunRule(String),
    SetDevice(String),
    ComparePresence {
        fru: String,
        value: bool,
    },
    CompareVpd {
        fru: String,
        keyword: String,
        value: String,
    },
    CompareByte {
        register: u8,
        mask: u8,
        value: u8,
    },
    CompareWord {
        register: u8,
        mask: u16,
        value: u16,
    },
    CompareBit {
        register: u8,
        position: u8,
        value: u8,
    },
    PmbusWriteVoutCommand {
        /// Volts to write; `None` means take the value most recently
        /// captured in `env.volts` by a prior `pmbus_read_sensor`.
        volts: Option<f64>,
    },
    PmbusReadSensor {
        register: u8,
    },
    I2cCaptureBytes {
        register: u8,
        count: usize,
        /// Additional-data key the captured bytes are recorded under.
        data_key: String,
    },
    LogPhaseFault(PhaseFaultType),
}

impl Action {
    /// Executes this action tree node, recursing into children.
    /// Boxes the future manually (the standard pattern for recursive
    /// async functions) since `Action::execute` calling itself would
    /// otherwise produce an infinitely-sized future type.
    pub fn execute<'a>(
        &'a self,
        env: &'a mut ActionEnvironment,
        id_map: &'a IDMap,
        services: &'a dyn Services,
    ) -> Pin<Box<dyn Future<Output = CoreResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Action::And(actions) => {
                    let mut result = true;
                    for action in actions {
                        if !action.execute(env, id_map, services).await? {
                            result = false;
                        }
                    }
                    Ok(result)
                }
                Action::Or(actions) => {
                    let mut result = false;
                    for action in actions {
                        if action.execute(env, id_map, services).await? {
                            result = true;
                        }
                    }
                    Ok(result)
                }
                Action::Not(inner) => Ok(!inner.execute(env, id_map, services).await?),
                Action::If {
                    condition,
                    then_actions,
                    else_actions,
                } => {
                    if condition.execute(env, id_map, services).await? {
                        execute_sequence(then_actions, env, id_map, services).await
                    } else if else_actions.is_empty() {
                        Ok(false)
                    } else {
                        execute_sequence(else_actions, env, id_map, services).await
                    }
                }
                Action::RunRule(rule_id) => {
                    env.increment_rule_depth(rule_id)?;
                    let rule = id_map.get_rule(rule_id)?;
                    let result = execute_sequence(&rule.actions, env, id_map, services).await;
                    env.decrement_rule_depth();
                    result
                }
                Action::SetDevice(device_id) => {
                    env.device_id = device_id.clone();
                    Ok(true)
                }
                Action::ComparePresence { fru, value } => {
                    let present = services.presence(fru).await?;
                    Ok(present == *value)
                }
                Action::CompareVpd { fru, keyword, value } => {
                    let actual = services.vpd(fru, keyword).await?;
                    Ok(actual == *value)
                }
                Action::CompareByte { register, mask, value } => {
                    let device = id_map.get_device(&env.device_id)?;
                    let mut i2c = services.i2c(&device.bus, device.address);
                    let actual = i2c.read_byte(*register)?;
                    Ok((actual & mask) == *value)
                }
                Action::CompareWord { register, mask, value } => {
                    let device = id_map.get_device(&env.device_id)?;
                    let mut i2c = services.i2c(&device.bus, device.address);
                    let actual = i2c.read_word(*register)?;
                    Ok((actual & mask) == *value)
                }
                Action::CompareBit { register, position, value } => {
                    let device = id_map.get_device(&env.device_id)?;
                    let mut i2c = services.i2c(&device.bus, device.address);
                    let actual = i2c.read_byte(*register)?;
                    let bit = (actual >> position) & 0x1;
                    Ok(bit == *value)
                }
                Action::PmbusWriteVoutCommand { volts } => {
                    let volts = volts.or(env.volts).ok_or_else(|| {
                        CoreError::internal(
                            "pmbus_write_vout_command has no volts value and none was captured",
                        )
                    })?;
                    let device = id_map.get_device(&env.device_id)?;
                    let mut i2c = services.i2c(&device.bus, device.address);
                    let register = crate::i2c::millivolts_to_register((volts * 1000.0) as u32);
                    i2c.write_word(VOUT_COMMAND, register)?;
                    Ok(true)
                }
                Action::PmbusReadSensor { register } => {
                    let device = id_map.get_device(&env.device_id)?;
                    let mut i2c = services.i2c(&device.bus, device.address);
                    let reg = i2c.read_word(*register)?;
                    env.volts = Some(crate::i2c::register_to_volts(reg));
                    Ok(true)
                }
                Action::I2cCaptureBytes { register, count, data_key } => {
                    let device = id_map.get_device(&env.device_id)?;
                    let mut i2c = services.i2c(&device.bus, device.address);
                    let bytes = i2c.read_bytes(*register, *count)?;
                    env.add_additional_error_data(
                        data_key.clone(),
                        crate::rail::format_gpio_values(&bytes),
                    );
                    Ok(true)
                }
                Action::LogPhaseFault(fault_type) => Ok(env.add_phase_fault(*fault_type)),
            }
        })
    }
}

/// Executes a sequence of actions and returns the last one's result,
/// the shared semantics of `if`/`else` clauses and rule bodies
/// (`action_utils::execute`). An empty sequence returns `true` (no
/// constraint violated).
fn execute_sequence<'a>(
    actions: &'a [Action],
    env: &'a mut ActionEnvironment,
    id_map: &'a IDMap,
    services: &'a dyn Services,
) -> Pin<Box<dyn Future<Output = CoreResult<bool>> + Send + 'a>> {
    Box::pin(async move {
        let mut result = true;
        for action in actions {
            result = action.execute(env, id_map, services).await?;
        }
        Ok(result)
    })
}
