//! The `Services` facade (spec.md §6) — the core's sole window onto the
//! outside world: message-bus, GPIO, I2C, journal, error log, presence,
//! VPD, and time. Every concrete transport (D-Bus connection, libgpiod,
//! `/dev/i2c-N`) is an external collaborator; this module only defines
//! the interface plus an in-memory mock used by the test suite.

pub mod mock;

use crate::error::CoreResult;
use crate::gpio::Gpio;
use crate::i2c::I2c;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Instant;

/// Additional structured fields attached to an error-log entry (spec.md
/// §6): `DEVICE_NAME`, `RAIL_NAME`, `GPIO_VALUES`, `STATUS_WORD`, etc.
/// A `BTreeMap` keeps key order deterministic for tests that assert on
/// rendered payloads.
pub type AdditionalData = BTreeMap<String, String>;

/// Error-log severity levels (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Informational,
}

/// Input-power / power-supply status enumeration (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPowerStatus {
    Good,
    Fault,
    Unknown,
}

/// Structured error-log identifiers this core emits (spec.md §6, namespace
/// prefix elided — callers that route to a real error-log sink prepend
/// it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLogIdentifier {
    PowerOnTimeout,
    PowerOffTimeout,
    Shutdown,
    PowerSequencerVoltageFault,
    Internal,
    I2C,
    DBus,
    ConfigFile,
    WriteVerification,
    PhaseFaultN,
    PhaseFaultNPlus1,
}

impl ErrorLogIdentifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLogIdentifier::PowerOnTimeout => "Power.Error.PowerOnTimeout",
            ErrorLogIdentifier::PowerOffTimeout => "Power.Error.PowerOffTimeout",
            ErrorLogIdentifier::Shutdown => "Power.Error.Shutdown",
            ErrorLogIdentifier::PowerSequencerVoltageFault => {
                "Power.Error.PowerSequencerVoltageFault"
            }
            ErrorLogIdentifier::Internal => "Power.Error.Internal",
            ErrorLogIdentifier::I2C => "Power.Error.I2C",
            ErrorLogIdentifier::DBus => "Power.Error.DBus",
            ErrorLogIdentifier::ConfigFile => "Power.Regulators.Error.ConfigFile",
            ErrorLogIdentifier::WriteVerification => "Power.Regulators.Error.WriteVerification",
            ErrorLogIdentifier::PhaseFaultN => "Power.Regulators.Error.PhaseFault.N",
            ErrorLogIdentifier::PhaseFaultNPlus1 => "Power.Regulators.Error.PhaseFault.NPlus1",
        }
    }
}

impl std::fmt::Display for ErrorLogIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one call to `error_log.log`, kept by mock/test services so
/// assertions can check how many times (and with what payload) a fault
/// was logged — this is what lets seed scenario 2 ("a second monitor()
/// must not re-log") be asserted directly.
#[derive(Debug, Clone)]
pub struct ErrorLogEntry {
    pub identifier: String,
    pub severity: Severity,
    pub additional_data: AdditionalData,
}

/// The abstract facade every chassis/system/sequencer operation is
/// given. Bus-mediated calls (presence, VPD, journal, error log) are
/// `async` to mirror the message-bus round trip; GPIO/I2C factories are
/// synchronous handle constructors (spec.md §5: hardware I/O is
/// blocking but short, not yielded across).
#[async_trait]
pub trait Services: Send + Sync {
    /// Queries whether the FRU at `inventory_path` is present.
    async fn presence(&self, inventory_path: &str) -> CoreResult<bool>;

    /// Reads a VPD keyword for the FRU at `inventory_path`.
    async fn vpd(&self, inventory_path: &str, keyword: &str) -> CoreResult<String>;

    /// Returns a GPIO handle for the named line. The returned handle is
    /// unrequested; callers must `request_read`/`request_write` before
    /// use (spec.md §4.2).
    fn gpio(&self, name: &str) -> Box<dyn Gpio>;

    /// Returns an I2C handle for the given bus and address.
    fn i2c(&self, bus: &str, address: u16) -> Box<dyn I2c>;

    async fn log_info(&self, message: &str);
    async fn log_error(&self, messages: &[String]);

    /// Emits a structured error-log entry. `identifier` is usually one
    /// of `ErrorLogIdentifier::as_str()`'s values, but some faults
    /// (spec.md §6: `Power.PowerSupply.Error.IoutOCFault`) are echoed
    /// verbatim from an upstream identifier string the core never
    /// constructs itself — hence a plain `&str` rather than the closed
    /// enum.
    async fn error_log(&self, identifier: &str, severity: Severity, additional_data: AdditionalData);

    /// Injected current time, for testability (spec.md §6).
    fn now(&self) -> Instant;
}
