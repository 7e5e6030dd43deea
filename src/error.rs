//! Error taxonomy for the chassis power-control core.
//!
//! Kinds mirror the five categories the fault-isolation engine
//! distinguishes: configuration, transport, device-reported fault,
//! timeout, and internal invariant violation.

use thiserror::Error;

/// The core's sole error type. Every fallible public operation returns
/// `Result<T, CoreError>`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Invalid or incomplete configuration; boot should be aborted.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A GPIO or I2C call to a device failed.
    #[error("transport error on device '{device}': {message}")]
    Transport { device: String, message: String },

    /// A rail reported an out-of-spec condition (STATUS_VOUT, UV limit,
    /// pgood GPIO polarity).
    #[error("device fault on rail '{rail_id}': {message}")]
    DeviceFault { rail_id: String, message: String },

    /// Pgood did not assert (or deassert) within the configured timeout.
    #[error("chassis {chassis_number} power-good timeout")]
    Timeout { chassis_number: u32 },

    /// An invariant was violated: unknown rail/rule id, recursion depth
    /// exceeded, or similar programmer/configuration error detected at
    /// runtime.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn configuration(message: impl Into<String>) -> Self {
        CoreError::Configuration {
            message: message.into(),
        }
    }

    pub fn transport(device: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Transport {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn device_fault(rail_id: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::DeviceFault {
            rail_id: rail_id.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal {
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
