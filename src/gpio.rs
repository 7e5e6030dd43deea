//! Abstract single-line digital I/O (spec.md §4.2).
//!
//! A `Gpio` is requested for read or write, used, then released. The
//! physical transport (libgpiod, sysfs, whatever) lives outside this
//! crate; only the interface is specified here so the core can be
//! exercised against a mock in tests.

use crate::error::{CoreError, CoreResult};

/// A single GPIO line. Exclusively owned by whichever sequencer
/// requested it, from `request_read`/`request_write` to `release`.
pub trait Gpio: Send {
    /// Requests the line for reading. Must be called before `get_value`.
    fn request_read(&mut self) -> CoreResult<()>;

    /// Requests the line for writing with the given initial value (0 or
    /// 1). Must be called before `set_value`.
    fn request_write(&mut self, initial: u8) -> CoreResult<()>;

    /// Reads the current value of the line (0 or 1).
    fn get_value(&mut self) -> CoreResult<u8>;

    /// Writes a value (0 or 1) to the line.
    fn set_value(&mut self, value: u8) -> CoreResult<()>;

    /// Releases the line. Idempotent: calling it again after it has
    /// already released must not corrupt other GPIOs or return an error
    /// that a caller can't safely ignore.
    fn release(&mut self) -> CoreResult<()>;
}

/// A scoped acquisition guard. Requests the line on construction and
/// releases it on drop, the RAII-equivalent of the scoped resource
/// pattern spec.md §9 calls for. Release errors are swallowed, matching
/// the "destructor must not throw" contract in spec.md §4.3.
pub struct GpioGuard<'a> {
    gpio: &'a mut dyn Gpio,
    released: bool,
}

impl<'a> GpioGuard<'a> {
    pub fn for_read(gpio: &'a mut dyn Gpio) -> CoreResult<Self> {
        gpio.request_read()?;
        Ok(GpioGuard {
            gpio,
            released: false,
        })
    }

    pub fn for_write(gpio: &'a mut dyn Gpio, initial: u8) -> CoreResult<Self> {
        gpio.request_write(initial)?;
        Ok(GpioGuard {
            gpio,
            released: false,
        })
    }

    pub fn get_value(&mut self) -> CoreResult<u8> {
        self.gpio.get_value()
    }

    pub fn set_value(&mut self, value: u8) -> CoreResult<()> {
        self.gpio.set_value(value)
    }

    pub fn release(mut self) -> CoreResult<()> {
        self.released = true;
        self.gpio.release()
    }
}

impl Drop for GpioGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.gpio.release() {
                tracing::warn!("error releasing gpio in drop: {e}");
            }
        }
    }
}

/// In-memory `Gpio` double for tests: holds a single settable/readable
/// value and tracks request/release lifecycle so tests can assert the
/// exclusive-ownership contract is honored.
#[derive(Debug, Default, Clone)]
pub struct MockGpio {
    pub value: u8,
    pub requested: bool,
    pub fail_request: bool,
    pub fail_read: bool,
}

impl MockGpio {
    pub fn new(initial: u8) -> Self {
        MockGpio {
            value: initial,
            requested: false,
            fail_request: false,
            fail_read: false,
        }
    }
}

impl Gpio for MockGpio {
    fn request_read(&mut self) -> CoreResult<()> {
        if self.fail_request {
            return Err(CoreError::transport("mock gpio", "request_read failed"));
        }
        self.requested = true;
        Ok(())
    }

    fn request_write(&mut self, initial: u8) -> CoreResult<()> {
        if self.fail_request {
            return Err(CoreError::transport("mock gpio", "request_write failed"));
        }
        self.requested = true;
        self.value = initial;
        Ok(())
    }

    fn get_value(&mut self) -> CoreResult<u8> {
        if self.fail_read {
            return Err(CoreError::transport("mock gpio", "get_value failed"));
        }
        Ok(self.value)
    }

    fn set_value(&mut self, value: u8) -> CoreResult<()> {
        self.value = value;
        Ok(())
    }

    fn release(&mut self) -> CoreResult<()> {
        // Idempotent: releasing an already-released line is a no-op success.
        self.requested = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let mut gpio = MockGpio::new(0);
        {
            let _guard = GpioGuard::for_write(&mut gpio, 1).unwrap();
        }
        assert!(!gpio.requested);
        assert_eq!(gpio.value, 1);
    }

    #[test]
    fn double_release_is_noop() {
        let mut gpio = MockGpio::new(0);
        gpio.request_read().unwrap();
        gpio.release().unwrap();
        assert!(gpio.release().is_ok());
    }

    #[test]
    fn failing_request_propagates_error() {
        let mut gpio = MockGpio::new(0);
        gpio.fail_request = true;
        assert!(gpio.request_read().is_err());
    }
}
