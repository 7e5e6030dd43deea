//! In-memory `Services` test double, the mock hardware/bus harness the
//! rest of the crate's test suite is built on — grounded in the
//! teacher's `SensorMock`/`StepperMock` pattern (`sensors/sensor_mock.rs`,
//! `motor/stepper_mock.rs`): one struct per abstract interface, no
//! hardware touched, fully introspectable by the test.

use super::{AdditionalData, ErrorLogEntry, Services, Severity};
use crate::error::CoreResult;
use crate::gpio::Gpio;
use crate::i2c::I2c;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A `Gpio` backed by a handle shared with the test, so a test can flip
/// a line's value after the sequencer under test has already requested
/// it (simulating pgood asserting mid-scenario).
#[derive(Clone)]
pub struct SharedMockGpio(pub Arc<Mutex<crate::gpio::MockGpio>>);

impl SharedMockGpio {
    pub fn new(initial: u8) -> Self {
        SharedMockGpio(Arc::new(Mutex::new(crate::gpio::MockGpio::new(initial))))
    }

    pub fn set(&self, value: u8) {
        self.0.lock().unwrap().value = value;
    }
}

impl Gpio for SharedMockGpio {
    fn request_read(&mut self) -> CoreResult<()> {
        self.0.lock().unwrap().request_read()
    }

    fn request_write(&mut self, initial: u8) -> CoreResult<()> {
        self.0.lock().unwrap().request_write(initial)
    }

    fn get_value(&mut self) -> CoreResult<u8> {
        self.0.lock().unwrap().get_value()
    }

    fn set_value(&mut self, value: u8) -> CoreResult<()> {
        self.0.lock().unwrap().set_value(value)
    }

    fn release(&mut self) -> CoreResult<()> {
        self.0.lock().unwrap().release()
    }
}

#[derive(Clone)]
pub struct SharedMockI2c(pub Arc<Mutex<crate::i2c::MockI2c>>);

impl SharedMockI2c {
    pub fn new() -> Self {
        SharedMockI2c(Arc::new(Mutex::new(crate::i2c::MockI2c::new())))
    }
}

impl I2c for SharedMockI2c {
    fn read_byte(&mut self, register: u8) -> CoreResult<u8> {
        self.0.lock().unwrap().read_byte(register)
    }

    fn read_word(&mut self, register: u8) -> CoreResult<u16> {
        self.0.lock().unwrap().read_word(register)
    }

    fn read_bytes(&mut self, register: u8, count: usize) -> CoreResult<Vec<u8>> {
        self.0.lock().unwrap().read_bytes(register, count)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> CoreResult<()> {
        self.0.lock().unwrap().write_byte(register, value)
    }

    fn write_word(&mut self, register: u8, value: u16) -> CoreResult<()> {
        self.0.lock().unwrap().write_word(register, value)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// An in-memory `Services` implementation for unit and scenario tests.
/// Time is injected: `now()` returns a base instant advanced by
/// whatever the test has called `advance_time` with, so pgood-timeout
/// and fault-log-delay scenarios don't need real sleeps.
pub struct MockServices {
    base: Instant,
    elapsed: Mutex<Duration>,
    presence: Mutex<HashMap<String, bool>>,
    vpd: Mutex<HashMap<(String, String), String>>,
    gpios: Mutex<HashMap<String, SharedMockGpio>>,
    i2cs: Mutex<HashMap<(String, u16), SharedMockI2c>>,
    pub error_logs: Mutex<Vec<ErrorLogEntry>>,
    pub journal_info: Mutex<Vec<String>>,
    pub journal_error: Mutex<Vec<String>>,
}

impl MockServices {
    pub fn new() -> Self {
        MockServices {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            presence: Mutex::new(HashMap::new()),
            vpd: Mutex::new(HashMap::new()),
            gpios: Mutex::new(HashMap::new()),
            i2cs: Mutex::new(HashMap::new()),
            error_logs: Mutex::new(Vec::new()),
            journal_info: Mutex::new(Vec::new()),
            journal_error: Mutex::new(Vec::new()),
        }
    }

    /// Advances the injected clock by `d`. Used to drive pgood-timeout
    /// and fault-log-delay scenarios deterministically.
    pub fn advance_time(&self, d: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap();
        *elapsed += d;
    }

    pub fn set_presence(&self, inventory_path: &str, present: bool) {
        self.presence
            .lock()
            .unwrap()
            .insert(inventory_path.to_string(), present);
    }

    pub fn set_vpd(&self, inventory_path: &str, keyword: &str, value: &str) {
        self.vpd.lock().unwrap().insert(
            (inventory_path.to_string(), keyword.to_string()),
            value.to_string(),
        );
    }

    /// Returns the shared GPIO registered under `name`, creating it
    /// (defaulting to 0) if this is the first reference.
    pub fn gpio_line(&self, name: &str) -> SharedMockGpio {
        self.gpios
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| SharedMockGpio::new(0))
            .clone()
    }

    pub fn i2c_device(&self, bus: &str, address: u16) -> SharedMockI2c {
        self.i2cs
            .lock()
            .unwrap()
            .entry((bus.to_string(), address))
            .or_insert_with(SharedMockI2c::new)
            .clone()
    }

    pub fn error_log_count(&self) -> usize {
        self.error_logs.lock().unwrap().len()
    }

    pub fn last_error_log(&self) -> Option<ErrorLogEntry> {
        self.error_logs.lock().unwrap().last().cloned()
    }
}

impl Default for MockServices {
    fn default() -> Self {
        MockServices::new()
    }
}

#[async_trait]
impl Services for MockServices {
    async fn presence(&self, inventory_path: &str) -> CoreResult<bool> {
        Ok(*self
            .presence
            .lock()
            .unwrap()
            .get(inventory_path)
            .unwrap_or(&true))
    }

    async fn vpd(&self, inventory_path: &str, keyword: &str) -> CoreResult<String> {
        self.vpd
            .lock()
            .unwrap()
            .get(&(inventory_path.to_string(), keyword.to_string()))
            .cloned()
            .ok_or_else(|| {
                crate::error::CoreError::transport(
                    inventory_path,
                    format!("no VPD keyword '{keyword}' set in mock"),
                )
            })
    }

    fn gpio(&self, name: &str) -> Box<dyn Gpio> {
        Box::new(self.gpio_line(name))
    }

    fn i2c(&self, bus: &str, address: u16) -> Box<dyn I2c> {
        Box::new(self.i2c_device(bus, address))
    }

    async fn log_info(&self, message: &str) {
        self.journal_info.lock().unwrap().push(message.to_string());
    }

    async fn log_error(&self, messages: &[String]) {
        self.journal_error
            .lock()
            .unwrap()
            .extend(messages.iter().cloned());
    }

    async fn error_log(&self, identifier: &str, severity: Severity, additional_data: AdditionalData) {
        self.error_logs.lock().unwrap().push(ErrorLogEntry {
            identifier: identifier.to_string(),
            severity,
            additional_data,
        });
    }

    fn now(&self) -> Instant {
        self.base + *self.elapsed.lock().unwrap()
    }
}
