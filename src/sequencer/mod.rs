//! Power-sequencer device abstraction (spec.md §3, §4.3).
//!
//! Modeled as a closed enum rather than a trait object — spec.md §9
//! explicitly allows this ("devices can be resolved statically if the
//! implementer prefers a closed enum") and a closed enum keeps the
//! three real variants (GPIOs-only, basic PMBus+GPIO, PMBus/UCD90xxx
//! with bulk GPIO snapshot) exhaustively matched at every call site
//! instead of needing a trait-object escape hatch.

use crate::error::{CoreError, CoreResult};
use crate::gpio::Gpio;
use crate::i2c::{self, I2c, pmbus};
use crate::rail::Rail;
use crate::services::{AdditionalData, Services};
use tracing::{debug, info, warn};

/// Which class of hardware a `PowerSequencerDevice` talks to. Each
/// variant supports a different subset of the `PowerSequencerDevice`
/// contract (spec.md §4.3).
enum Variant {
    /// Exposes only the two named control/pgood GPIOs. No PMBus, no
    /// rail isolation.
    GpiosOnly,
    /// Exposes PMBus (STATUS_WORD/STATUS_VOUT/READ_VOUT/
    /// VOUT_UV_FAULT_LIMIT) in addition to the two named GPIOs, but has
    /// no bulk GPIO snapshot command.
    Basic,
    /// Adds a single bulk GPIO snapshot read (UCD90xxx `MFR_GPIO_PINS`),
    /// cached for the duration of one `find_pgood_fault` call.
    PmbusUcd { gpio_snapshot_cache: Option<Vec<u8>> },
}

impl Variant {
    fn supports_pmbus(&self) -> bool {
        !matches!(self, Variant::GpiosOnly)
    }

    fn supports_gpio_snapshot(&self) -> bool {
        matches!(self, Variant::PmbusUcd { .. })
    }
}

/// The outcome of `find_pgood_fault` (spec.md §4.3, §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum PgoodFaultResult {
    /// A rail implicated itself; `additional_data` carries `RAIL_NAME`
    /// and the specific captured field(s). The caller should emit
    /// `PowerSequencerVoltageFault`.
    RailFault,
    /// The winning rail was a power-supply rail and a non-empty
    /// `power_supply_error` identifier was supplied; echo it instead of
    /// `PowerSequencerVoltageFault`.
    PowerSupplyError(String),
    /// No rail implicated itself (or this variant can't isolate at
    /// all).
    None,
}

/// A hardware device that turns rails on/off via a control GPIO and
/// reports aggregate pgood via a pgood GPIO. See spec.md §3/§4.3.
pub struct PowerSequencerDevice {
    name: String,
    bus: String,
    address: u16,
    power_control_gpio_name: String,
    power_good_gpio_name: String,
    rails: Vec<Rail>,
    variant: Variant,
    pgood_gpio: Option<Box<dyn Gpio>>,
    i2c: Option<Box<dyn I2c>>,
}

impl PowerSequencerDevice {
    fn new(
        name: impl Into<String>,
        bus: impl Into<String>,
        address: u16,
        power_control_gpio_name: impl Into<String>,
        power_good_gpio_name: impl Into<String>,
        rails: Vec<Rail>,
        variant: Variant,
    ) -> Self {
        PowerSequencerDevice {
            name: name.into(),
            bus: bus.into(),
            address,
            power_control_gpio_name: power_control_gpio_name.into(),
            power_good_gpio_name: power_good_gpio_name.into(),
            rails,
            variant,
            pgood_gpio: None,
            i2c: None,
        }
    }

    pub fn gpios_only(
        name: impl Into<String>,
        bus: impl Into<String>,
        address: u16,
        power_control_gpio_name: impl Into<String>,
        power_good_gpio_name: impl Into<String>,
        rails: Vec<Rail>,
    ) -> Self {
        Self::new(
            name,
            bus,
            address,
            power_control_gpio_name,
            power_good_gpio_name,
            rails,
            Variant::GpiosOnly,
        )
    }

    pub fn basic(
        name: impl Into<String>,
        bus: impl Into<String>,
        address: u16,
        power_control_gpio_name: impl Into<String>,
        power_good_gpio_name: impl Into<String>,
        rails: Vec<Rail>,
    ) -> Self {
        Self::new(
            name,
            bus,
            address,
            power_control_gpio_name,
            power_good_gpio_name,
            rails,
            Variant::Basic,
        )
    }

    pub fn pmbus_ucd(
        name: impl Into<String>,
        bus: impl Into<String>,
        address: u16,
        power_control_gpio_name: impl Into<String>,
        power_good_gpio_name: impl Into<String>,
        rails: Vec<Rail>,
    ) -> Self {
        Self::new(
            name,
            bus,
            address,
            power_control_gpio_name,
            power_good_gpio_name,
            rails,
            Variant::PmbusUcd {
                gpio_snapshot_cache: None,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rails(&self) -> &[Rail] {
        &self.rails
    }

    pub fn is_open(&self) -> bool {
        self.pgood_gpio.is_some()
    }

    /// Acquires the pgood GPIO for read and, for PMBus-capable
    /// variants, the I2C handle. Idempotent: a no-op if already open
    /// (spec.md §8: "opening an already-open device is a no-op").
    pub fn open(&mut self, services: &dyn Services) -> CoreResult<()> {
        if self.pgood_gpio.is_none() {
            let mut gpio = services.gpio(&self.power_good_gpio_name);
            gpio.request_read()?;
            self.pgood_gpio = Some(gpio);
        }
        if self.variant.supports_pmbus() && self.i2c.is_none() {
            self.i2c = Some(services.i2c(&self.bus, self.address));
        }
        Ok(())
    }

    /// Releases the pgood GPIO. Idempotent (spec.md §8).
    pub fn close(&mut self, _services: &dyn Services) -> CoreResult<()> {
        if let Some(mut gpio) = self.pgood_gpio.take() {
            gpio.release()?;
        }
        Ok(())
    }

    /// Briefly acquires the control GPIO for write, drives it high,
    /// then releases — tolerating concurrent `get_power_good` readers
    /// because they touch a different line (spec.md §4.3).
    pub fn power_on(&mut self, services: &dyn Services) -> CoreResult<()> {
        self.drive_control_gpio(services, 1)
    }

    pub fn power_off(&mut self, services: &dyn Services) -> CoreResult<()> {
        self.drive_control_gpio(services, 0)
    }

    fn drive_control_gpio(&self, services: &dyn Services, value: u8) -> CoreResult<()> {
        let mut gpio = services.gpio(&self.power_control_gpio_name);
        let mut guard = crate::gpio::GpioGuard::for_write(gpio.as_mut(), value)?;
        guard.set_value(value)?;
        guard.release()
    }

    /// Reads the pgood GPIO. The device must already be open.
    pub fn get_power_good(&mut self) -> CoreResult<bool> {
        let gpio = self.pgood_gpio.as_mut().ok_or_else(|| {
            CoreError::internal(format!("device '{}' is not open", self.name))
        })?;
        Ok(gpio.get_value()? == 1)
    }

    fn i2c_mut_checked(&mut self) -> CoreResult<&mut Box<dyn I2c>> {
        if !self.variant.supports_pmbus() {
            return Err(CoreError::transport(
                &self.name,
                "PMBus not supported by this sequencer variant",
            ));
        }
        self.i2c.as_mut().ok_or_else(|| {
            CoreError::transport(&self.name, "device is not open (no I2C handle)")
        })
    }

    fn select_page(&mut self, page: u8) -> CoreResult<()> {
        let i2c = self.i2c_mut_checked()?;
        i2c.write_byte(pmbus::PAGE, page)
    }

    pub fn get_status_word(&mut self, page: u8) -> CoreResult<u16> {
        self.select_page(page)?;
        self.i2c_mut_checked()?.read_word(pmbus::STATUS_WORD)
    }

    pub fn get_status_vout(&mut self, page: u8) -> CoreResult<u8> {
        self.select_page(page)?;
        self.i2c_mut_checked()?.read_byte(pmbus::STATUS_VOUT)
    }

    pub fn get_read_vout(&mut self, page: u8) -> CoreResult<f64> {
        self.select_page(page)?;
        let reg = self.i2c_mut_checked()?.read_word(pmbus::READ_VOUT)?;
        Ok(i2c::register_to_volts(reg))
    }

    pub fn get_vout_uv_fault_limit(&mut self, page: u8) -> CoreResult<f64> {
        self.select_page(page)?;
        let reg = self
            .i2c_mut_checked()?
            .read_word(pmbus::VOUT_UV_FAULT_LIMIT)?;
        Ok(i2c::register_to_volts(reg))
    }

    pub fn get_mfr_status(&mut self, page: u8) -> CoreResult<u16> {
        self.select_page(page)?;
        self.i2c_mut_checked()?.read_word(pmbus::MFR_STATUS)
    }

    /// Returns the bulk GPIO snapshot. Only the PMBus/UCD90xxx variant
    /// supports this; it is cached for the lifetime of one
    /// `find_pgood_fault` call (spec.md §4.3).
    pub fn get_gpio_values(&mut self) -> CoreResult<Vec<u8>> {
        if !self.variant.supports_gpio_snapshot() {
            return Err(CoreError::transport(
                &self.name,
                "bulk GPIO snapshot not supported by this sequencer variant",
            ));
        }
        if let Variant::PmbusUcd {
            gpio_snapshot_cache: Some(cached),
        } = &self.variant
        {
            return Ok(cached.clone());
        }
        let i2c = self.i2c_mut_checked()?;
        let bytes = i2c.read_bytes(pmbus::MFR_GPIO_PINS, 32)?;
        if let Variant::PmbusUcd {
            gpio_snapshot_cache,
        } = &mut self.variant
        {
            *gpio_snapshot_cache = Some(bytes.clone());
        }
        Ok(bytes)
    }

    /// Drops the cached bulk GPIO snapshot. Called at the start of each
    /// `find_pgood_fault` invocation so a fresh snapshot is taken per
    /// isolation attempt, while still caching within that one attempt.
    fn reset_gpio_snapshot_cache(&mut self) {
        if let Variant::PmbusUcd {
            gpio_snapshot_cache,
        } = &mut self.variant
        {
            *gpio_snapshot_cache = None;
        }
    }

    /// Walks this device's rails looking for the one that implicates
    /// itself in a pgood fault (spec.md §4.3, §4.6). Populates
    /// `DEVICE_NAME` and, best-effort, `GPIO_VALUES` in
    /// `additional_data` regardless of outcome.
    pub async fn find_pgood_fault(
        &mut self,
        services: &dyn Services,
        power_supply_error: &str,
        additional_data: &mut AdditionalData,
    ) -> CoreResult<PgoodFaultResult> {
        additional_data.insert("DEVICE_NAME".to_string(), self.name.clone());
        self.reset_gpio_snapshot_cache();

        if matches!(self.variant, Variant::GpiosOnly) {
            return Ok(PgoodFaultResult::None);
        }

        if let Ok(values) = self.get_gpio_values() {
            additional_data.insert(
                "GPIO_VALUES".to_string(),
                crate::rail::format_gpio_values(&values),
            );
        }

        let rails = std::mem::take(&mut self.rails);
        let mut result = PgoodFaultResult::None;
        for rail in &rails {
            match rail.has_pgood_fault(self, services, additional_data).await {
                Ok(true) => {
                    result = if rail.is_power_supply_rail() && !power_supply_error.is_empty() {
                        PgoodFaultResult::PowerSupplyError(power_supply_error.to_string())
                    } else {
                        PgoodFaultResult::RailFault
                    };
                    break;
                }
                Ok(false) => continue,
                Err(e) => {
                    let msg = format!(
                        "Unable to find rail fault status for '{}' on device '{}': {e}",
                        rail.id(),
                        self.name
                    );
                    warn!("{msg}");
                    services.log_info(&msg).await;
                    continue;
                }
            }
        }
        self.rails = rails;
        Ok(result)
    }

    /// Test-only escape hatch for manipulating the backing I2C mock
    /// directly once a device has been opened with `MockServices`.
    #[cfg(test)]
    pub fn i2c_mut(&mut self) -> std::sync::MutexGuard<'_, crate::i2c::MockI2c> {
        use crate::services::mock::SharedMockI2c;
        let i2c = self.i2c.as_mut().expect("device must be open to access i2c");
        let shared = i2c
            .as_any_mut()
            .downcast_mut::<SharedMockI2c>()
            .expect("test helper requires SharedMockI2c");
        shared.0.lock().unwrap()
    }
}

/// Test support used by both this module's and `rail`'s unit tests.
#[cfg(test)]
pub mod tests_support {
    use super::*;
    use crate::services::mock::SharedMockI2c;

    /// Builds a `Basic` device with one rail and a pre-opened, directly
    /// poke-able mock I2C handle.
    pub fn basic_device_with_rail(rail: Rail) -> PowerSequencerDevice {
        let shared = SharedMockI2c::new();
        let mut device = PowerSequencerDevice::basic(
            "pseq0",
            "i2c-1",
            0x40,
            "pseq0-control",
            "pseq0-pgood",
            vec![rail],
        );
        device.i2c = Some(Box::new(shared));
        device
    }
}
