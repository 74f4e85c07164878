//! BNO055 orientation sensor
//!
//! Only the die temperature is exposed. An optional reset line is pulsed
//! before the sensor is brought into fusion mode.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pinode_core::{
    AcquisitionState, Capabilities, Device, DeviceConfig, EventSink, PinodeError, PinodeResult,
    Value, ValueDescriptor, ValueRegistry, ValueType,
};

use crate::drivers::bus::I2cBus;
use crate::drivers::gpio::GpioContext;
use crate::drivers::imu::bno055::{self, Bno055Driver};

pub const DEFAULT_POLL: Duration = Duration::from_secs(300);

const RESET_PULSE: Duration = Duration::from_millis(10);

/// GPIO line wired to the sensor's active-low RST input
struct ResetLine {
    gpio: GpioContext,
    line: u8,
}

impl ResetLine {
    fn pulse(&self) -> PinodeResult<()> {
        let line = self.line;
        self.gpio.with_driver(|g| {
            g.setup_output(line, true)?;
            g.write_pin(line, false)
        })?;
        thread::sleep(RESET_PULSE);
        self.gpio.with_driver(|g| g.write_pin(line, true))?;
        thread::sleep(bno055::RESET_DELAY);
        Ok(())
    }

    fn release(&self) {
        let line = self.line;
        if let Err(e) = self.gpio.with_driver(|g| g.release_pin(line)) {
            log::warn!("releasing BNO055 reset line {} failed: {}", line, e);
        }
    }
}

pub struct Bno055Device {
    id: String,
    bus: I2cBus,
    driver: Bno055Driver,
    reset: Option<ResetLine>,
    state: AcquisitionState,
    registry: Arc<ValueRegistry<Self>>,
}

impl Bno055Device {
    pub fn new(id: &str, bus: I2cBus, address: u8) -> Self {
        Self {
            id: id.to_string(),
            bus,
            driver: Bno055Driver::new(address),
            reset: None,
            state: AcquisitionState::Closed,
            registry: Arc::new(Self::values()),
        }
    }

    /// `reset_pin` comes from the config `pin` field, in the gateway numbering mode
    pub fn from_config(
        id: &str,
        config: &DeviceConfig,
        bus: I2cBus,
        gpio: Option<GpioContext>,
    ) -> PinodeResult<Self> {
        let address = config.i2c_address.unwrap_or(bno055::DEFAULT_ADDRESS);
        let mut device = Self::new(id, bus, address);
        if let (Some(pin), Some(gpio)) = (config.pin, gpio) {
            device = device.with_reset_pin(gpio, pin)?;
        }
        device.registry = Arc::new(
            Self::values().with_poll_intervals(|name, default| config.poll_interval(name, default)),
        );
        Ok(device)
    }

    pub fn with_reset_pin(mut self, gpio: GpioContext, pin: u8) -> PinodeResult<Self> {
        let line = gpio.resolve(pin)?;
        self.reset = Some(ResetLine { gpio, line });
        Ok(self)
    }

    pub fn address(&self) -> u8 {
        self.driver.address()
    }

    fn values() -> ValueRegistry<Self> {
        ValueRegistry::new().sensor(
            ValueDescriptor::sensor("temperature", ValueType::float())
                .with_label("Temperature")
                .with_help("Die temperature in °C")
                .with_poll(DEFAULT_POLL),
            |d: &mut Self| {
                let driver = &d.driver;
                let celsius = d
                    .bus
                    .transaction(&d.id, driver.address(), |tx| driver.read_temperature(tx))?;
                Ok(Value::Float(celsius))
            },
        )
    }
}

impl Device for Bno055Device {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "bno055"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::sensor()
    }

    fn state(&self) -> AcquisitionState {
        self.state
    }

    fn open(&mut self, _events: EventSink) -> PinodeResult<()> {
        if self.state.is_open() {
            return Ok(());
        }
        if let Some(ref reset) = self.reset {
            reset.pulse().map_err(PinodeError::into_unavailable)?;
        }
        let driver = &self.driver;
        self.bus
            .transaction(&self.id, driver.address(), |tx| driver.begin(tx))
            .map_err(PinodeError::into_unavailable)?;
        log::info!(
            "{}: BNO055 on bus {} at 0x{:02x}",
            self.id,
            self.bus.number(),
            driver.address()
        );
        self.state = AcquisitionState::Free;
        Ok(())
    }

    fn close(&mut self) -> PinodeResult<()> {
        if self.state.is_open() {
            if let Some(ref reset) = self.reset {
                reset.release();
            }
            self.state = AcquisitionState::Closed;
        }
        Ok(())
    }

    fn check_heartbeat(&mut self) -> bool {
        if !self.state.is_open() {
            return false;
        }
        let driver = &self.driver;
        self.bus
            .transaction(&self.id, driver.address(), |tx| Ok(driver.is_present(tx)))
            .unwrap_or(false)
    }

    registry_values!();
}
