//! Configuration-driven device construction
//!
//! [`DeviceFactory`] owns the process-wide hardware contexts: one
//! [`GpioContext`], one [`I2cBus`] per bus number and the bus lock registry.
//! Devices of the same bus share those handles, and therefore the same lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pinode_core::{
    BusLockRegistry, DeviceConfig, Gateway, GatewayConfig, GatewaySettings, PinodeError,
    PinodeResult, Publisher,
};

use super::{
    Bmp085Device, Bno055Device, CameraDevice, DeviceDriver, GpioInputDevice, GpioOutputDevice,
    GpioPwmDevice,
};
use crate::drivers::barometer::bmp085;
use crate::drivers::bus::{I2cBus, I2cDriver, I2cDriverBackend};
use crate::drivers::camera::{CameraDriver, CameraDriverBackend};
use crate::drivers::gpio::{GpioContext, GpioDriverBackend};
use crate::drivers::imu::bno055;

/// Every `kind` accepted in a device config
pub const DEVICE_KINDS: [&str; 6] = [
    "gpio_input",
    "gpio_output",
    "gpio_pwm",
    "bmp085",
    "bno055",
    "camera",
];

const DEFAULT_I2C_BUS: u8 = 1;
/// Die temperature reported by an auto-installed simulated BNO055
const SIMULATED_BNO055_TEMPERATURE: i8 = 25;

pub struct DeviceFactory {
    settings: GatewaySettings,
    locks: BusLockRegistry,
    gpio: Mutex<Option<GpioContext>>,
    i2c: Mutex<HashMap<u8, I2cBus>>,
}

impl DeviceFactory {
    pub fn new(settings: &GatewaySettings) -> Self {
        Self {
            settings: settings.clone(),
            locks: BusLockRegistry::new(settings.lock_timeout()),
            gpio: Mutex::new(None),
            i2c: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn locks(&self) -> &BusLockRegistry {
        &self.locks
    }

    /// The shared GPIO context, created on first use
    pub fn gpio(&self) -> PinodeResult<GpioContext> {
        let mut slot = self.gpio.lock();
        if let Some(ref gpio) = *slot {
            return Ok(gpio.clone());
        }
        let backend: GpioDriverBackend = self.settings.gpio.backend.parse()?;
        let gpio = GpioContext::new(backend, self.settings.gpio.board_mode)?;
        *slot = Some(gpio.clone());
        Ok(gpio)
    }

    /// The shared handle of I2C bus `number`, created on first use
    pub fn i2c_bus(&self, number: u8) -> PinodeResult<I2cBus> {
        let mut buses = self.i2c.lock();
        if let Some(bus) = buses.get(&number) {
            return Ok(bus.clone());
        }
        let backend: I2cDriverBackend = self.settings.i2c_backend.parse()?;
        let lock = self.locks.lock_for(&format!("i2c-{}", number));
        let bus = I2cBus::new(number, I2cDriver::new(backend, number), lock);
        buses.insert(number, bus.clone());
        Ok(bus)
    }

    /// Build the device `id` described by `config`
    pub fn create(&self, id: &str, config: &DeviceConfig) -> PinodeResult<DeviceDriver> {
        let device = match config.kind.as_str() {
            "gpio_input" => {
                DeviceDriver::GpioInput(GpioInputDevice::from_config(id, config, self.gpio()?)?)
            }
            "gpio_output" => {
                DeviceDriver::GpioOutput(GpioOutputDevice::from_config(id, config, self.gpio()?)?)
            }
            "gpio_pwm" => {
                DeviceDriver::GpioPwm(GpioPwmDevice::from_config(id, config, self.gpio()?)?)
            }
            "bmp085" => {
                let bus = self.i2c_bus(config.i2c_bus.unwrap_or(DEFAULT_I2C_BUS))?;
                let address = config.i2c_address.unwrap_or(bmp085::DEFAULT_ADDRESS);
                bus.with_simulation(|sim| {
                    if !sim.has_device(address) {
                        bmp085::simulate(sim, address);
                    }
                });
                DeviceDriver::Bmp085(Bmp085Device::from_config(id, config, bus)?)
            }
            "bno055" => {
                let bus = self.i2c_bus(config.i2c_bus.unwrap_or(DEFAULT_I2C_BUS))?;
                let address = config.i2c_address.unwrap_or(bno055::DEFAULT_ADDRESS);
                bus.with_simulation(|sim| {
                    if !sim.has_device(address) {
                        bno055::simulate(sim, address, SIMULATED_BNO055_TEMPERATURE);
                    }
                });
                let gpio = match config.pin {
                    Some(_) => Some(self.gpio()?),
                    None => None,
                };
                DeviceDriver::Bno055(Bno055Device::from_config(id, config, bus, gpio)?)
            }
            "camera" => {
                let backend: CameraDriverBackend = config
                    .backend
                    .as_deref()
                    .unwrap_or("simulation")
                    .parse()?;
                let driver = CameraDriver::new(backend, config.device.as_deref());
                DeviceDriver::Camera(CameraDevice::from_config(
                    id,
                    config,
                    &self.settings.home_dir,
                    driver,
                    self.locks.lock_for("camera"),
                )?)
            }
            other => {
                return Err(PinodeError::config(format!(
                    "Device '{}': unknown kind '{}'. Known kinds: {}",
                    id,
                    other,
                    DEVICE_KINDS.join(", ")
                )))
            }
        };
        log::debug!("Created {} device '{}'", config.kind, id);
        Ok(device)
    }
}

/// Build a gateway holding every enabled device of `config`
pub fn build_gateway(
    config: &GatewayConfig,
    publisher: Arc<dyn Publisher>,
) -> PinodeResult<Gateway> {
    let factory = DeviceFactory::new(&config.gateway);
    build_gateway_with(&factory, config, publisher)
}

/// Like [`build_gateway`], reusing the hardware contexts of `factory`
pub fn build_gateway_with(
    factory: &DeviceFactory,
    config: &GatewayConfig,
    publisher: Arc<dyn Publisher>,
) -> PinodeResult<Gateway> {
    config.validate()?;
    let mut gateway = Gateway::new(config.gateway.clone(), publisher);
    for (id, device_config) in config.enabled_devices() {
        let device = factory.create(id, device_config)?;
        gateway.add_device(Box::new(device))?;
    }
    Ok(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinode_core::{BoardMode, Device};

    fn settings() -> GatewaySettings {
        let mut settings = GatewaySettings::default();
        settings.gpio.board_mode = BoardMode::Bcm;
        settings
    }

    #[test]
    fn test_devices_share_bus_handles() {
        let factory = DeviceFactory::new(&settings());
        let a = factory.i2c_bus(1).unwrap();
        let b = factory.i2c_bus(1).unwrap();
        let _guard = a.lock().acquire("a").unwrap();
        assert!(b.lock().is_locked());
        assert!(!factory.i2c_bus(0).unwrap().lock().is_locked());
    }

    #[test]
    fn test_create_each_kind() {
        let factory = DeviceFactory::new(&settings());
        let configs = [
            ("in", DeviceConfig::gpio("gpio_input", 17)),
            ("out", DeviceConfig::gpio("gpio_output", 18)),
            ("fan", DeviceConfig::gpio("gpio_pwm", 12)),
            ("baro", DeviceConfig::new("bmp085")),
            ("imu", DeviceConfig::i2c("bno055", 1, 0x28)),
            ("cam", DeviceConfig::new("camera").with_option("warmup_ms", 0)),
        ];
        for (id, config) in configs.iter() {
            let device = factory.create(id, config).unwrap();
            assert_eq!(device.kind(), config.kind);
            assert_eq!(device.id(), *id);
        }
    }

    #[test]
    fn test_unknown_kind() {
        let factory = DeviceFactory::new(&settings());
        match factory.create("x", &DeviceConfig::new("thermocouple")) {
            Err(PinodeError::Config(msg)) => assert!(msg.contains("gpio_input")),
            other => panic!("unexpected {:?}", other.map(|d| d.kind())),
        }
    }

    #[test]
    fn test_gpio_without_pin() {
        let factory = DeviceFactory::new(&settings());
        assert!(matches!(
            factory.create("in", &DeviceConfig::new("gpio_input")),
            Err(PinodeError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_backend() {
        let mut settings = settings();
        settings.i2c_backend = "bitbang".to_string();
        let factory = DeviceFactory::new(&settings);
        assert!(matches!(
            factory.create("baro", &DeviceConfig::new("bmp085")),
            Err(PinodeError::Config(_))
        ));
    }
}
