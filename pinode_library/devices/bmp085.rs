//! BMP085 / BMP180 barometer
//!
//! Every reading is one bus transaction: the compensation needs a fresh raw
//! temperature, so pressure derived values (altitude, sea-level pressure)
//! trigger both conversions.

use std::sync::Arc;
use std::time::Duration;

use pinode_core::{
    AcquisitionState, Capabilities, Device, DeviceConfig, EventSink, PinodeError, PinodeResult,
    Value, ValueDescriptor, ValueRegistry, ValueType,
};

use crate::drivers::barometer::bmp085::{self, Bmp085Driver, Bmp085Mode, SEA_LEVEL_PA};
use crate::drivers::bus::I2cBus;

/// Default poll period of the environmental readings
pub const DEFAULT_POLL: Duration = Duration::from_secs(300);

pub struct Bmp085Device {
    id: String,
    bus: I2cBus,
    driver: Bmp085Driver,
    /// Reference pressure for `altitude`, Pa
    sealevel_pa: f64,
    /// Station altitude for `sealevel_pressure`, m
    altitude_m: f64,
    state: AcquisitionState,
    registry: Arc<ValueRegistry<Self>>,
}

impl Bmp085Device {
    pub fn new(id: &str, bus: I2cBus, address: u8) -> Self {
        Self {
            id: id.to_string(),
            bus,
            driver: Bmp085Driver::new(address, Bmp085Mode::default()),
            sealevel_pa: SEA_LEVEL_PA,
            altitude_m: 0.0,
            state: AcquisitionState::Closed,
            registry: Arc::new(Self::values()),
        }
    }

    pub fn from_config(id: &str, config: &DeviceConfig, bus: I2cBus) -> PinodeResult<Self> {
        let address = config.i2c_address.unwrap_or(bmp085::DEFAULT_ADDRESS);
        let mut device = Self::new(id, bus, address);

        let registry =
            Self::values().with_poll_intervals(|name, default| config.poll_interval(name, default));
        let statics = [
            ("mode", config.get_option_i64("mode").map(Value::Int)),
            ("sealevel_pa", config.get_option_f64("sealevel_pa").map(Value::Float)),
            ("altitude_m", config.get_option_f64("altitude_m").map(Value::Float)),
        ];
        for (name, value) in statics {
            if let Some(value) = value {
                registry
                    .write(&mut device, name, value)
                    .map_err(|e| PinodeError::config(format!("{}: {}", id, e)))?;
            }
        }
        device.registry = Arc::new(registry);
        Ok(device)
    }

    pub fn address(&self) -> u8 {
        self.driver.address()
    }

    pub fn mode(&self) -> Bmp085Mode {
        self.driver.mode()
    }

    fn temperature(&self) -> PinodeResult<f64> {
        let driver = &self.driver;
        self.bus
            .transaction(&self.id, driver.address(), |tx| driver.read_temperature(tx))
    }

    fn pressure(&self) -> PinodeResult<i64> {
        let driver = &self.driver;
        self.bus
            .transaction(&self.id, driver.address(), |tx| driver.read_pressure(tx))
    }

    fn values() -> ValueRegistry<Self> {
        ValueRegistry::new()
            .sensor(
                ValueDescriptor::sensor("temperature", ValueType::float())
                    .with_label("Temperature")
                    .with_help("Temperature in °C")
                    .with_poll(DEFAULT_POLL),
                |d: &mut Self| Ok(Value::Float(d.temperature()?)),
            )
            .sensor(
                ValueDescriptor::sensor("pressure", ValueType::int())
                    .with_label("Pressure")
                    .with_help("Pressure in Pa")
                    .with_poll(DEFAULT_POLL),
                |d: &mut Self| Ok(Value::Int(d.pressure()?)),
            )
            .sensor(
                ValueDescriptor::sensor("altitude", ValueType::float())
                    .with_label("Altitude")
                    .with_help("Altitude in m, relative to the configured sea-level pressure")
                    .with_poll(DEFAULT_POLL),
                |d: &mut Self| {
                    let pressure = d.pressure()? as f64;
                    Ok(Value::Float(bmp085::altitude(pressure, d.sealevel_pa)))
                },
            )
            .sensor(
                ValueDescriptor::sensor("sealevel_pressure", ValueType::float())
                    .with_label("Sea-level pressure")
                    .with_help("Pressure in Pa reduced to sea level from the configured altitude")
                    .with_poll(DEFAULT_POLL),
                |d: &mut Self| {
                    let pressure = d.pressure()? as f64;
                    Ok(Value::Float(bmp085::sealevel_pressure(pressure, d.altitude_m)))
                },
            )
            .config(
                ValueDescriptor::config("mode", ValueType::int_range(0, 3))
                    .with_help("Oversampling: 0 ultra low power .. 3 ultra high resolution")
                    .with_default(Bmp085Mode::default().oss() as i64),
                |d: &mut Self| Ok(Value::Int(d.driver.mode().oss() as i64)),
                |d: &mut Self, v| {
                    let mode = Bmp085Mode::from_index(v.as_i64().unwrap_or_default())?;
                    d.driver.set_mode(mode);
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("sealevel_pa", ValueType::float_range(30_000.0, 120_000.0))
                    .with_help("Sea-level reference pressure in Pa")
                    .with_default(SEA_LEVEL_PA),
                |d: &mut Self| Ok(Value::Float(d.sealevel_pa)),
                |d: &mut Self, v| {
                    d.sealevel_pa = v.as_f64().unwrap_or(SEA_LEVEL_PA);
                    Ok(())
                },
            )
            .config(
                ValueDescriptor::config("altitude_m", ValueType::float_range(-500.0, 9_000.0))
                    .with_help("Station altitude in m")
                    .with_default(0.0),
                |d: &mut Self| Ok(Value::Float(d.altitude_m)),
                |d: &mut Self, v| {
                    d.altitude_m = v.as_f64().unwrap_or_default();
                    Ok(())
                },
            )
    }
}

impl Device for Bmp085Device {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "bmp085"
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
        let address = self.driver.address();
        let driver = &mut self.driver;
        self.bus
            .transaction(&self.id, address, |tx| driver.probe(tx))
            .map_err(PinodeError::into_unavailable)?;
        log::info!(
            "{}: BMP085 on bus {} at 0x{:02x}",
            self.id,
            self.bus.number(),
            address
        );
        self.state = AcquisitionState::Free;
        Ok(())
    }

    fn close(&mut self) -> PinodeResult<()> {
        self.state = AcquisitionState::Closed;
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pinode_core::BusLock;

    fn bus() -> I2cBus {
        let bus = I2cBus::simulation(1, BusLock::new("i2c-1", Duration::from_millis(100)));
        bus.with_simulation(|sim| bmp085::simulate(sim, bmp085::DEFAULT_ADDRESS));
        bus
    }

    fn opened(bus: I2cBus) -> Bmp085Device {
        let mut device = Bmp085Device::new("bmp", bus, bmp085::DEFAULT_ADDRESS);
        device.open(EventSink::detached("bmp")).unwrap();
        device
    }

    #[test]
    fn test_readings() {
        let mut device = opened(bus());
        assert_eq!(device.read("temperature").unwrap(), Value::Float(15.0));
        assert_eq!(device.read("pressure").unwrap(), Value::Int(69962));

        device.write("mode", Value::Int(0)).unwrap();
        assert_eq!(device.read("pressure").unwrap(), Value::Int(69964));

        let altitude = device.read("altitude").unwrap().as_f64().unwrap();
        assert_relative_eq!(altitude, 3016.66, epsilon = 0.5);

        device.write("altitude_m", Value::Float(0.0)).unwrap();
        let sealevel = device.read("sealevel_pressure").unwrap().as_f64().unwrap();
        assert_relative_eq!(sealevel, 69964.0, epsilon = 0.01);
        assert!(device.check_heartbeat());
    }

    #[test]
    fn test_invalid_mode_keeps_previous() {
        let mut device = opened(bus());
        let err = device.write("mode", Value::Int(4)).unwrap_err();
        assert!(matches!(err, PinodeError::InvalidValue { .. }));
        assert_eq!(device.read("mode").unwrap(), Value::Int(1));
        assert_eq!(device.mode(), Bmp085Mode::Standard);
    }

    #[test]
    fn test_malformed_raw_word_fails_then_recovers() {
        let bus = bus();
        let mut device = opened(bus.clone());
        let answer_temperature = |msb: u8, lsb: u8| {
            // control register 0xF4, temperature command 0x2E, data at 0xF6
            bus.with_simulation(|sim| {
                sim.on_write(bmp085::DEFAULT_ADDRESS, 0xF4, 0x2E, &[(0xF6, msb), (0xF7, lsb)])
            });
        };

        // Zeroes the X1 + MD divisor with the simulated calibration
        answer_temperature(0x4F, 0x3D);
        assert!(matches!(
            device.read("temperature"),
            Err(PinodeError::ReadError { .. })
        ));
        assert!(matches!(
            device.read("pressure"),
            Err(PinodeError::ReadError { .. })
        ));

        answer_temperature(0x6C, 0xFA);
        assert_eq!(device.read("temperature").unwrap(), Value::Float(15.0));
        assert_eq!(device.read("pressure").unwrap(), Value::Int(69962));
    }

    #[test]
    fn test_static_options_are_validated() {
        let config = DeviceConfig::new("bmp085")
            .with_option("sealevel_pa", 0.0)
            .with_option("altitude_m", 120.0);
        let err = Bmp085Device::from_config("baro", &config, bus()).err().unwrap();
        assert!(matches!(err, PinodeError::Config(_)));
        assert!(err.to_string().contains("sealevel_pa"));

        let config = DeviceConfig::new("bmp085").with_option("mode", 7);
        assert!(matches!(
            Bmp085Device::from_config("baro", &config, bus()),
            Err(PinodeError::Config(_))
        ));

        let config = DeviceConfig::new("bmp085")
            .with_option("mode", 3)
            .with_option("sealevel_pa", 100_000.0)
            .with_option("altitude_m", 120);
        let mut device = Bmp085Device::from_config("baro", &config, bus()).unwrap();
        assert_eq!(device.mode(), Bmp085Mode::UltraHighRes);
        device.open(EventSink::detached("baro")).unwrap();
        assert_eq!(device.read("sealevel_pa").unwrap(), Value::Float(100_000.0));
        assert_eq!(device.read("altitude_m").unwrap(), Value::Float(120.0));
        let altitude = device.read("altitude").unwrap().as_f64().unwrap();
        assert!(altitude.is_finite());
    }

    #[test]
    fn test_absent_chip_is_unavailable() {
        let bus = I2cBus::simulation(1, BusLock::new("i2c-1", Duration::from_millis(100)));
        let mut device = Bmp085Device::new("bmp", bus, bmp085::DEFAULT_ADDRESS);
        let err = device.open(EventSink::detached("bmp")).unwrap_err();
        assert!(matches!(err, PinodeError::ResourceUnavailable(_)));
        assert!(!device.is_open());
    }

    #[test]
    fn test_read_fails_while_bus_held() {
        let bus = bus();
        let mut device = opened(bus.clone());
        let _held = bus.lock().acquire("other").unwrap();
        let err = device.read("temperature").unwrap_err();
        assert!(matches!(err, PinodeError::ResourceUnavailable(_)));
    }

    #[test]
    fn test_chip_removed_after_open() {
        let bus = bus();
        let mut device = opened(bus.clone());
        bus.with_simulation(|sim| sim.remove_device(bmp085::DEFAULT_ADDRESS));
        let err = device.read("pressure").unwrap_err();
        assert!(matches!(err, PinodeError::ResourceUnavailable(_)));
        assert!(!device.check_heartbeat());
    }
}
