//! GPIO output

use std::sync::Arc;

use pinode_core::{
    AcquisitionState, Capabilities, Device, DeviceConfig, EventSink, PinodeError, PinodeResult,
    Value, ValueDescriptor, ValueRegistry, ValueType,
};

use crate::drivers::gpio::GpioContext;

pub struct GpioOutputDevice {
    id: String,
    gpio: GpioContext,
    line: u8,
    level: bool,
    state: AcquisitionState,
    registry: Arc<ValueRegistry<Self>>,
}

impl GpioOutputDevice {
    pub fn new(id: &str, gpio: GpioContext, pin: u8) -> PinodeResult<Self> {
        let line = gpio.resolve(pin)?;
        Ok(Self {
            id: id.to_string(),
            gpio,
            line,
            level: false,
            state: AcquisitionState::Closed,
            registry: Arc::new(Self::values()),
        })
    }

    pub fn from_config(id: &str, config: &DeviceConfig, gpio: GpioContext) -> PinodeResult<Self> {
        let mut device = Self::new(id, gpio, config.require_pin(id)?)?;
        device.level = config.get_option_bool("state").unwrap_or(false);
        device.registry = Arc::new(
            Self::values().with_poll_intervals(|name, default| config.poll_interval(name, default)),
        );
        Ok(device)
    }

    /// Level driven when the device opens
    pub fn with_initial(mut self, level: bool) -> Self {
        self.level = level;
        self
    }

    pub fn line(&self) -> u8 {
        self.line
    }

    fn values() -> ValueRegistry<Self> {
        ValueRegistry::new()
            .config(
                ValueDescriptor::config("state", ValueType::Bool)
                    .with_label("State")
                    .with_help("Drive the pin high (true) or low (false)")
                    .with_default(false),
                |d: &mut Self| Ok(Value::Bool(d.level)),
                |d: &mut Self, v| {
                    let level = v.as_bool().unwrap_or_default();
                    let line = d.line;
                    d.gpio.with_driver(|g| g.write_pin(line, level))?;
                    d.level = level;
                    Ok(())
                },
            )
            .sensor(
                ValueDescriptor::sensor("level", ValueType::Bool)
                    .with_help("Level read back from the pin"),
                |d: &mut Self| {
                    let line = d.line;
                    let level = d.gpio.with_driver(|g| g.read_pin(line))?;
                    Ok(Value::Bool(level))
                },
            )
    }
}

impl Device for GpioOutputDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "gpio_output"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::actuator()
    }

    fn state(&self) -> AcquisitionState {
        self.state
    }

    fn open(&mut self, _events: EventSink) -> PinodeResult<()> {
        if self.state.is_open() {
            return Ok(());
        }
        let (line, level) = (self.line, self.level);
        self.gpio
            .with_driver(|g| g.setup_output(line, level))
            .map_err(PinodeError::into_unavailable)?;
        self.state = AcquisitionState::Free;
        Ok(())
    }

    fn close(&mut self) -> PinodeResult<()> {
        if self.state.is_open() {
            let line = self.line;
            if let Err(e) = self.gpio.with_driver(|g| g.release_pin(line)) {
                log::warn!("{}: releasing GPIO {} failed: {}", self.id, line, e);
            }
            self.state = AcquisitionState::Closed;
        }
        Ok(())
    }

    registry_values!();
}
