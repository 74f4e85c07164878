//! GPIO software PWM
//!
//! `frequency` and `duty_cycle` may change while the output is switched on;
//! the new settings apply immediately.

use std::sync::Arc;

use pinode_core::{
    AcquisitionState, Capabilities, Device, DeviceConfig, EventSink, PinodeError, PinodeResult,
    Value, ValueDescriptor, ValueRegistry, ValueType,
};

use crate::drivers::gpio::GpioContext;

pub const DEFAULT_FREQUENCY: f64 = 50.0;
pub const MIN_FREQUENCY: f64 = 0.1;
pub const MAX_FREQUENCY: f64 = 10_000.0;

pub struct GpioPwmDevice {
    id: String,
    gpio: GpioContext,
    line: u8,
    frequency: f64,
    /// Percent, 0..=100
    duty_cycle: f64,
    running: bool,
    state: AcquisitionState,
    registry: Arc<ValueRegistry<Self>>,
}

impl GpioPwmDevice {
    pub fn new(id: &str, gpio: GpioContext, pin: u8) -> PinodeResult<Self> {
        let line = gpio.resolve(pin)?;
        Ok(Self {
            id: id.to_string(),
            gpio,
            line,
            frequency: DEFAULT_FREQUENCY,
            duty_cycle: 0.0,
            running: false,
            state: AcquisitionState::Closed,
            registry: Arc::new(Self::values()),
        })
    }

    pub fn from_config(id: &str, config: &DeviceConfig, gpio: GpioContext) -> PinodeResult<Self> {
        let mut device = Self::new(id, gpio, config.require_pin(id)?)?;
        let registry = Self::values()
            .with_poll_intervals(|name, default| config.poll_interval(name, default));

        // Static settings go through the same checks as runtime writes
        if let Some(frequency) = config.get_option_f64("frequency") {
            let checked = registry
                .descriptor("frequency")
                .map(|d| d.validate(Value::Float(frequency)))
                .transpose()
                .map_err(|e| PinodeError::config(e.to_string()))?;
            device.frequency = checked.and_then(|v| v.as_f64()).unwrap_or(frequency);
        }
        if let Some(duty) = config.get_option_f64("duty_cycle") {
            let checked = registry
                .descriptor("duty_cycle")
                .map(|d| d.validate(Value::Float(duty)))
                .transpose()
                .map_err(|e| PinodeError::config(e.to_string()))?;
            device.duty_cycle = checked.and_then(|v| v.as_f64()).unwrap_or(duty);
        }
        device.registry = Arc::new(registry);
        Ok(device)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn line(&self) -> u8 {
        self.line
    }

    fn apply(&mut self) -> PinodeResult<()> {
        if !self.running {
            return Ok(());
        }
        let (line, frequency, duty) = (self.line, self.frequency, self.duty_cycle / 100.0);
        self.gpio.with_driver(|g| g.set_pwm(line, frequency, duty))
    }

    fn switch(&mut self, on: bool) -> PinodeResult<()> {
        let line = self.line;
        if on {
            self.running = true;
            if let Err(e) = self.apply() {
                self.running = false;
                return Err(e);
            }
        } else {
            self.gpio.with_driver(|g| g.clear_pwm(line))?;
            self.running = false;
        }
        log::debug!("{}: PWM {}", self.id, if on { "on" } else { "off" });
        Ok(())
    }

    fn values() -> ValueRegistry<Self> {
        ValueRegistry::new()
            .config(
                ValueDescriptor::config(
                    "frequency",
                    ValueType::float_range(MIN_FREQUENCY, MAX_FREQUENCY),
                )
                .with_label("Frequency")
                .with_help("PWM frequency in Hz")
                .with_default(DEFAULT_FREQUENCY),
                |d: &mut Self| Ok(Value::Float(d.frequency)),
                |d: &mut Self, v| {
                    let previous = d.frequency;
                    d.frequency = v.as_f64().unwrap_or(previous);
                    d.apply().map_err(|e| {
                        d.frequency = previous;
                        e
                    })
                },
            )
            .config(
                ValueDescriptor::config("duty_cycle", ValueType::float_range(0.0, 100.0))
                    .with_label("Duty cycle")
                    .with_help("Percentage of each period the output is high")
                    .with_default(0.0),
                |d: &mut Self| Ok(Value::Float(d.duty_cycle)),
                |d: &mut Self, v| {
                    let previous = d.duty_cycle;
                    d.duty_cycle = v.as_f64().unwrap_or(previous);
                    d.apply().map_err(|e| {
                        d.duty_cycle = previous;
                        e
                    })
                },
            )
            .action(
                ValueDescriptor::action("switch", ValueType::enumeration(&["on", "off"]))
                    .with_help("Start or stop the PWM output"),
                |d: &mut Self, payload| {
                    let on = match payload.as_ref().and_then(|p| p.as_str()) {
                        Some(name) => name.eq_ignore_ascii_case("on"),
                        None => !d.running,
                    };
                    d.switch(on)?;
                    Ok(Some(Value::Enum(if on { "on" } else { "off" }.to_string())))
                },
            )
    }
}

impl Device for GpioPwmDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "gpio_pwm"
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
        let line = self.line;
        self.gpio
            .with_driver(|g| g.setup_output(line, false))
            .map_err(PinodeError::into_unavailable)?;
        self.running = false;
        self.state = AcquisitionState::Free;
        Ok(())
    }

    fn close(&mut self) -> PinodeResult<()> {
        if self.state.is_open() {
            let line = self.line;
            if let Err(e) = self.gpio.with_driver(|g| {
                g.clear_pwm(line)?;
                g.release_pin(line)
            }) {
                log::warn!("{}: releasing GPIO {} failed: {}", self.id, line, e);
            }
            self.running = false;
            self.state = AcquisitionState::Closed;
        }
        Ok(())
    }

    registry_values!();
}
