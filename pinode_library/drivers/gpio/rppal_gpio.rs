//! Raspberry Pi GPIO driver
//!
//! Uses the rppal crate for direct `/dev/gpiomem` access, hardware-timed
//! software PWM and edge interrupts.
//! Requires the `gpio-hardware` feature.

use std::collections::HashMap;

use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};

use super::{Edge, EdgeCallback, Pull};

fn gpio_err(line: u8, e: rppal::gpio::Error) -> PinodeError {
    PinodeError::driver(format!("GPIO {}: {}", line, e))
}

/// rppal-backed GPIO driver
pub struct RppalGpioDriver {
    status: DriverStatus,
    gpio: Option<Gpio>,
    inputs: HashMap<u8, InputPin>,
    outputs: HashMap<u8, OutputPin>,
}

impl RppalGpioDriver {
    pub fn new() -> Self {
        Self {
            status: DriverStatus::Uninitialized,
            gpio: None,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn init(&mut self) -> PinodeResult<()> {
        let gpio = Gpio::new()
            .map_err(|e| PinodeError::unavailable(format!("Failed to open GPIO: {}", e)))?;
        self.gpio = Some(gpio);
        self.status = DriverStatus::Ready;
        Ok(())
    }

    /// Dropping the pins restores their original mode
    pub fn shutdown(&mut self) -> PinodeResult<()> {
        for pin in self.inputs.values_mut() {
            let _ = pin.clear_async_interrupt();
        }
        self.inputs.clear();
        self.outputs.clear();
        self.gpio = None;
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.gpio.is_some()
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    fn gpio(&self) -> PinodeResult<&Gpio> {
        self.gpio
            .as_ref()
            .ok_or_else(|| PinodeError::driver("GPIO not initialized"))
    }

    pub fn setup_input(&mut self, line: u8, pull: Pull) -> PinodeResult<()> {
        self.outputs.remove(&line);
        let pin = self.gpio()?.get(line).map_err(|e| gpio_err(line, e))?;
        let input = match pull {
            Pull::Off => pin.into_input(),
            Pull::Up => pin.into_input_pullup(),
            Pull::Down => pin.into_input_pulldown(),
        };
        self.inputs.insert(line, input);
        Ok(())
    }

    pub fn setup_output(&mut self, line: u8, initial: bool) -> PinodeResult<()> {
        self.inputs.remove(&line);
        let pin = self.gpio()?.get(line).map_err(|e| gpio_err(line, e))?;
        let mut output = pin.into_output();
        output.write(if initial { Level::High } else { Level::Low });
        self.outputs.insert(line, output);
        Ok(())
    }

    pub fn read_pin(&mut self, line: u8) -> PinodeResult<bool> {
        self.status = DriverStatus::Running;
        if let Some(pin) = self.inputs.get(&line) {
            return Ok(pin.is_high());
        }
        if let Some(pin) = self.outputs.get(&line) {
            return Ok(pin.is_set_high());
        }
        Err(PinodeError::driver(format!("GPIO {} is not set up", line)))
    }

    pub fn write_pin(&mut self, line: u8, level: bool) -> PinodeResult<()> {
        self.status = DriverStatus::Running;
        let pin = self
            .outputs
            .get_mut(&line)
            .ok_or_else(|| PinodeError::driver(format!("GPIO {} is not an output", line)))?;
        if level {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }

    pub fn set_pwm(&mut self, line: u8, frequency: f64, duty: f64) -> PinodeResult<()> {
        let pin = self
            .outputs
            .get_mut(&line)
            .ok_or_else(|| PinodeError::driver(format!("GPIO {} is not an output", line)))?;
        pin.set_pwm_frequency(frequency, duty)
            .map_err(|e| gpio_err(line, e))
    }

    pub fn clear_pwm(&mut self, line: u8) -> PinodeResult<()> {
        match self.outputs.get_mut(&line) {
            Some(pin) => {
                pin.clear_pwm().map_err(|e| gpio_err(line, e))?;
                pin.set_low();
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn set_interrupt(
        &mut self,
        line: u8,
        edge: Edge,
        callback: EdgeCallback,
    ) -> PinodeResult<()> {
        let pin = self
            .inputs
            .get_mut(&line)
            .ok_or_else(|| PinodeError::driver(format!("GPIO {} is not an input", line)))?;
        let trigger = match edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
            Edge::Both => Trigger::Both,
        };
        pin.set_async_interrupt(trigger, move |level| {
            callback(matches!(level, Level::High));
        })
        .map_err(|e| gpio_err(line, e))
    }

    pub fn clear_interrupt(&mut self, line: u8) -> PinodeResult<()> {
        match self.inputs.get_mut(&line) {
            Some(pin) => pin.clear_async_interrupt().map_err(|e| gpio_err(line, e)),
            None => Ok(()),
        }
    }

    pub fn release_pin(&mut self, line: u8) -> PinodeResult<()> {
        if let Some(mut pin) = self.inputs.remove(&line) {
            let _ = pin.clear_async_interrupt();
        }
        self.outputs.remove(&line);
        Ok(())
    }
}

impl Default for RppalGpioDriver {
    fn default() -> Self {
        Self::new()
    }
}
