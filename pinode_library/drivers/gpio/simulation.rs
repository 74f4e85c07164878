//! Simulation GPIO driver
//!
//! Pins live in a shared in-memory chip. Tests drive inputs through a
//! [`SimulatedChip`] handle; edge callbacks fire on the caller's thread,
//! outside the chip lock, so they may call back into the driver.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};

use super::{Edge, EdgeCallback, Pull};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SimulatedMode {
    Input(Pull),
    Output,
}

#[derive(Clone)]
struct SimulatedPin {
    mode: SimulatedMode,
    level: bool,
    /// (frequency Hz, duty fraction)
    pwm: Option<(f64, f64)>,
    interrupt: Option<(Edge, EdgeCallback)>,
}

#[derive(Default)]
struct ChipState {
    pins: HashMap<u8, SimulatedPin>,
    /// Lines claimed by something outside the gateway
    reserved: HashSet<u8>,
    cleanups: u32,
}

/// Handle onto the simulated pin state, shareable with tests
#[derive(Clone, Default)]
pub struct SimulatedChip {
    state: Arc<Mutex<ChipState>>,
}

impl SimulatedChip {
    /// Drive an input line to `level`. A registered interrupt whose edge
    /// matches the transition is invoked with the new level.
    pub fn set_input_level(&self, line: u8, level: bool) {
        let callback = {
            let mut state = self.state.lock();
            let Some(pin) = state.pins.get_mut(&line) else {
                log::debug!("Simulated line {} is not configured", line);
                return;
            };
            if !matches!(pin.mode, SimulatedMode::Input(_)) || pin.level == level {
                pin.level = level;
                return;
            }
            pin.level = level;
            pin.interrupt
                .as_ref()
                .filter(|(edge, _)| edge.matches(level))
                .map(|(_, cb)| Arc::clone(cb))
        };
        if let Some(cb) = callback {
            cb(level);
        }
    }

    pub fn level(&self, line: u8) -> Option<bool> {
        self.state.lock().pins.get(&line).map(|p| p.level)
    }

    pub fn mode(&self, line: u8) -> Option<SimulatedMode> {
        self.state.lock().pins.get(&line).map(|p| p.mode)
    }

    /// Active PWM as (frequency Hz, duty fraction)
    pub fn pwm(&self, line: u8) -> Option<(f64, f64)> {
        self.state.lock().pins.get(&line).and_then(|p| p.pwm)
    }

    pub fn has_interrupt(&self, line: u8) -> bool {
        self.state
            .lock()
            .pins
            .get(&line)
            .map_or(false, |p| p.interrupt.is_some())
    }

    /// Mark a line as claimed elsewhere; setting it up fails until released
    pub fn reserve(&self, line: u8) {
        self.state.lock().reserved.insert(line);
    }

    pub fn unreserve(&self, line: u8) {
        self.state.lock().reserved.remove(&line);
    }

    /// How many times the backend was cleaned up
    pub fn cleanup_count(&self) -> u32 {
        self.state.lock().cleanups
    }
}

/// Simulation GPIO driver
pub struct SimulationGpioDriver {
    status: DriverStatus,
    chip: SimulatedChip,
}

impl SimulationGpioDriver {
    pub fn new() -> Self {
        Self {
            status: DriverStatus::Uninitialized,
            chip: SimulatedChip::default(),
        }
    }

    pub fn chip(&self) -> SimulatedChip {
        self.chip.clone()
    }

    pub fn init(&mut self) -> PinodeResult<()> {
        self.status = DriverStatus::Ready;
        Ok(())
    }

    /// Release every pin, like `GPIO.cleanup()`
    pub fn shutdown(&mut self) -> PinodeResult<()> {
        let mut state = self.chip.state.lock();
        state.pins.clear();
        state.cleanups += 1;
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        true
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    fn check_ready(&self) -> PinodeResult<()> {
        if !matches!(self.status, DriverStatus::Ready | DriverStatus::Running) {
            return Err(PinodeError::driver("Driver not initialized"));
        }
        Ok(())
    }

    fn check_free(&self, line: u8) -> PinodeResult<()> {
        if self.chip.state.lock().reserved.contains(&line) {
            return Err(PinodeError::unavailable(format!("GPIO {} is busy", line)));
        }
        Ok(())
    }

    pub fn setup_input(&mut self, line: u8, pull: Pull) -> PinodeResult<()> {
        self.check_ready()?;
        self.check_free(line)?;
        let level = matches!(pull, Pull::Up);
        self.chip.state.lock().pins.insert(
            line,
            SimulatedPin {
                mode: SimulatedMode::Input(pull),
                level,
                pwm: None,
                interrupt: None,
            },
        );
        Ok(())
    }

    pub fn setup_output(&mut self, line: u8, initial: bool) -> PinodeResult<()> {
        self.check_ready()?;
        self.check_free(line)?;
        self.chip.state.lock().pins.insert(
            line,
            SimulatedPin {
                mode: SimulatedMode::Output,
                level: initial,
                pwm: None,
                interrupt: None,
            },
        );
        Ok(())
    }

    pub fn read_pin(&mut self, line: u8) -> PinodeResult<bool> {
        self.check_ready()?;
        self.status = DriverStatus::Running;
        self.chip
            .level(line)
            .ok_or_else(|| PinodeError::driver(format!("GPIO {} is not set up", line)))
    }

    pub fn write_pin(&mut self, line: u8, level: bool) -> PinodeResult<()> {
        self.check_ready()?;
        self.status = DriverStatus::Running;
        let mut state = self.chip.state.lock();
        match state.pins.get_mut(&line) {
            Some(pin) if pin.mode == SimulatedMode::Output => {
                pin.level = level;
                Ok(())
            }
            Some(_) => Err(PinodeError::driver(format!(
                "GPIO {} is not an output",
                line
            ))),
            None => Err(PinodeError::driver(format!("GPIO {} is not set up", line))),
        }
    }

    pub fn set_pwm(&mut self, line: u8, frequency: f64, duty: f64) -> PinodeResult<()> {
        self.check_ready()?;
        let mut state = self.chip.state.lock();
        match state.pins.get_mut(&line) {
            Some(pin) if pin.mode == SimulatedMode::Output => {
                pin.pwm = Some((frequency, duty));
                Ok(())
            }
            _ => Err(PinodeError::driver(format!(
                "GPIO {} is not an output",
                line
            ))),
        }
    }

    pub fn clear_pwm(&mut self, line: u8) -> PinodeResult<()> {
        self.check_ready()?;
        if let Some(pin) = self.chip.state.lock().pins.get_mut(&line) {
            pin.pwm = None;
            pin.level = false;
        }
        Ok(())
    }

    pub fn set_interrupt(
        &mut self,
        line: u8,
        edge: Edge,
        callback: EdgeCallback,
    ) -> PinodeResult<()> {
        self.check_ready()?;
        let mut state = self.chip.state.lock();
        match state.pins.get_mut(&line) {
            Some(pin) if matches!(pin.mode, SimulatedMode::Input(_)) => {
                pin.interrupt = Some((edge, callback));
                Ok(())
            }
            _ => Err(PinodeError::driver(format!(
                "GPIO {} is not an input",
                line
            ))),
        }
    }

    pub fn clear_interrupt(&mut self, line: u8) -> PinodeResult<()> {
        if let Some(pin) = self.chip.state.lock().pins.get_mut(&line) {
            pin.interrupt = None;
        }
        Ok(())
    }

    pub fn release_pin(&mut self, line: u8) -> PinodeResult<()> {
        self.chip.state.lock().pins.remove(&line);
        Ok(())
    }
}

impl Default for SimulationGpioDriver {
    fn default() -> Self {
        Self::new()
    }
}
