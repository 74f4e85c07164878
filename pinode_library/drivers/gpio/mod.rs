//! GPIO drivers
//!
//! # Available Drivers
//!
//! - `SimulationGpioDriver` - Always available, in-memory pins
//! - `RppalGpioDriver` - Raspberry Pi via rppal (requires `gpio-hardware` feature)
//!
//! Every GPIO device shares one driver through a [`GpioContext`], which also
//! owns the pin numbering mode and the one-time cleanup.

mod context;
mod simulation;

#[cfg(feature = "gpio-hardware")]
mod rppal_gpio;

pub use context::{GpioContext, BOARD_TO_BCM};
pub use simulation::{SimulatedChip, SimulatedMode, SimulationGpioDriver};

#[cfg(feature = "gpio-hardware")]
pub use rppal_gpio::RppalGpioDriver;

use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Called with the new level after a matching edge
pub type EdgeCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Input pull resistor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    #[default]
    Off,
    Up,
    Down,
}

impl Pull {
    pub const NAMES: [&'static str; 3] = ["off", "up", "down"];
}

impl FromStr for Pull {
    type Err = PinodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(PinodeError::invalid("pull", format!("unknown pull '{}'", other))),
        }
    }
}

impl fmt::Display for Pull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Edge detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Rising,
    Falling,
    #[default]
    Both,
}

impl Edge {
    pub const NAMES: [&'static str; 3] = ["rising", "falling", "both"];

    /// Whether a transition to `level` is an edge of this kind
    pub fn matches(&self, level: bool) -> bool {
        match self {
            Self::Rising => level,
            Self::Falling => !level,
            Self::Both => true,
        }
    }
}

impl FromStr for Edge {
    type Err = PinodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rising" => Ok(Self::Rising),
            "falling" => Ok(Self::Falling),
            "both" => Ok(Self::Both),
            other => Err(PinodeError::invalid("edge", format!("unknown edge '{}'", other))),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
            Self::Both => write!(f, "both"),
        }
    }
}

// ============================================================================
// GPIO Driver
// ============================================================================

/// GPIO driver backend selection
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GpioDriverBackend {
    #[default]
    Simulation,
    #[cfg(feature = "gpio-hardware")]
    Rppal,
}

impl GpioDriverBackend {
    /// Backend names compiled into this build
    pub fn available() -> Vec<&'static str> {
        let mut names = vec!["simulation"];
        if cfg!(feature = "gpio-hardware") {
            names.push("rppal");
        }
        names
    }
}

impl FromStr for GpioDriverBackend {
    type Err = PinodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" | "sim" => Ok(Self::Simulation),
            #[cfg(feature = "gpio-hardware")]
            "rppal" | "raspberry-pi" => Ok(Self::Rppal),
            #[cfg(not(feature = "gpio-hardware"))]
            "rppal" | "raspberry-pi" => Err(PinodeError::FeatureNotAvailable(
                "GPIO backend 'rppal' requires the 'gpio-hardware' feature".to_string(),
            )),
            other => Err(PinodeError::config(format!(
                "Unknown GPIO backend '{}'. Available: {}",
                other,
                Self::available().join(", ")
            ))),
        }
    }
}

/// Type-erased GPIO driver
pub enum GpioDriver {
    Simulation(SimulationGpioDriver),
    #[cfg(feature = "gpio-hardware")]
    Rppal(RppalGpioDriver),
}

impl GpioDriver {
    pub fn new(backend: GpioDriverBackend) -> Self {
        match backend {
            GpioDriverBackend::Simulation => Self::Simulation(SimulationGpioDriver::new()),
            #[cfg(feature = "gpio-hardware")]
            GpioDriverBackend::Rppal => Self::Rppal(RppalGpioDriver::new()),
        }
    }

    pub fn simulation() -> Self {
        Self::Simulation(SimulationGpioDriver::new())
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.init(),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.init(),
        }
    }

    pub fn shutdown(&mut self) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.shutdown(),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.shutdown(),
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::Simulation(d) => d.is_available(),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.is_available(),
        }
    }

    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Simulation(d) => d.status(),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.status(),
        }
    }

    // ========================================================================
    // Pin methods
    // ========================================================================

    pub fn setup_input(&mut self, line: u8, pull: Pull) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.setup_input(line, pull),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.setup_input(line, pull),
        }
    }

    pub fn setup_output(&mut self, line: u8, initial: bool) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.setup_output(line, initial),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.setup_output(line, initial),
        }
    }

    pub fn read_pin(&mut self, line: u8) -> PinodeResult<bool> {
        match self {
            Self::Simulation(d) => d.read_pin(line),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.read_pin(line),
        }
    }

    pub fn write_pin(&mut self, line: u8, level: bool) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.write_pin(line, level),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.write_pin(line, level),
        }
    }

    /// Software PWM; `duty` is a fraction in 0.0..=1.0
    pub fn set_pwm(&mut self, line: u8, frequency: f64, duty: f64) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.set_pwm(line, frequency, duty),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.set_pwm(line, frequency, duty),
        }
    }

    pub fn clear_pwm(&mut self, line: u8) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.clear_pwm(line),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.clear_pwm(line),
        }
    }

    pub fn set_interrupt(
        &mut self,
        line: u8,
        edge: Edge,
        callback: EdgeCallback,
    ) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.set_interrupt(line, edge, callback),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.set_interrupt(line, edge, callback),
        }
    }

    pub fn clear_interrupt(&mut self, line: u8) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.clear_interrupt(line),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.clear_interrupt(line),
        }
    }

    pub fn release_pin(&mut self, line: u8) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.release_pin(line),
            #[cfg(feature = "gpio-hardware")]
            Self::Rppal(d) => d.release_pin(line),
        }
    }
}
