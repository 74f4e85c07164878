//! Camera drivers
//!
//! # Available Drivers
//!
//! - `SimulationCameraDriver` - Always available, generates synthetic JPEG frames
//! - `V4l2CameraDriver` - Video4Linux2 camera (requires `v4l2-backend` feature)
//!
//! Above the drivers sits [`CameraSession`], the state machine that owns the
//! camera lock for the duration of a capture, recording or stream.

mod session;
mod simulation;
mod stream;

#[cfg(feature = "v4l2-backend")]
mod v4l2;

pub use session::{CameraSession, CameraState};
pub use simulation::{SimulationCameraConfig, SimulationCameraDriver};
pub use stream::StreamTarget;

#[cfg(feature = "v4l2-backend")]
pub use v4l2::{V4l2CameraConfig, V4l2CameraDriver};

use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};
use std::str::FromStr;
use std::time::Duration;

/// Options applied when the preview starts
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSettings {
    pub led: bool,
    pub hflip: bool,
    pub vflip: bool,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            led: true,
            hflip: false,
            vflip: false,
        }
    }
}

/// Camera driver backend selection
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CameraDriverBackend {
    /// Simulation driver (always available)
    #[default]
    Simulation,
    /// Video4Linux2 backend
    #[cfg(feature = "v4l2-backend")]
    V4l2,
}

impl CameraDriverBackend {
    /// Backend names compiled into this build
    pub fn available() -> Vec<&'static str> {
        let mut names = vec!["simulation"];
        if cfg!(feature = "v4l2-backend") {
            names.push("v4l2");
        }
        names
    }
}

impl FromStr for CameraDriverBackend {
    type Err = PinodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" | "sim" => Ok(Self::Simulation),
            #[cfg(feature = "v4l2-backend")]
            "v4l2" => Ok(Self::V4l2),
            #[cfg(not(feature = "v4l2-backend"))]
            "v4l2" => Err(PinodeError::FeatureNotAvailable(
                "Camera backend 'v4l2' requires the 'v4l2-backend' feature".to_string(),
            )),
            other => Err(PinodeError::config(format!(
                "Unknown camera backend '{}'. Available: {}",
                other,
                Self::available().join(", ")
            ))),
        }
    }
}

/// Type-erased camera driver for runtime backend selection
pub enum CameraDriver {
    Simulation(SimulationCameraDriver),
    #[cfg(feature = "v4l2-backend")]
    V4l2(V4l2CameraDriver),
}

impl CameraDriver {
    /// Create a driver; `device` is the V4L2 device path, ignored by simulation
    pub fn new(backend: CameraDriverBackend, device: Option<&str>) -> Self {
        let _ = device;
        match backend {
            CameraDriverBackend::Simulation => Self::Simulation(SimulationCameraDriver::new()),
            #[cfg(feature = "v4l2-backend")]
            CameraDriverBackend::V4l2 => {
                let mut config = V4l2CameraConfig::default();
                if let Some(path) = device {
                    config.device_path = path.to_string();
                }
                Self::V4l2(V4l2CameraDriver::with_config(config))
            }
        }
    }

    pub fn simulation() -> Self {
        Self::Simulation(SimulationCameraDriver::new())
    }

    /// Pause between streamed frames
    pub fn frame_interval(&self) -> Duration {
        match self {
            Self::Simulation(d) => Duration::from_secs_f32(1.0 / d.fps().max(0.1)),
            // Blocking dequeue paces V4L2 capture
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(_) => Duration::ZERO,
        }
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.init(),
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(d) => d.init(),
        }
    }

    pub fn shutdown(&mut self) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.shutdown(),
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(d) => d.shutdown(),
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::Simulation(d) => d.is_available(),
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(d) => d.is_available(),
        }
    }

    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Simulation(d) => d.status(),
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(d) => d.status(),
        }
    }

    // ========================================================================
    // Capture methods
    // ========================================================================

    pub fn start_preview(&mut self, settings: &PreviewSettings) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.start_preview(settings),
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(d) => d.start_preview(settings),
        }
    }

    /// One JPEG frame
    pub fn capture_frame(&mut self) -> PinodeResult<Vec<u8>> {
        match self {
            Self::Simulation(d) => d.capture_frame(),
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(d) => d.capture_frame(),
        }
    }

    pub fn stop_preview(&mut self) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.stop_preview(),
            #[cfg(feature = "v4l2-backend")]
            Self::V4l2(d) => d.stop_preview(),
        }
    }
}
