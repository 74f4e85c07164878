//! Simulation camera driver
//!
//! Produces small synthetic JPEG frames (SOI, a comment segment naming the
//! frame, EOI) so every sink downstream sees well-formed MJPEG.

use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};

use super::PreviewSettings;

/// Simulation camera configuration
#[derive(Debug, Clone)]
pub struct SimulationCameraConfig {
    /// Frame rate in Hz
    pub fps: f32,
}

impl Default for SimulationCameraConfig {
    fn default() -> Self {
        Self { fps: 10.0 }
    }
}

/// Simulation camera driver
pub struct SimulationCameraDriver {
    config: SimulationCameraConfig,
    status: DriverStatus,
    frame_count: u64,
    preview: Option<PreviewSettings>,
    connected: bool,
    fail_stop: bool,
}

impl SimulationCameraDriver {
    pub fn new() -> Self {
        Self::with_config(SimulationCameraConfig::default())
    }

    pub fn with_config(config: SimulationCameraConfig) -> Self {
        Self {
            config,
            status: DriverStatus::Uninitialized,
            frame_count: 0,
            preview: None,
            connected: true,
            fail_stop: false,
        }
    }

    /// Simulate unplugging the camera; `init` fails until reconnected
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Make every following `stop_preview` fail, after stopping anyway
    pub fn set_fail_stop(&mut self, fail: bool) {
        self.fail_stop = fail;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn preview(&self) -> Option<&PreviewSettings> {
        self.preview.as_ref()
    }

    pub fn fps(&self) -> f32 {
        self.config.fps
    }

    pub fn init(&mut self) -> PinodeResult<()> {
        if !self.connected {
            return Err(PinodeError::unavailable("Simulated camera is disconnected"));
        }
        self.frame_count = 0;
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> PinodeResult<()> {
        self.preview = None;
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.connected
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    pub fn start_preview(&mut self, settings: &PreviewSettings) -> PinodeResult<()> {
        if !matches!(self.status, DriverStatus::Ready | DriverStatus::Running) {
            return Err(PinodeError::driver("Driver not initialized"));
        }
        self.preview = Some(settings.clone());
        self.status = DriverStatus::Running;
        Ok(())
    }

    pub fn capture_frame(&mut self) -> PinodeResult<Vec<u8>> {
        if self.preview.is_none() {
            return Err(PinodeError::driver("Preview is not running"));
        }
        self.frame_count += 1;
        let comment = format!("pinode frame {}", self.frame_count);
        let length = (comment.len() + 2) as u16;

        let mut frame = Vec::with_capacity(comment.len() + 8);
        frame.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xFE]);
        frame.extend_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(comment.as_bytes());
        frame.extend_from_slice(&[0xFF, 0xD9]);
        Ok(frame)
    }

    pub fn stop_preview(&mut self) -> PinodeResult<()> {
        self.preview = None;
        self.status = DriverStatus::Ready;
        if self.fail_stop {
            return Err(PinodeError::driver("Simulated stop failure"));
        }
        Ok(())
    }
}

impl Default for SimulationCameraDriver {
    fn default() -> Self {
        Self::new()
    }
}
