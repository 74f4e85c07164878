//! Video4Linux2 camera driver
//!
//! Captures MJPEG through memory-mapped buffers. The Raspberry Pi camera
//! shows up as `/dev/video0` with the bcm2835-v4l2 driver loaded.
//! Requires the `v4l2-backend` feature.

use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};
use v4l::buffer::Type;
use v4l::control::{Control, Value as ControlValue};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

use super::PreviewSettings;

const V4L2_CID_HFLIP: u32 = 0x0098_0914;
const V4L2_CID_VFLIP: u32 = 0x0098_0915;

/// V4L2 camera configuration
#[derive(Debug, Clone)]
pub struct V4l2CameraConfig {
    /// Camera device path (e.g., "/dev/video0")
    pub device_path: String,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Number of mmap buffers
    pub buffers: u32,
}

impl Default for V4l2CameraConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            width: 1024,
            height: 768,
            buffers: 4,
        }
    }
}

/// V4L2 camera driver
pub struct V4l2CameraDriver {
    config: V4l2CameraConfig,
    status: DriverStatus,
    device: Option<v4l::Device>,
    stream: Option<Stream<'static>>,
}

impl V4l2CameraDriver {
    pub fn with_config(config: V4l2CameraConfig) -> Self {
        Self {
            config,
            status: DriverStatus::Uninitialized,
            device: None,
            stream: None,
        }
    }

    /// Open the device and negotiate MJPG at the configured size
    pub fn init(&mut self) -> PinodeResult<()> {
        let dev = v4l::Device::with_path(&self.config.device_path).map_err(|e| {
            PinodeError::unavailable(format!(
                "Failed to open V4L2 device {}: {}",
                self.config.device_path, e
            ))
        })?;

        let mut fmt = dev
            .format()
            .map_err(|e| PinodeError::driver(format!("Failed to get format: {}", e)))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = v4l::FourCC::new(b"MJPG");
        let fmt = dev
            .set_format(&fmt)
            .map_err(|e| PinodeError::driver(format!("Failed to set format: {}", e)))?;
        if &fmt.fourcc.repr != b"MJPG" {
            return Err(PinodeError::unavailable(format!(
                "{} does not support MJPG capture",
                self.config.device_path
            )));
        }

        self.device = Some(dev);
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> PinodeResult<()> {
        self.stream = None;
        self.device = None;
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.device.is_some()
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    fn device(&self) -> PinodeResult<&v4l::Device> {
        self.device
            .as_ref()
            .ok_or_else(|| PinodeError::driver("Camera not initialized"))
    }

    fn set_flag(&self, id: u32, on: bool) {
        let control = Control {
            id,
            value: ControlValue::Boolean(on),
        };
        if let Err(e) = self.device().and_then(|dev| {
            dev.set_control(control)
                .map_err(|e| PinodeError::driver(e.to_string()))
        }) {
            log::debug!("Camera control 0x{:08x} not applied: {}", id, e);
        }
    }

    pub fn start_preview(&mut self, settings: &PreviewSettings) -> PinodeResult<()> {
        self.set_flag(V4L2_CID_HFLIP, settings.hflip);
        self.set_flag(V4L2_CID_VFLIP, settings.vflip);
        if !settings.led {
            log::debug!("Camera LED control is not exposed through V4L2");
        }

        let stream = Stream::with_buffers(self.device()?, Type::VideoCapture, self.config.buffers)
            .map_err(|e| PinodeError::driver(format!("Failed to start capture: {}", e)))?;
        self.stream = Some(stream);
        self.status = DriverStatus::Running;
        Ok(())
    }

    pub fn capture_frame(&mut self) -> PinodeResult<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PinodeError::driver("Preview is not running"))?;
        let (data, meta) = stream
            .next()
            .map_err(|e| PinodeError::driver(format!("Frame capture failed: {}", e)))?;
        let used = (meta.bytesused as usize).min(data.len());
        Ok(data[..used].to_vec())
    }

    pub fn stop_preview(&mut self) -> PinodeResult<()> {
        self.stream = None;
        self.status = DriverStatus::Ready;
        Ok(())
    }
}
