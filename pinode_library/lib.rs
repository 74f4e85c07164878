//! # PINODE Device Library
//!
//! Raspberry Pi hardware for the PINODE gateway.
//!
//! ## Structure
//!
//! ```text
//! pinode_library/
//! ├── drivers/   # Backends: simulation + hardware (rppal, i2c-dev, v4l2)
//! └── devices/   # Gateway devices and the config-driven factory
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pinode_core::{GatewayConfig, LogPublisher};
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::from_yaml(
//!     r#"
//! devices:
//!   door:
//!     kind: gpio_input
//!     pin: 11
//!   baro:
//!     kind: bmp085
//! "#,
//! )
//! .unwrap();
//!
//! let mut gateway = pinode_library::build_gateway(&config, Arc::new(LogPublisher)).unwrap();
//! gateway.start().unwrap();
//! // ...
//! gateway.stop();
//! ```

pub mod devices;
pub mod drivers;

// Devices
pub use devices::{
    build_gateway, build_gateway_with, Bmp085Device, Bno055Device, CameraDevice, DeviceDriver,
    DeviceFactory, GpioInputDevice, GpioOutputDevice, GpioPwmDevice, DEVICE_KINDS,
};

// GPIO
#[cfg(feature = "gpio-hardware")]
pub use drivers::RppalGpioDriver;
pub use drivers::{Edge, GpioContext, GpioDriver, GpioDriverBackend, Pull, SimulationGpioDriver};

// I2C
#[cfg(feature = "i2c-hardware")]
pub use drivers::LinuxI2cDriver;
pub use drivers::{Bmp085Driver, Bno055Driver, I2cBus, I2cDriver, I2cDriverBackend};

// Camera
#[cfg(feature = "v4l2-backend")]
pub use drivers::V4l2CameraDriver;
pub use drivers::{
    CameraDriver, CameraDriverBackend, CameraSession, CameraState, SimulationCameraDriver,
    StreamTarget,
};
