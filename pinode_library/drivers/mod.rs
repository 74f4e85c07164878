//! Hardware drivers for PINODE
//!
//! Drivers are plain structs with direct methods. Each family offers a
//! simulation backend (always available) and hardware backends behind
//! features; a type-erased enum picks one at runtime.
//!
//! # Architecture
//!
//! ```text
//! Devices (pinode_library/devices/)
//!   │
//!   └── use drivers (this module)
//!           ├── gpio      - GpioContext + simulation / rppal
//!           ├── bus       - I2cBus + simulation / linux i2c-dev
//!           ├── barometer - BMP085 register protocol
//!           ├── imu       - BNO055 register protocol
//!           └── camera    - CameraSession + simulation / v4l2
//! ```

pub mod barometer;
pub mod bus;
pub mod camera;
pub mod gpio;
pub mod imu;

pub use barometer::{Bmp085Driver, Bmp085Mode};
pub use bus::{I2cBus, I2cDriver, I2cDriverBackend, I2cTransaction, SimulationI2cDriver};
pub use camera::{
    CameraDriver, CameraDriverBackend, CameraSession, CameraState, PreviewSettings,
    SimulationCameraDriver, StreamTarget,
};
pub use gpio::{
    Edge, EdgeCallback, GpioContext, GpioDriver, GpioDriverBackend, Pull, SimulatedChip,
    SimulationGpioDriver,
};
pub use imu::Bno055Driver;

#[cfg(feature = "i2c-hardware")]
pub use bus::LinuxI2cDriver;
#[cfg(feature = "v4l2-backend")]
pub use camera::V4l2CameraDriver;
#[cfg(feature = "gpio-hardware")]
pub use gpio::RppalGpioDriver;
