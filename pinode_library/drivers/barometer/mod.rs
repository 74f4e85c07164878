//! Barometric pressure sensors
//!
//! - `bmp085` - Bosch BMP085 / BMP180 over I2C

pub mod bmp085;

pub use bmp085::{Bmp085Driver, Bmp085Mode, Calibration};
