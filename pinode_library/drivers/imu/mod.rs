//! Inertial measurement units
//!
//! - `bno055` - Bosch BNO055 absolute orientation sensor over I2C

pub mod bno055;

pub use bno055::Bno055Driver;
