//! Bosch BNO055 driver
//!
//! Only the pieces the gateway exposes: presence check, the NDOF start-up
//! sequence and the die temperature.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use pinode_core::error::{PinodeError, PinodeResult};

use crate::drivers::bus::{I2cTransaction, SimulationI2cDriver};

pub const DEFAULT_ADDRESS: u8 = 0x28;
pub const ALTERNATE_ADDRESS: u8 = 0x29;
pub const CHIP_ID: u8 = 0xA0;

const REG_CHIP_ID: u8 = 0x00;
const REG_PAGE_ID: u8 = 0x07;
const REG_TEMP: u8 = 0x34;
const REG_OPR_MODE: u8 = 0x3D;
const REG_PWR_MODE: u8 = 0x3E;
const REG_SYS_TRIGGER: u8 = 0x3F;

const OPR_MODE_CONFIG: u8 = 0x00;
const OPR_MODE_NDOF: u8 = 0x0C;
const PWR_MODE_NORMAL: u8 = 0x00;

/// Time to switch out of CONFIG mode
const MODE_SWITCH_DELAY: Duration = Duration::from_millis(20);
/// Power-on reset time after the reset line is released
pub const RESET_DELAY: Duration = Duration::from_millis(650);

#[derive(Debug, Clone)]
pub struct Bno055Driver {
    address: u8,
}

impl Bno055Driver {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_present(&self, tx: &mut I2cTransaction<'_>) -> bool {
        matches!(tx.read_u8(REG_CHIP_ID), Ok(CHIP_ID))
    }

    /// Verify the chip id and bring the sensor into NDOF fusion mode
    pub fn begin(&self, tx: &mut I2cTransaction<'_>) -> PinodeResult<()> {
        let id = tx.read_u8(REG_CHIP_ID)?;
        if id != CHIP_ID {
            return Err(PinodeError::unavailable(format!(
                "No BNO055 at 0x{:02x} (chip id 0x{:02x})",
                self.address, id
            )));
        }
        tx.write_u8(REG_OPR_MODE, OPR_MODE_CONFIG)?;
        thread::sleep(MODE_SWITCH_DELAY);
        tx.write_u8(REG_PWR_MODE, PWR_MODE_NORMAL)?;
        tx.write_u8(REG_PAGE_ID, 0)?;
        tx.write_u8(REG_SYS_TRIGGER, 0x00)?;
        tx.write_u8(REG_OPR_MODE, OPR_MODE_NDOF)?;
        thread::sleep(MODE_SWITCH_DELAY);
        Ok(())
    }

    /// Die temperature in °C (1 °C per LSB)
    pub fn read_temperature(&self, tx: &mut I2cTransaction<'_>) -> PinodeResult<f64> {
        Ok(tx.read_i8(REG_TEMP)? as f64)
    }

    pub fn operation_mode(&self, tx: &mut I2cTransaction<'_>) -> PinodeResult<u8> {
        tx.read_u8(REG_OPR_MODE)
    }
}

/// Put a BNO055 on a simulated bus, reporting `temperature` °C
pub fn simulate(sim: &mut SimulationI2cDriver, address: u8, temperature: i8) {
    sim.add_device(
        address,
        HashMap::from([
            (REG_CHIP_ID, CHIP_ID),
            (REG_TEMP, temperature as u8),
            (REG_OPR_MODE, OPR_MODE_CONFIG),
        ]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::bus::I2cBus;
    use pinode_core::BusLock;

    fn bus() -> I2cBus {
        I2cBus::simulation(1, BusLock::new("i2c-1", Duration::from_millis(50)))
    }

    #[test]
    fn test_begin_enters_ndof() {
        let bus = bus();
        bus.with_simulation(|sim| simulate(sim, DEFAULT_ADDRESS, -4));
        let driver = Bno055Driver::new(DEFAULT_ADDRESS);

        let (mode, temp) = bus
            .transaction("imu", DEFAULT_ADDRESS, |tx| {
                driver.begin(tx)?;
                Ok((driver.operation_mode(tx)?, driver.read_temperature(tx)?))
            })
            .unwrap();
        assert_eq!(mode, OPR_MODE_NDOF);
        assert_eq!(temp, -4.0);
    }

    #[test]
    fn test_absent_chip() {
        let bus = bus();
        let driver = Bno055Driver::new(DEFAULT_ADDRESS);
        let err = bus
            .transaction("imu", DEFAULT_ADDRESS, |tx| driver.begin(tx))
            .map_err(PinodeError::into_unavailable)
            .unwrap_err();
        assert!(matches!(err, PinodeError::ResourceUnavailable(_)));
    }
}
