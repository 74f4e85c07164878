//! Bosch BMP085 / BMP180 barometric pressure sensor
//!
//! Register-level driver. Compensation follows the integer arithmetic of the
//! datasheet exactly, including floor division and arithmetic shifts.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use pinode_core::error::{PinodeError, PinodeResult};

use crate::drivers::bus::{I2cTransaction, SimulationI2cDriver};

pub const DEFAULT_ADDRESS: u8 = 0x77;
pub const CHIP_ID: u8 = 0x55;

const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIBRATION: u8 = 0xAA;
const REG_CONTROL: u8 = 0xF4;
const REG_DATA: u8 = 0xF6;

const CMD_READ_TEMPERATURE: u8 = 0x2E;
const CMD_READ_PRESSURE: u8 = 0x34;

/// Standard atmosphere at sea level, Pa
pub const SEA_LEVEL_PA: f64 = 101_325.0;

/// Oversampling setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bmp085Mode {
    UltraLowPower = 0,
    #[default]
    Standard = 1,
    HighRes = 2,
    UltraHighRes = 3,
}

impl Bmp085Mode {
    pub fn from_index(index: i64) -> PinodeResult<Self> {
        match index {
            0 => Ok(Self::UltraLowPower),
            1 => Ok(Self::Standard),
            2 => Ok(Self::HighRes),
            3 => Ok(Self::UltraHighRes),
            other => Err(PinodeError::invalid(
                "mode",
                format!("{} is not a BMP085 mode (0..=3)", other),
            )),
        }
    }

    pub fn oss(self) -> u8 {
        self as u8
    }

    /// Maximum conversion time for this oversampling setting
    pub fn conversion_delay(self) -> Duration {
        Duration::from_millis(match self {
            Self::UltraLowPower => 5,
            Self::Standard => 8,
            Self::HighRes => 14,
            Self::UltraHighRes => 26,
        })
    }
}

/// Factory calibration coefficients from the EEPROM at 0xAA..0xBF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub ac1: i16,
    pub ac2: i16,
    pub ac3: i16,
    pub ac4: u16,
    pub ac5: u16,
    pub ac6: u16,
    pub b1: i16,
    pub b2: i16,
    pub mb: i16,
    pub mc: i16,
    pub md: i16,
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// A zero divisor means the raw words cannot have come from a working chip
fn divisor(value: i64, term: &str) -> PinodeResult<i64> {
    if value == 0 {
        return Err(PinodeError::driver(format!(
            "BMP085 reading is malformed ({} is zero)",
            term
        )));
    }
    Ok(value)
}

impl Calibration {
    /// Parse the 22 big-endian calibration bytes.
    ///
    /// A word of 0x0000 or 0xFFFF means the EEPROM did not answer.
    pub fn from_bytes(raw: &[u8]) -> PinodeResult<Self> {
        if raw.len() != 22 {
            return Err(PinodeError::driver(format!(
                "BMP085 calibration is 22 bytes, got {}",
                raw.len()
            )));
        }
        let words: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        if let Some(bad) = words.iter().position(|w| *w == 0x0000 || *w == 0xFFFF) {
            return Err(PinodeError::driver(format!(
                "BMP085 calibration word {} is invalid (0x{:04x})",
                bad, words[bad]
            )));
        }
        Ok(Self {
            ac1: words[0] as i16,
            ac2: words[1] as i16,
            ac3: words[2] as i16,
            ac4: words[3],
            ac5: words[4],
            ac6: words[5],
            b1: words[6] as i16,
            b2: words[7] as i16,
            mb: words[8] as i16,
            mc: words[9] as i16,
            md: words[10] as i16,
        })
    }

    /// B5 term shared by temperature and pressure compensation
    pub fn b5(&self, ut: i64) -> PinodeResult<i64> {
        let x1 = ((ut - self.ac6 as i64) * self.ac5 as i64) >> 15;
        let x2 = floor_div((self.mc as i64) << 11, divisor(x1 + self.md as i64, "X1 + MD")?);
        Ok(x1 + x2)
    }

    /// Temperature in °C from the raw reading
    pub fn temperature(&self, ut: i64) -> PinodeResult<f64> {
        Ok(((self.b5(ut)? + 8) >> 4) as f64 / 10.0)
    }

    /// Pressure in Pa from raw readings taken with `mode`
    pub fn pressure(&self, ut: i64, up: i64, mode: Bmp085Mode) -> PinodeResult<i64> {
        let oss = mode.oss() as i64;
        let b6 = self.b5(ut)? - 4000;

        let x1 = (self.b2 as i64 * ((b6 * b6) >> 12)) >> 11;
        let x2 = (self.ac2 as i64 * b6) >> 11;
        let x3 = x1 + x2;
        let b3 = floor_div((((self.ac1 as i64) * 4 + x3) << oss) + 2, 4);

        let x1 = (self.ac3 as i64 * b6) >> 13;
        let x2 = (self.b1 as i64 * ((b6 * b6) >> 12)) >> 16;
        let x3 = ((x1 + x2) + 2) >> 2;
        let b4 = divisor((self.ac4 as i64 * (x3 + 32768)) >> 15, "B4")?;
        let b7 = (up - b3) * (50_000 >> oss);

        let mut p = if b7 < 0x8000_0000 {
            (b7 * 2) / b4
        } else {
            (b7 / b4) * 2
        };

        let x1 = (p >> 8) * (p >> 8);
        let x1 = (x1 * 3038) >> 16;
        let x2 = (-7357 * p) >> 16;
        p += (x1 + x2 + 3791) >> 4;
        Ok(p)
    }
}

/// Altitude in meters for `pressure`, given the sea-level pressure
pub fn altitude(pressure: f64, sealevel: f64) -> f64 {
    44_330.0 * (1.0 - (pressure / sealevel).powf(1.0 / 5.255))
}

/// Sea-level pressure for `pressure` measured at `altitude_m`
pub fn sealevel_pressure(pressure: f64, altitude_m: f64) -> f64 {
    pressure / (1.0 - altitude_m / 44_330.0).powf(5.255)
}

/// BMP085 driver. Holds the calibration read at probe time.
#[derive(Debug, Clone)]
pub struct Bmp085Driver {
    address: u8,
    mode: Bmp085Mode,
    calibration: Option<Calibration>,
}

impl Bmp085Driver {
    pub fn new(address: u8, mode: Bmp085Mode) -> Self {
        Self {
            address,
            mode,
            calibration: None,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn mode(&self) -> Bmp085Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Bmp085Mode) {
        self.mode = mode;
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Check the chip id, then load the calibration EEPROM
    pub fn probe(&mut self, tx: &mut I2cTransaction<'_>) -> PinodeResult<()> {
        let id = tx.read_u8(REG_CHIP_ID)?;
        if id != CHIP_ID {
            return Err(PinodeError::unavailable(format!(
                "No BMP085 at 0x{:02x} (chip id 0x{:02x})",
                self.address, id
            )));
        }
        let raw = tx.read_registers(REG_CALIBRATION, 22)?;
        let calibration = Calibration::from_bytes(&raw)?;
        log::debug!("BMP085 calibration: {:?}", calibration);
        self.calibration = Some(calibration);
        Ok(())
    }

    pub fn is_present(&self, tx: &mut I2cTransaction<'_>) -> bool {
        matches!(tx.read_u8(REG_CHIP_ID), Ok(CHIP_ID))
    }

    fn require_calibration(&self) -> PinodeResult<&Calibration> {
        self.calibration
            .as_ref()
            .ok_or_else(|| PinodeError::driver("BMP085 is not calibrated"))
    }

    pub fn read_raw_temperature(&self, tx: &mut I2cTransaction<'_>) -> PinodeResult<i64> {
        tx.write_u8(REG_CONTROL, CMD_READ_TEMPERATURE)?;
        thread::sleep(Duration::from_millis(5));
        Ok(tx.read_u16_be(REG_DATA)? as i64)
    }

    pub fn read_raw_pressure(&self, tx: &mut I2cTransaction<'_>) -> PinodeResult<i64> {
        let oss = self.mode.oss();
        tx.write_u8(REG_CONTROL, CMD_READ_PRESSURE + (oss << 6))?;
        thread::sleep(self.mode.conversion_delay());
        let data = tx.read_registers(REG_DATA, 3)?;
        let raw = ((data[0] as i64) << 16) + ((data[1] as i64) << 8) + data[2] as i64;
        Ok(raw >> (8 - oss))
    }

    /// Compensated temperature, °C
    pub fn read_temperature(&self, tx: &mut I2cTransaction<'_>) -> PinodeResult<f64> {
        let calibration = *self.require_calibration()?;
        let ut = self.read_raw_temperature(tx)?;
        calibration.temperature(ut)
    }

    /// Compensated pressure, Pa
    pub fn read_pressure(&self, tx: &mut I2cTransaction<'_>) -> PinodeResult<i64> {
        let calibration = *self.require_calibration()?;
        let ut = self.read_raw_temperature(tx)?;
        let up = self.read_raw_pressure(tx)?;
        calibration.pressure(ut, up, self.mode)
    }
}

/// Put a BMP085 on a simulated bus. It answers with the datasheet example
/// calibration and readings (15.0 °C, 69964 Pa).
pub fn simulate(sim: &mut SimulationI2cDriver, address: u8) {
    const CALIBRATION: [u8; 22] = [
        0x01, 0x98, 0xFF, 0xB8, 0xC7, 0xD1, 0x7F, 0xE5, 0x7F, 0xF5, 0x5A, 0x71, 0x18, 0x2E, 0x00,
        0x04, 0x80, 0x00, 0xDD, 0xF9, 0x0B, 0x34,
    ];
    let mut registers: HashMap<u8, u8> = CALIBRATION
        .iter()
        .enumerate()
        .map(|(i, byte)| (REG_CALIBRATION + i as u8, *byte))
        .collect();
    registers.insert(REG_CHIP_ID, CHIP_ID);
    sim.add_device(address, registers);

    sim.on_write(
        address,
        REG_CONTROL,
        CMD_READ_TEMPERATURE,
        &[(REG_DATA, 0x6C), (REG_DATA + 1, 0xFA)],
    );
    for oss in 0..4u8 {
        sim.on_write(
            address,
            REG_CONTROL,
            CMD_READ_PRESSURE + (oss << 6),
            &[(REG_DATA, 0x5D), (REG_DATA + 1, 0x23), (REG_DATA + 2, 0x00)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::bus::I2cBus;
    use approx::assert_relative_eq;
    use pinode_core::BusLock;

    fn datasheet() -> Calibration {
        Calibration {
            ac1: 408,
            ac2: -72,
            ac3: -14383,
            ac4: 32741,
            ac5: 32757,
            ac6: 23153,
            b1: 6190,
            b2: 4,
            mb: -32768,
            mc: -8711,
            md: 2868,
        }
    }

    #[test]
    fn test_datasheet_compensation() {
        let cal = datasheet();
        assert_eq!(cal.b5(27898).unwrap(), 2399);
        assert_relative_eq!(cal.temperature(27898).unwrap(), 15.0);
        assert_eq!(
            cal.pressure(27898, 23843, Bmp085Mode::UltraLowPower).unwrap(),
            69964
        );
    }

    #[test]
    fn test_malformed_raw_temperature_is_an_error() {
        let cal = datasheet();
        // X1 + MD == 0 for this word
        assert!(matches!(cal.b5(0x4F3D), Err(PinodeError::Driver(_))));
        assert!(cal.temperature(0x4F3D).is_err());
        assert!(cal
            .pressure(0x4F3D, 23843, Bmp085Mode::Standard)
            .is_err());
        assert!(cal.temperature(0x4F3E).is_ok());
    }

    #[test]
    fn test_altitude_formulas() {
        assert_relative_eq!(altitude(SEA_LEVEL_PA, SEA_LEVEL_PA), 0.0);
        assert_relative_eq!(altitude(69964.0, SEA_LEVEL_PA), 3016.66, epsilon = 0.01);
        let p0 = sealevel_pressure(69964.0, 3016.66);
        assert_relative_eq!(p0, SEA_LEVEL_PA, epsilon = 1.0);
    }

    #[test]
    fn test_calibration_rejects_blank_eeprom() {
        assert!(Calibration::from_bytes(&[0xFF; 22]).is_err());
        assert!(Calibration::from_bytes(&[0x01; 20]).is_err());
    }

    #[test]
    fn test_simulated_chip_end_to_end() {
        let bus = I2cBus::simulation(1, BusLock::new("i2c-1", Duration::from_millis(50)));
        bus.with_simulation(|sim| simulate(sim, DEFAULT_ADDRESS));

        let mut driver = Bmp085Driver::new(DEFAULT_ADDRESS, Bmp085Mode::UltraLowPower);
        bus.transaction("bmp", DEFAULT_ADDRESS, |tx| driver.probe(tx))
            .unwrap();
        assert_eq!(driver.calibration(), Some(&datasheet()));

        let (t, p) = bus
            .transaction("bmp", DEFAULT_ADDRESS, |tx| {
                Ok((driver.read_temperature(tx)?, driver.read_pressure(tx)?))
            })
            .unwrap();
        assert_relative_eq!(t, 15.0);
        assert_eq!(p, 69964);

        driver.set_mode(Bmp085Mode::UltraHighRes);
        let p = bus
            .transaction("bmp", DEFAULT_ADDRESS, |tx| driver.read_pressure(tx))
            .unwrap();
        assert!((69950..=69980).contains(&p));
    }

    #[test]
    fn test_wrong_chip_is_unavailable() {
        let bus = I2cBus::simulation(1, BusLock::new("i2c-1", Duration::from_millis(50)));
        bus.with_simulation(|sim| sim.add_device(0x77, HashMap::from([(REG_CHIP_ID, 0x58)])));
        let mut driver = Bmp085Driver::new(0x77, Bmp085Mode::Standard);
        let err = bus
            .transaction("bmp", 0x77, |tx| driver.probe(tx))
            .unwrap_err();
        assert!(matches!(err, PinodeError::ResourceUnavailable(_)));
    }
}
