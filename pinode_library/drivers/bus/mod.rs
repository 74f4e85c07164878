//! I2C bus drivers
//!
//! # Available Drivers
//!
//! - `SimulationI2cDriver` - Always available, in-memory register maps
//! - `LinuxI2cDriver` - Linux i2c-dev interface (requires `i2c-hardware` feature)
//!
//! Devices never talk to a driver directly. They go through an [`I2cBus`],
//! which pairs the driver with the bus lock so that every transaction on a
//! physical bus is serialized, whichever device issues it.

mod simulation;

#[cfg(feature = "i2c-hardware")]
mod linux_i2c;

pub use simulation::SimulationI2cDriver;

#[cfg(feature = "i2c-hardware")]
pub use linux_i2c::{LinuxI2cConfig, LinuxI2cDriver};

use parking_lot::{Mutex, MutexGuard};
use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};
use pinode_core::BusLock;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// I2C Driver
// ============================================================================

/// I2C driver backend selection
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum I2cDriverBackend {
    #[default]
    Simulation,
    #[cfg(feature = "i2c-hardware")]
    Linux,
}

impl FromStr for I2cDriverBackend {
    type Err = PinodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulation" | "sim" => Ok(Self::Simulation),
            #[cfg(feature = "i2c-hardware")]
            "linux" | "i2cdev" => Ok(Self::Linux),
            #[cfg(not(feature = "i2c-hardware"))]
            "linux" | "i2cdev" => Err(PinodeError::FeatureNotAvailable(
                "I2C backend 'linux' requires the 'i2c-hardware' feature".to_string(),
            )),
            other => Err(PinodeError::config(format!(
                "Unknown I2C backend '{}'. Available: {}",
                other,
                Self::available().join(", ")
            ))),
        }
    }
}

impl I2cDriverBackend {
    /// Backend names compiled into this build
    pub fn available() -> Vec<&'static str> {
        let mut names = vec!["simulation"];
        if cfg!(feature = "i2c-hardware") {
            names.push("linux");
        }
        names
    }
}

/// Type-erased I2C driver
pub enum I2cDriver {
    Simulation(SimulationI2cDriver),
    #[cfg(feature = "i2c-hardware")]
    Linux(LinuxI2cDriver),
}

impl I2cDriver {
    /// Create a driver for bus number `bus`
    pub fn new(backend: I2cDriverBackend, bus: u8) -> Self {
        let _ = bus;
        match backend {
            I2cDriverBackend::Simulation => Self::Simulation(SimulationI2cDriver::new()),
            #[cfg(feature = "i2c-hardware")]
            I2cDriverBackend::Linux => {
                Self::Linux(LinuxI2cDriver::new(LinuxI2cConfig::for_bus(bus)))
            }
        }
    }

    pub fn simulation() -> Self {
        Self::Simulation(SimulationI2cDriver::new())
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.init(),
            #[cfg(feature = "i2c-hardware")]
            Self::Linux(d) => d.init(),
        }
    }

    pub fn shutdown(&mut self) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.shutdown(),
            #[cfg(feature = "i2c-hardware")]
            Self::Linux(d) => d.shutdown(),
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::Simulation(d) => d.is_available(),
            #[cfg(feature = "i2c-hardware")]
            Self::Linux(d) => d.is_available(),
        }
    }

    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Simulation(d) => d.status(),
            #[cfg(feature = "i2c-hardware")]
            Self::Linux(d) => d.status(),
        }
    }

    // ========================================================================
    // Bus methods
    // ========================================================================

    pub fn read_bytes(&mut self, addr: u16, len: usize) -> PinodeResult<Vec<u8>> {
        match self {
            Self::Simulation(d) => d.read_bytes(addr, len),
            #[cfg(feature = "i2c-hardware")]
            Self::Linux(d) => d.read_bytes(addr, len),
        }
    }

    pub fn write_bytes(&mut self, addr: u16, data: &[u8]) -> PinodeResult<()> {
        match self {
            Self::Simulation(d) => d.write_bytes(addr, data),
            #[cfg(feature = "i2c-hardware")]
            Self::Linux(d) => d.write_bytes(addr, data),
        }
    }
}

// ============================================================================
// Shared bus
// ============================================================================

/// One physical I2C bus shared by every device on it
#[derive(Clone)]
pub struct I2cBus {
    number: u8,
    lock: BusLock,
    driver: Arc<Mutex<I2cDriver>>,
}

impl I2cBus {
    /// Wrap an initialized driver. Initialization failures surface later, when
    /// a device on the bus opens.
    pub fn new(number: u8, mut driver: I2cDriver, lock: BusLock) -> Self {
        if let Err(e) = driver.init() {
            log::warn!("I2C bus {} is not usable: {}", number, e);
        }
        Self {
            number,
            lock,
            driver: Arc::new(Mutex::new(driver)),
        }
    }

    pub fn simulation(number: u8, lock: BusLock) -> Self {
        Self::new(number, I2cDriver::simulation(), lock)
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn lock(&self) -> &BusLock {
        &self.lock
    }

    /// Run `f` against the device at `address` while holding the bus lock.
    ///
    /// The lock is acquired with the bus timeout and released when this
    /// returns, whether `f` succeeded or not.
    pub fn transaction<R, F>(&self, holder: &str, address: u8, f: F) -> PinodeResult<R>
    where
        F: FnOnce(&mut I2cTransaction<'_>) -> PinodeResult<R>,
    {
        let _guard = self.lock.acquire(holder)?;
        let mut driver = self.driver.lock();
        if !driver.status().is_operational() {
            // A bus that failed at startup (e.g. permissions) gets another chance
            driver.init().map_err(PinodeError::into_unavailable)?;
        }
        let mut tx = I2cTransaction { driver, address };
        f(&mut tx)
    }

    /// Access the simulated register map, if this bus is simulated
    pub fn with_simulation<R>(&self, f: impl FnOnce(&mut SimulationI2cDriver) -> R) -> Option<R> {
        match &mut *self.driver.lock() {
            I2cDriver::Simulation(sim) => Some(f(sim)),
            #[cfg(feature = "i2c-hardware")]
            _ => None,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(&*self.driver.lock(), I2cDriver::Simulation(_))
    }

    pub fn shutdown(&self) -> PinodeResult<()> {
        self.driver.lock().shutdown()
    }
}

impl std::fmt::Debug for I2cBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I2cBus")
            .field("number", &self.number)
            .field("lock", &self.lock)
            .finish()
    }
}

/// Register-level access to one device, valid for the duration of a bus transaction
pub struct I2cTransaction<'a> {
    driver: MutexGuard<'a, I2cDriver>,
    address: u8,
}

impl I2cTransaction<'_> {
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Write the register pointer, then read `len` bytes
    pub fn read_registers(&mut self, reg: u8, len: usize) -> PinodeResult<Vec<u8>> {
        let addr = self.address as u16;
        self.driver.write_bytes(addr, &[reg])?;
        let data = self.driver.read_bytes(addr, len)?;
        if data.len() != len {
            return Err(PinodeError::driver(format!(
                "Short read from 0x{:02x}: {} of {} bytes",
                self.address,
                data.len(),
                len
            )));
        }
        Ok(data)
    }

    pub fn read_u8(&mut self, reg: u8) -> PinodeResult<u8> {
        Ok(self.read_registers(reg, 1)?[0])
    }

    pub fn read_i8(&mut self, reg: u8) -> PinodeResult<i8> {
        Ok(self.read_u8(reg)? as i8)
    }

    /// Big-endian unsigned 16-bit register pair
    pub fn read_u16_be(&mut self, reg: u8) -> PinodeResult<u16> {
        let data = self.read_registers(reg, 2)?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }

    /// Big-endian signed 16-bit register pair
    pub fn read_i16_be(&mut self, reg: u8) -> PinodeResult<i16> {
        Ok(self.read_u16_be(reg)? as i16)
    }

    pub fn write_u8(&mut self, reg: u8, value: u8) -> PinodeResult<()> {
        self.driver.write_bytes(self.address as u16, &[reg, value])
    }
}
