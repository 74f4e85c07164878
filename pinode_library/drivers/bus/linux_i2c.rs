//! Linux I2C driver
//!
//! I2C driver using the Linux i2c-dev interface (`/dev/i2c-N`).
//! Requires the `i2c-hardware` feature.

use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

/// Linux I2C configuration
#[derive(Debug, Clone)]
pub struct LinuxI2cConfig {
    /// I2C device path (e.g., "/dev/i2c-1")
    pub device: String,
}

impl LinuxI2cConfig {
    pub fn for_bus(bus: u8) -> Self {
        Self {
            device: format!("/dev/i2c-{}", bus),
        }
    }
}

impl Default for LinuxI2cConfig {
    fn default() -> Self {
        Self::for_bus(1)
    }
}

/// Linux I2C driver using i2c-dev
pub struct LinuxI2cDriver {
    config: LinuxI2cConfig,
    status: DriverStatus,
    device: Option<File>,
    current_addr: Option<u16>,
}

// I2C ioctl constants
const I2C_SLAVE: libc::c_ulong = 0x0703;

impl LinuxI2cDriver {
    pub fn new(config: LinuxI2cConfig) -> Self {
        Self {
            config,
            status: DriverStatus::Uninitialized,
            device: None,
            current_addr: None,
        }
    }

    /// Open the character device. A missing bus or missing permission fails here.
    pub fn init(&mut self) -> PinodeResult<()> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.config.device)
            .map_err(|e| {
                PinodeError::unavailable(format!(
                    "Failed to open I2C device {}: {}",
                    self.config.device, e
                ))
            })?;

        self.device = Some(device);
        self.current_addr = None;
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> PinodeResult<()> {
        self.device = None;
        self.current_addr = None;
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.device.is_some()
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    /// Set the I2C slave address
    fn set_address(&mut self, addr: u16) -> PinodeResult<()> {
        if self.current_addr == Some(addr) {
            return Ok(());
        }

        let device = self
            .device
            .as_ref()
            .ok_or_else(|| PinodeError::driver("I2C device not initialized"))?;

        // SAFETY: the fd belongs to an open i2c-dev file and I2C_SLAVE takes an integer argument
        let ret = unsafe { libc::ioctl(device.as_raw_fd(), I2C_SLAVE, addr as libc::c_ulong) };

        if ret < 0 {
            return Err(PinodeError::driver(format!(
                "Failed to set I2C address 0x{:02x}: {}",
                addr,
                std::io::Error::last_os_error()
            )));
        }

        self.current_addr = Some(addr);
        Ok(())
    }

    pub fn read_bytes(&mut self, addr: u16, len: usize) -> PinodeResult<Vec<u8>> {
        self.set_address(addr)?;

        let device = self
            .device
            .as_mut()
            .ok_or_else(|| PinodeError::driver("I2C device not initialized"))?;

        let mut buf = vec![0u8; len];
        device
            .read_exact(&mut buf)
            .map_err(|e| classify(addr, "read", e))?;

        self.status = DriverStatus::Running;
        Ok(buf)
    }

    pub fn write_bytes(&mut self, addr: u16, data: &[u8]) -> PinodeResult<()> {
        self.set_address(addr)?;

        let device = self
            .device
            .as_mut()
            .ok_or_else(|| PinodeError::driver("I2C device not initialized"))?;

        device
            .write_all(data)
            .map_err(|e| classify(addr, "write", e))?;

        self.status = DriverStatus::Running;
        Ok(())
    }
}

/// A missing acknowledge means nothing answers at that address
fn classify(addr: u16, op: &str, err: std::io::Error) -> PinodeError {
    match err.raw_os_error() {
        Some(libc::ENXIO) | Some(libc::EREMOTEIO) => PinodeError::unavailable(format!(
            "No device acknowledged address 0x{:02x}",
            addr
        )),
        _ => PinodeError::driver(format!("I2C {} failed: {}", op, err)),
    }
}
