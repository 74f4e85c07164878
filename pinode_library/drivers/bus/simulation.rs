//! Simulation I2C bus driver
//!
//! An in-memory register map per device address. Writes can trigger further
//! register updates, which is how conversion-style chips (write a command,
//! then read the result registers) are simulated.

use std::collections::HashMap;

use pinode_core::driver::DriverStatus;
use pinode_core::error::{PinodeError, PinodeResult};

/// Registers updated when `(register, value)` is written to a device
type WriteTriggers = HashMap<(u8, u8), Vec<(u8, u8)>>;

/// Simulation I2C bus driver
///
/// Addresses without a registered device NACK, like real hardware.
pub struct SimulationI2cDriver {
    status: DriverStatus,
    /// Simulated device registers: device_addr -> (register_addr -> value)
    devices: HashMap<u8, HashMap<u8, u8>>,
    /// Current register pointer for each device
    register_pointers: HashMap<u8, u8>,
    triggers: HashMap<u8, WriteTriggers>,
}

impl SimulationI2cDriver {
    pub fn new() -> Self {
        Self {
            status: DriverStatus::Uninitialized,
            devices: HashMap::new(),
            register_pointers: HashMap::new(),
            triggers: HashMap::new(),
        }
    }

    /// Add a simulated device with initial register values
    pub fn add_device(&mut self, addr: u8, registers: HashMap<u8, u8>) {
        self.devices.insert(addr, registers);
        self.register_pointers.insert(addr, 0);
    }

    /// Detach a device from the bus. Its registers and triggers are returned
    /// so a test can plug it back in later.
    pub fn remove_device(&mut self, addr: u8) -> Option<HashMap<u8, u8>> {
        self.register_pointers.remove(&addr);
        self.devices.remove(&addr)
    }

    pub fn has_device(&self, addr: u8) -> bool {
        self.devices.contains_key(&addr)
    }

    /// Set a register value for a device
    pub fn set_register(&mut self, addr: u8, reg: u8, value: u8) {
        self.devices.entry(addr).or_default().insert(reg, value);
    }

    /// Get a register value from a device
    pub fn get_register(&self, addr: u8, reg: u8) -> Option<u8> {
        self.devices
            .get(&addr)
            .and_then(|regs| regs.get(&reg).copied())
    }

    /// When `value` is written to `reg` on `addr`, also apply `updates`
    pub fn on_write(&mut self, addr: u8, reg: u8, value: u8, updates: &[(u8, u8)]) {
        self.triggers
            .entry(addr)
            .or_default()
            .insert((reg, value), updates.to_vec());
    }

    pub fn init(&mut self) -> PinodeResult<()> {
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> PinodeResult<()> {
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        true
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    fn check_ready(&mut self, addr: u8) -> PinodeResult<()> {
        if !matches!(self.status, DriverStatus::Ready | DriverStatus::Running) {
            return Err(PinodeError::driver("Driver not initialized"));
        }
        if !self.devices.contains_key(&addr) {
            return Err(PinodeError::unavailable(format!(
                "No device acknowledged address 0x{:02x}",
                addr
            )));
        }
        self.status = DriverStatus::Running;
        Ok(())
    }

    pub fn read_bytes(&mut self, addr: u16, len: usize) -> PinodeResult<Vec<u8>> {
        let addr8 = addr as u8;
        self.check_ready(addr8)?;

        let reg_ptr = *self.register_pointers.get(&addr8).unwrap_or(&0);
        let device = &self.devices[&addr8];
        let result = (0..len)
            .map(|i| {
                let reg = reg_ptr.wrapping_add(i as u8);
                *device.get(&reg).unwrap_or(&0xFF)
            })
            .collect();
        Ok(result)
    }

    pub fn write_bytes(&mut self, addr: u16, data: &[u8]) -> PinodeResult<()> {
        let addr8 = addr as u8;
        self.check_ready(addr8)?;

        let Some((&reg, payload)) = data.split_first() else {
            return Ok(());
        };
        // First byte is the register pointer
        self.register_pointers.insert(addr8, reg);

        let mut fired = Vec::new();
        if let Some(device) = self.devices.get_mut(&addr8) {
            for (i, &byte) in payload.iter().enumerate() {
                let target_reg = reg.wrapping_add(i as u8);
                device.insert(target_reg, byte);
                if let Some(updates) = self
                    .triggers
                    .get(&addr8)
                    .and_then(|t| t.get(&(target_reg, byte)))
                {
                    fired.extend_from_slice(updates);
                }
            }
            for (target_reg, value) in fired {
                device.insert(target_reg, value);
            }
        }
        Ok(())
    }
}

impl Default for SimulationI2cDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_pointer_reads() {
        let mut drv = SimulationI2cDriver::new();
        drv.init().unwrap();
        drv.add_device(0x40, HashMap::from([(0x10, 0xAB), (0x11, 0xCD)]));

        drv.write_bytes(0x40, &[0x10]).unwrap();
        assert_eq!(drv.read_bytes(0x40, 3).unwrap(), vec![0xAB, 0xCD, 0xFF]);
    }

    #[test]
    fn test_missing_device_nacks() {
        let mut drv = SimulationI2cDriver::new();
        drv.init().unwrap();
        assert!(drv.read_bytes(0x50, 1).is_err());
        assert!(drv.write_bytes(0x50, &[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_write_triggers() {
        let mut drv = SimulationI2cDriver::new();
        drv.init().unwrap();
        drv.add_device(0x77, HashMap::new());
        drv.on_write(0x77, 0xF4, 0x2E, &[(0xF6, 0x6C), (0xF7, 0xFA)]);

        drv.write_bytes(0x77, &[0xF4, 0x2E]).unwrap();
        drv.write_bytes(0x77, &[0xF6]).unwrap();
        assert_eq!(drv.read_bytes(0x77, 2).unwrap(), vec![0x6C, 0xFA]);
    }

    #[test]
    fn test_requires_init() {
        let mut drv = SimulationI2cDriver::new();
        drv.add_device(0x40, HashMap::new());
        assert!(drv.read_bytes(0x40, 1).is_err());
    }
}
