pub mod bus_lock;
pub mod device;
pub mod value;

pub use bus_lock::{BusLock, BusLockGuard, BusLockRegistry};
pub use device::{into_handle, AcquisitionState, Capabilities, Device, DeviceHandle};
pub use value::{AccessMode, Value, ValueDescriptor, ValueRegistry, ValueType};
