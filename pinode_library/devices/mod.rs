//! Gateway devices
//!
//! One module per hardware family. Each device keeps its values in a
//! [`ValueRegistry`](pinode_core::ValueRegistry) and implements
//! [`Device`](pinode_core::Device); [`DeviceDriver`] is the tagged union the
//! factory hands to the gateway.

/// Registry-backed `descriptors`/`read`/`write`/`action` for a device with
/// `id` and `registry` fields. Closed devices answer `DeviceNotReady`.
macro_rules! registry_values {
    () => {
        fn descriptors(&self) -> Vec<pinode_core::ValueDescriptor> {
            self.registry.descriptors()
        }

        fn read(&mut self, value_id: &str) -> pinode_core::PinodeResult<pinode_core::Value> {
            if !self.is_open() {
                return Err(pinode_core::PinodeError::DeviceNotReady(self.id.clone()));
            }
            let registry = std::sync::Arc::clone(&self.registry);
            registry.read(self, value_id)
        }

        fn write(
            &mut self,
            value_id: &str,
            value: pinode_core::Value,
        ) -> pinode_core::PinodeResult<()> {
            if !self.is_open() {
                return Err(pinode_core::PinodeError::DeviceNotReady(self.id.clone()));
            }
            let registry = std::sync::Arc::clone(&self.registry);
            registry.write(self, value_id, value)
        }

        fn action(
            &mut self,
            value_id: &str,
            payload: Option<pinode_core::Value>,
        ) -> pinode_core::PinodeResult<Option<pinode_core::Value>> {
            if !self.is_open() {
                return Err(pinode_core::PinodeError::DeviceNotReady(self.id.clone()));
            }
            let registry = std::sync::Arc::clone(&self.registry);
            registry.act(self, value_id, payload)
        }
    };
}

pub mod bmp085;
pub mod bno055;
pub mod camera;
pub mod factory;
pub mod gpio_input;
pub mod gpio_output;
pub mod gpio_pwm;

pub use bmp085::Bmp085Device;
pub use bno055::Bno055Device;
pub use camera::CameraDevice;
pub use factory::{build_gateway, build_gateway_with, DeviceFactory, DEVICE_KINDS};
pub use gpio_input::GpioInputDevice;
pub use gpio_output::GpioOutputDevice;
pub use gpio_pwm::GpioPwmDevice;

use pinode_core::{
    AcquisitionState, Capabilities, Device, EventSink, PinodeResult, Value, ValueDescriptor,
};

/// Every device family the gateway knows
pub enum DeviceDriver {
    GpioInput(GpioInputDevice),
    GpioOutput(GpioOutputDevice),
    GpioPwm(GpioPwmDevice),
    Bmp085(Bmp085Device),
    Bno055(Bno055Device),
    Camera(CameraDevice),
}

macro_rules! each_device {
    ($self:ident, $d:ident => $body:expr) => {
        match $self {
            DeviceDriver::GpioInput($d) => $body,
            DeviceDriver::GpioOutput($d) => $body,
            DeviceDriver::GpioPwm($d) => $body,
            DeviceDriver::Bmp085($d) => $body,
            DeviceDriver::Bno055($d) => $body,
            DeviceDriver::Camera($d) => $body,
        }
    };
}

impl Device for DeviceDriver {
    fn id(&self) -> &str {
        each_device!(self, d => d.id())
    }

    fn kind(&self) -> &'static str {
        each_device!(self, d => d.kind())
    }

    fn capabilities(&self) -> Capabilities {
        each_device!(self, d => d.capabilities())
    }

    fn state(&self) -> AcquisitionState {
        each_device!(self, d => d.state())
    }

    fn descriptors(&self) -> Vec<ValueDescriptor> {
        each_device!(self, d => d.descriptors())
    }

    fn open(&mut self, events: EventSink) -> PinodeResult<()> {
        each_device!(self, d => d.open(events))
    }

    fn close(&mut self) -> PinodeResult<()> {
        each_device!(self, d => d.close())
    }

    fn read(&mut self, value_id: &str) -> PinodeResult<Value> {
        each_device!(self, d => d.read(value_id))
    }

    fn write(&mut self, value_id: &str, value: Value) -> PinodeResult<()> {
        each_device!(self, d => d.write(value_id, value))
    }

    fn action(&mut self, value_id: &str, payload: Option<Value>) -> PinodeResult<Option<Value>> {
        each_device!(self, d => d.action(value_id, payload))
    }

    fn check_heartbeat(&mut self) -> bool {
        each_device!(self, d => d.check_heartbeat())
    }
}
