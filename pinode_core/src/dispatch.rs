//! Command dispatcher
//!
//! Routes inbound commands to the addressed device on the caller's thread.
//! It shares nothing with the poll scheduler except the device handles
//! themselves (and, through them, the bus locks).

use crate::communication::{Command, CommandResponse, PublishMessage, Publisher};
use crate::core::device::DeviceHandle;
use crate::core::value::{AccessMode, Value};
use crate::error::{PinodeError, PinodeResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Devices by id, shared between the gateway and the dispatcher
pub type DeviceTable = Arc<RwLock<BTreeMap<String, DeviceHandle>>>;

#[derive(Clone)]
pub struct CommandDispatcher {
    devices: DeviceTable,
    publisher: Arc<dyn Publisher>,
}

impl CommandDispatcher {
    pub fn new(devices: DeviceTable, publisher: Arc<dyn Publisher>) -> Self {
        Self { devices, publisher }
    }

    /// Dispatch and fold the outcome into a response for the command channel
    pub fn handle(&self, command: &Command) -> CommandResponse {
        let result = self.dispatch(command);
        if let Err(ref e) = result {
            log::debug!(
                "Command {} on {}/{} rejected: {}",
                command.action,
                command.device_id,
                command.value_id,
                e
            );
        }
        result.into()
    }

    /// Dispatch one command.
    ///
    /// * `get` reads a sensor or config value
    /// * `set` writes a config value, then publishes the new value
    /// * anything else on an action value runs the action with the action
    ///   name as payload, unless an explicit payload is given
    pub fn dispatch(&self, command: &Command) -> PinodeResult<Option<Value>> {
        let handle = self
            .devices
            .read()
            .get(&command.device_id)
            .cloned()
            .ok_or_else(|| PinodeError::UnknownDevice(command.device_id.clone()))?;

        let value_id = command.value_id.as_str();
        let (result, published) = {
            let mut device = handle.lock();
            let descriptor = device
                .descriptor(value_id)
                .ok_or_else(|| PinodeError::UnknownValue(value_id.to_string()))?;

            if !device.is_open() {
                return Err(PinodeError::DeviceNotReady(command.device_id.clone()));
            }

            match (descriptor.access, command.action.as_str()) {
                (AccessMode::Sensor | AccessMode::Config, "get") => {
                    (device.read(value_id).map(Some), None)
                }
                (AccessMode::Config, "set") => {
                    let payload = command.payload.clone().ok_or_else(|| {
                        PinodeError::invalid(value_id, "'set' requires a payload")
                    })?;
                    device.write(value_id, payload)?;
                    (Ok(None), descriptor.last())
                }
                (AccessMode::Action, action) => {
                    let payload = match (&command.payload, action) {
                        (Some(p), _) => Some(p.clone()),
                        (None, "set" | "run") => None,
                        (None, name) => Some(Value::Enum(name.to_string())),
                    };
                    (device.action(value_id, payload), None)
                }
                (AccessMode::Sensor, "set") => {
                    return Err(PinodeError::invalid(value_id, "sensor values are read-only"));
                }
                (access, action) => {
                    return Err(PinodeError::invalid(
                        value_id,
                        format!("action '{}' is not supported on {} values", action, access),
                    ));
                }
            }
        };

        if let Some(value) = published {
            self.publisher
                .publish(PublishMessage::now(&command.device_id, value_id, value));
        }
        result
    }
}
