//! The gateway-facing device contract
//!
//! Every hardware family implements [`Device`]. The scheduler and dispatcher
//! only ever talk to devices through this trait, behind a [`DeviceHandle`].

use crate::communication::EventSink;
use crate::core::value::{Value, ValueDescriptor};
use crate::error::PinodeResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What a device can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    /// Publishes on its own through the [`EventSink`] handed to `open`
    pub event_capable: bool,
}

impl Capabilities {
    pub fn sensor() -> Self {
        Self {
            readable: true,
            writable: false,
            event_capable: false,
        }
    }

    pub fn actuator() -> Self {
        Self {
            readable: true,
            writable: true,
            event_capable: false,
        }
    }

    pub fn with_events(mut self) -> Self {
        self.event_capable = true;
        self
    }
}

/// Acquisition state of the underlying resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// Opened and idle
    Free,
    /// Opened and holding its bus lock for an ongoing session
    Locked,
    /// Not opened, or closed
    #[default]
    Closed,
}

impl AcquisitionState {
    pub fn is_open(&self) -> bool {
        !matches!(self, AcquisitionState::Closed)
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "Free"),
            Self::Locked => write!(f, "Locked"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// One physical resource managed by the gateway
///
/// `read`/`write`/`action` take the owning bus lock internally for the
/// duration of each hardware transaction. `close` must be idempotent and
/// must leave no bus lock held.
pub trait Device: Send {
    /// Stable identifier, unique within the gateway
    fn id(&self) -> &str;

    /// Hardware family ("gpio_input", "bmp085", ...)
    fn kind(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn state(&self) -> AcquisitionState;

    /// Exposed values in declaration order
    fn descriptors(&self) -> Vec<ValueDescriptor>;

    /// Acquire the hardware. Fails with `ResourceUnavailable` when it cannot be reached.
    fn open(&mut self, events: EventSink) -> PinodeResult<()>;

    /// Release the hardware. Idempotent.
    fn close(&mut self) -> PinodeResult<()>;

    fn read(&mut self, value_id: &str) -> PinodeResult<Value>;

    fn write(&mut self, value_id: &str, value: Value) -> PinodeResult<()>;

    /// Run a write-only side effect, optionally returning a result payload
    fn action(&mut self, value_id: &str, payload: Option<Value>) -> PinodeResult<Option<Value>>;

    /// Liveness probe used for health reporting
    fn check_heartbeat(&mut self) -> bool {
        self.state().is_open()
    }

    fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn descriptor(&self, value_id: &str) -> Option<ValueDescriptor> {
        self.descriptors().into_iter().find(|d| d.name == value_id)
    }
}

/// Shared, lockable device
pub type DeviceHandle = Arc<Mutex<Box<dyn Device>>>;

/// Wrap a device for sharing between the scheduler lane and the dispatcher
pub fn into_handle<D: Device + 'static>(device: D) -> DeviceHandle {
    Arc::new(Mutex::new(Box::new(device)))
}
