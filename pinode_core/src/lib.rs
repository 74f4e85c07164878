//! # PINODE Core
//!
//! The runtime of the PINODE sensor/actuator gateway.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Devices**: the [`Device`] contract every hardware family implements
//! - **Values**: typed [`ValueDescriptor`]s bound to accessor closures
//! - **Bus locks**: bounded, non-reentrant exclusion per physical bus
//! - **Scheduling**: periodic polls on one lane per device
//! - **Dispatch**: inbound commands routed to device writes and actions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pinode_core::{Command, Gateway, GatewaySettings, LogPublisher};
//! use std::sync::Arc;
//!
//! let mut gateway = Gateway::new(GatewaySettings::default(), Arc::new(LogPublisher));
//! // gateway.add_device(Box::new(my_device))?;
//! gateway.start().unwrap();
//!
//! let dispatcher = gateway.dispatcher();
//! let response = dispatcher.handle(&Command::get("gpio1", "status"));
//! println!("{:?}", response);
//!
//! gateway.stop();
//! ```

pub mod communication;
pub mod core;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod scheduling;

// Re-export commonly used types for easy access
pub use communication::{
    ChannelPublisher, Command, CommandResponse, EventSink, LogPublisher, MemoryPublisher,
    NullPublisher, PublishMessage, Publisher,
};
pub use self::core::{
    into_handle, AccessMode, AcquisitionState, BusLock, BusLockGuard, BusLockRegistry,
    Capabilities, Device, DeviceHandle, Value, ValueDescriptor, ValueRegistry, ValueType,
};
pub use dispatch::{CommandDispatcher, DeviceTable};
pub use driver::{
    BoardMode, DeviceConfig, DriverStatus, GatewayConfig, GatewaySettings, GpioSettings,
};
pub use error::{PinodeError, PinodeResult};
pub use gateway::{DeviceHealth, Gateway, ShutdownReport};
pub use scheduling::{PollJob, PollJobInfo, PollScheduler, PollStats, SchedulerConfig};
