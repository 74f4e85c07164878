//! # PINODE - Raspberry Pi sensor/actuator gateway
//!
//! PINODE polls sensors, publishes their readings and routes inbound
//! commands to actuators. GPIO pins, I2C sensors and a camera share one
//! runtime: a poll scheduler, a command dispatcher and per-bus locks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pinode::prelude::*;
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::find_and_load().unwrap();
//! let mut gateway = build_gateway(&config, Arc::new(LogPublisher)).unwrap();
//! gateway.start().unwrap();
//!
//! let response = gateway.dispatcher().handle(&Command::get("baro", "pressure"));
//! println!("{:?}", response);
//!
//! gateway.stop();
//! ```
//!
//! ## Features
//!
//! - **Simulation first**: every backend has an in-memory twin
//! - **Typed values** with range checks and per-value poll intervals
//! - **Bounded bus locks** so a wedged sensor cannot stall the gateway
//! - **Hardware backends** behind `gpio-hardware`, `i2c-hardware` and `v4l2-backend`

// Re-export core components
pub use pinode_core::{self, *};

// Re-export the device library with alias
pub use pinode_library as library;

pub use serde;

/// Everything needed to configure and run a gateway
pub mod prelude {
    // ============================================
    // Runtime
    // ============================================
    pub use pinode_core::{
        Command, CommandDispatcher, CommandResponse, Gateway, PollScheduler, ShutdownReport,
    };

    // ============================================
    // Devices and values
    // ============================================
    pub use pinode_core::{
        AcquisitionState, Capabilities, Device, Value, ValueDescriptor, ValueRegistry, ValueType,
    };

    // ============================================
    // Publishing
    // ============================================
    pub use pinode_core::{
        ChannelPublisher, EventSink, LogPublisher, MemoryPublisher, PublishMessage, Publisher,
    };

    // ============================================
    // Configuration and errors
    // ============================================
    pub use pinode_core::{
        BoardMode, DeviceConfig, GatewayConfig, GatewaySettings, PinodeError, PinodeResult,
        SchedulerConfig,
    };

    // ============================================
    // Hardware
    // ============================================
    pub use pinode_library::{
        build_gateway, build_gateway_with, CameraState, DeviceDriver, DeviceFactory, Edge,
        GpioContext, Pull, DEVICE_KINDS,
    };

    pub use anyhow::{anyhow, bail, Context, Result};
}
