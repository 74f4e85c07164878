//! Inbound command and outbound publish channels

pub mod command;
pub mod publisher;

pub use command::{Command, CommandResponse};
pub use publisher::{
    ChannelPublisher, EventSink, LogPublisher, MemoryPublisher, NullPublisher, PublishMessage,
    Publisher,
};
