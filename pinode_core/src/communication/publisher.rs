//! Outbound publish channel
//!
//! Delivery is fire-and-forget: `publish` must never block on downstream
//! latency, so implementations hand the message off and return.

use crate::core::value::Value;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One value update leaving the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessage {
    pub device_id: String,
    pub value_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

impl PublishMessage {
    pub fn now(device_id: &str, value_id: &str, value: Value) -> Self {
        Self {
            device_id: device_id.to_string(),
            value_id: value_id.to_string(),
            timestamp: Utc::now(),
            value,
        }
    }
}

/// Receiver of outbound value updates
pub trait Publisher: Send + Sync {
    fn publish(&self, message: PublishMessage);
}

/// Publishes into an unbounded crossbeam channel
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: Sender<PublishMessage>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end the host drains
    pub fn new() -> (Self, Receiver<PublishMessage>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, message: PublishMessage) {
        if self.tx.send(message).is_err() {
            log::debug!("Publish channel closed, dropping update");
        }
    }
}

/// Logs each update at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, message: PublishMessage) {
        log::info!(
            "{}/{} = {} @ {}",
            message.device_id,
            message.value_id,
            message.value,
            message.timestamp.to_rfc3339()
        );
    }
}

/// Keeps every update in memory; handy for tests and diagnostics
#[derive(Debug, Default, Clone)]
pub struct MemoryPublisher {
    messages: Arc<Mutex<Vec<PublishMessage>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishMessage> {
        self.messages.lock().clone()
    }

    /// Updates for one device/value pair, in publish order
    pub fn messages_for(&self, device_id: &str, value_id: &str) -> Vec<PublishMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.device_id == device_id && m.value_id == value_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, message: PublishMessage) {
        self.messages.lock().push(message);
    }
}

/// Device-scoped handle for event-driven updates (edge interrupts and the like)
#[derive(Clone)]
pub struct EventSink {
    device_id: Arc<str>,
    publisher: Arc<dyn Publisher>,
}

impl EventSink {
    pub fn new(device_id: &str, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            device_id: Arc::from(device_id),
            publisher,
        }
    }

    /// Sink that discards everything
    pub fn detached(device_id: &str) -> Self {
        Self::new(device_id, Arc::new(NullPublisher))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn emit(&self, value_id: &str, value: Value) {
        self.publisher
            .publish(PublishMessage::now(&self.device_id, value_id, value));
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _message: PublishMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_publisher_delivers() {
        let (publisher, rx) = ChannelPublisher::new();
        publisher.publish(PublishMessage::now("gpio1", "status", Value::Byte(1)));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.device_id, "gpio1");
        assert_eq!(message.value, Value::Byte(1));
    }

    #[test]
    fn test_channel_publisher_survives_dropped_receiver() {
        let (publisher, rx) = ChannelPublisher::new();
        drop(rx);
        publisher.publish(PublishMessage::now("gpio1", "status", Value::Byte(0)));
    }

    #[test]
    fn test_wire_shape() {
        let message = PublishMessage::now("gpio1", "status", Value::Byte(1));
        let json: serde_json::Value = serde_json::to_value(&message).unwrap();
        assert_eq!(json["deviceId"], "gpio1");
        assert_eq!(json["valueId"], "status");
        assert_eq!(json["value"], 1);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_event_sink_tags_device() {
        let memory = MemoryPublisher::new();
        let sink = EventSink::new("camera", Arc::new(memory.clone()));
        sink.emit("state", Value::Enum("Idle".into()));

        let messages = memory.messages_for("camera", "state");
        assert_eq!(messages.len(), 1);
    }
}
