//! Transport layer for inbound telemetry
//!
//! This module provides the transport abstraction the subscriber drives and
//! the MQTT implementation of it.

pub mod mqtt;

/// One message delivered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// What the transport produced while the subscriber was waiting
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message arrived on a subscribed topic
    Message(InboundMessage),
    /// The connection is gone (network error, protocol error, broker DISCONNECT)
    ConnectionLost(String),
}

/// Transport trait for receiving telemetry
///
/// This trait provides an abstraction over the broker connection so the
/// subscriber's state machine can be driven by MQTT in production and by a
/// scripted mock in tests. Every `connect` starts a fresh session.
#[async_trait::async_trait]
pub trait Transport: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish a new session; returns once the broker has acknowledged it
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Register interest in `topic`; returns once the broker has acknowledged it
    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Wait for the next inbound event.
    ///
    /// Must be cancel-safe: the subscriber races it against shutdown.
    async fn next_event(&mut self) -> TransportEvent;

    /// Best-effort teardown of the current session
    async fn disconnect(&mut self) -> Result<(), Self::Error>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
