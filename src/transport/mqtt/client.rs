//! Impure I/O operations for the MQTT transport
//!
//! This module drives the `rumqttc` event loop. Every `connect` builds a
//! fresh client and event loop; the subscriber owns reconnection policy, so
//! the event loop is never polled again after it reports an error.

use super::connection::{configure_mqtt_options, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::transport::{InboundMessage, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// MQTT implementation of [`Transport`]
pub struct MqttClient {
    config: MqttSection,
    connect_timeout: Duration,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    // Publishes that arrived while waiting for SUBACK
    pending: VecDeque<InboundMessage>,
}

impl MqttClient {
    pub fn new(config: MqttSection, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
            client: None,
            event_loop: None,
            pending: VecDeque::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some() && self.event_loop.is_some()
    }

    fn clear_session(&mut self) {
        self.client = None;
        self.event_loop = None;
    }

    /// Poll the event loop until ConnAck arrives (or the loop errors)
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), MqttError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => return Ok(()),
                EventRoute::Disconnected(reason) => return Err(MqttError::Disconnected(reason)),
                other => trace!("Event before ConnAck: {:?}", other),
            }
        }
    }

    /// Poll the event loop until SubAck arrives, buffering any publishes
    async fn wait_for_suback(
        event_loop: &mut EventLoop,
        pending: &mut VecDeque<InboundMessage>,
    ) -> Result<(), MqttError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::SubscriptionConfirmed {
                    packet_id,
                    reason_codes,
                } => {
                    debug!(packet_id, reason_codes = %reason_codes, "SubAck received");
                    return Ok(());
                }
                EventRoute::SubscriptionRejected { packet_id, reason } => {
                    warn!(packet_id, reason = %reason, "Broker refused subscription");
                    return Err(MqttError::SubscriptionFailed(reason.into()));
                }
                EventRoute::MessageReceived(message) => pending.push_back(message),
                EventRoute::Disconnected(reason) => return Err(MqttError::Disconnected(reason)),
                other => trace!("Event before SubAck: {:?}", other),
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.clear_session();
        self.pending.clear();

        let mqtt_options = configure_mqtt_options(&self.config)?;
        info!(
            broker_url = %self.config.broker_url,
            client_id = %mqtt_options.client_id(),
            "Connecting to MQTT broker"
        );

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        match tokio::time::timeout(self.connect_timeout, Self::wait_for_connack(&mut event_loop))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(MqttError::Timeout {
                    waiting_for: "CONNACK",
                    timeout: self.connect_timeout,
                })
            }
        }

        self.client = Some(client);
        self.event_loop = Some(event_loop);
        info!("MQTT connection established");
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        let (Some(client), Some(event_loop)) = (self.client.as_ref(), self.event_loop.as_mut())
        else {
            return Err(MqttError::NotConnected);
        };

        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
            self.clear_session();
            return Err(MqttError::SubscriptionFailed(Box::new(e)));
        }

        let result = tokio::time::timeout(
            self.connect_timeout,
            Self::wait_for_suback(event_loop, &mut self.pending),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                info!(topic, "Subscribed");
                Ok(())
            }
            Ok(Err(e)) => {
                self.clear_session();
                Err(e)
            }
            Err(_) => {
                self.clear_session();
                Err(MqttError::Timeout {
                    waiting_for: "SUBACK",
                    timeout: self.connect_timeout,
                })
            }
        }
    }

    async fn next_event(&mut self) -> TransportEvent {
        if let Some(message) = self.pending.pop_front() {
            return TransportEvent::Message(message);
        }

        let Some(event_loop) = self.event_loop.as_mut() else {
            return TransportEvent::ConnectionLost(MqttError::NotConnected.to_string());
        };

        loop {
            let event = match event_loop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    warn!("MQTT event loop error: {}", e);
                    self.clear_session();
                    return TransportEvent::ConnectionLost(e.to_string());
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::MessageReceived(message) => return TransportEvent::Message(message),
                EventRoute::Disconnected(reason) => {
                    warn!(reason = %reason, "Broker sent DISCONNECT");
                    self.clear_session();
                    return TransportEvent::ConnectionLost(
                        MqttError::Disconnected(reason).to_string(),
                    );
                }
                EventRoute::OutgoingEvent => {}
                other => trace!("MQTT event: {:?}", other),
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        let (Some(client), Some(mut event_loop)) = (self.client.take(), self.event_loop.take())
        else {
            self.clear_session();
            return Ok(());
        };

        if let Err(e) = client.disconnect().await {
            debug!("Disconnect request not sent: {}", e);
            return Ok(());
        }

        // Drive the loop so the DISCONNECT packet is actually flushed
        let _ = tokio::time::timeout(DISCONNECT_DRAIN_TIMEOUT, async {
            while event_loop.poll().await.is_ok() {}
        })
        .await;

        info!("Disconnected from MQTT broker");
        Ok(())
    }
}
