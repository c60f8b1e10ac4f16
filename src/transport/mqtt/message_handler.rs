//! Pure routing logic for MQTT events
//!
//! This module contains pure functions that classify `rumqttc` events and
//! decide whether an inbound publish is relevant to the subscriber.

use super::super::InboundMessage;
use rumqttc::v5::mqttbytes::v5::SubscribeReasonCode;
use rumqttc::v5::Event;
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Determine if message should be processed based on topic and retain flag (pure function)
    ///
    /// Retained publishes are replays of something the broker already
    /// delivered before, so they are skipped to avoid duplicate readings
    /// after every reconnect.
    pub fn should_process_message(topic: &str, retain: bool, expected_topic: &str) -> bool {
        if retain {
            debug!("Ignoring retained message on topic: {}", topic);
            return false;
        }

        if topic != expected_topic {
            debug!("Topic mismatch: expected {}, got {}", expected_topic, topic);
            return false;
        }

        true
    }

    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    }),
                    Packet::Disconnect(disconnect) => {
                        EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                    }
                    Packet::SubAck(suback) => {
                        match Self::validate_subscription_success(&suback.return_codes) {
                            Ok(()) => EventRoute::SubscriptionConfirmed {
                                packet_id: suback.pkid,
                                reason_codes: format!("{:?}", suback.return_codes),
                            },
                            Err(reason) => EventRoute::SubscriptionRejected {
                                packet_id: suback.pkid,
                                reason,
                            },
                        }
                    }
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Validate subscription success from SubAck (pure function)
    ///
    /// Any non-success reason code means the broker refused the topic.
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), String> {
        if return_codes.is_empty() {
            return Err("SubAck carried no reason codes".to_string());
        }
        if return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
        {
            Ok(())
        } else {
            Err(format!("Subscription refused with reason codes: {return_codes:?}"))
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged by the broker
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived(InboundMessage),
    /// Broker sent DISCONNECT, with its reason code
    Disconnected(String),
    /// Subscription confirmed, with the broker's reason codes
    SubscriptionConfirmed { packet_id: u16, reason_codes: String },
    /// Broker refused the subscription
    SubscriptionRejected { packet_id: u16, reason: String },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Packet, Publish, SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_should_process_message() {
        let topic = "iot/sensor/data";

        assert!(MessageHandler::should_process_message(topic, false, topic));
        assert!(!MessageHandler::should_process_message(topic, true, topic));
        assert!(!MessageHandler::should_process_message(
            "iot/sensor/other",
            false,
            topic
        ));
    }

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        match MessageHandler::route_mqtt_event(&disconnect) {
            EventRoute::Disconnected(reason) => assert!(reason.contains("ServerShuttingDown")),
            other => panic!("Expected Disconnected route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("iot/sensor/data"),
            pkid: 1,
            payload: Bytes::from(r#"{"device_id":"dev1"}"#),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "iot/sensor/data");
                assert_eq!(message.payload, br#"{"device_id":"dev1"}"#);
                assert!(!message.retain);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    fn suback(return_codes: Vec<SubscribeReasonCode>) -> Event {
        Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes,
            properties: None,
        }))
    }

    #[test]
    fn test_route_granted_suback() {
        let event = suback(vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::SubscriptionConfirmed { packet_id: 7, .. }
        ));
    }

    #[test]
    fn test_route_refused_suback() {
        let event = suback(vec![SubscribeReasonCode::NotAuthorized]);
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::SubscriptionRejected { packet_id, reason } => {
                assert_eq!(packet_id, 7);
                assert!(reason.contains("NotAuthorized"));
            }
            other => panic!("Expected SubscriptionRejected route, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_subscription_success() {
        let granted = [SubscribeReasonCode::Success(QoS::AtMostOnce)];
        assert!(MessageHandler::validate_subscription_success(&granted).is_ok());

        assert!(MessageHandler::validate_subscription_success(&[
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
            SubscribeReasonCode::TopicFilterInvalid,
        ])
        .is_err());
        assert!(MessageHandler::validate_subscription_success(&[]).is_err());
    }
}
