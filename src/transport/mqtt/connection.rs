//! Pure connection configuration for the MQTT transport
//!
//! This module contains pure functions for turning configuration into
//! `rumqttc` options, plus the transport error type.

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Timed out after {timeout:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        timeout: Duration,
    },
    #[error("Broker closed the session: {0}")]
    Disconnected(String),
    #[error("Not connected")]
    NotConnected,
}

/// Broker endpoint extracted from the configured URL
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse a broker URL into host, port and TLS flag (pure function)
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerEndpoint, MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?
        .to_string();
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint { host, port, tls })
}

/// Unique client id per connection attempt so a lingering session on the
/// broker never kicks the new one off
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..12])
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let endpoint = parse_broker_url(&config.broker_url)?;

    let client_id = generate_client_id(&config.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mqtt_config() -> MqttSection {
        MqttSection {
            broker_url: "mqtt://localhost:1883".to_string(),
            ..MqttSection::default()
        }
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://localhost:1884").unwrap(),
            BrokerEndpoint {
                host: "localhost".to_string(),
                port: 1884,
                tls: false
            }
        );

        let tls = parse_broker_url("mqtts://broker.example.com").unwrap();
        assert!(tls.tls);
        assert_eq!(tls.port, 8883);

        let plain = parse_broker_url("tcp://10.0.0.2").unwrap();
        assert!(!plain.tls);
        assert_eq!(plain.port, 1883);
    }

    #[test]
    fn test_invalid_broker_url() {
        for url in ["invalid-url", "http://localhost:1883", "mqtt:/no-host"] {
            assert!(
                matches!(parse_broker_url(url), Err(MqttError::InvalidBrokerUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = generate_client_id("sensor-ingest");
        let b = generate_client_id("sensor-ingest");
        assert!(a.starts_with("sensor-ingest-"));
        assert_eq!(a.len(), "sensor-ingest-".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&test_mqtt_config()).unwrap();
        let (host, port) = options.broker_address();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
        assert!(options.client_id().starts_with("sensor-ingest-"));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::Timeout {
                waiting_for: "CONNACK",
                timeout: Duration::from_secs(1),
            },
            MqttError::Disconnected("test".to_string()),
            MqttError::NotConnected,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
