//! MQTT implementation of the telemetry transport
//!
//! This module separates pure functions from I/O operations:
//!
//! - [`connection`] - Pure broker URL parsing and `rumqttc` option building
//! - [`message_handler`] - Pure event routing and topic filtering
//! - [`client`] - Impure I/O against the `rumqttc` event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensor_ingest::config::MqttSection;
//! use sensor_ingest::transport::mqtt::MqttClient;
//! use sensor_ingest::transport::Transport;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     ..MqttSection::default()
//! };
//!
//! let mut client = MqttClient::new(config, Duration::from_secs(10));
//! client.connect().await?;
//! client.subscribe("iot/sensor/data").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{configure_mqtt_options, parse_broker_url, BrokerEndpoint, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
