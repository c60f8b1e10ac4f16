//! Configuration system for the ingestion daemon
//!
//! Loaded from a TOML file. Every section has defaults, so an empty file (or
//! no file at all) yields a runnable configuration pointing at the public
//! HiveMQ broker and a local `sensor_data.db`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default topic devices publish telemetry on
pub const DEFAULT_TOPIC: &str = "iot/sensor/data";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub subscriber: SubscriberSection,
    #[serde(default)]
    pub health: HealthSection,
}

/// MQTT broker connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Prefix for the generated client id
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// The single topic readings arrive on
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            client_id_prefix: default_client_id_prefix(),
            topic: default_topic(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_broker_url() -> String {
    "mqtt://broker.hivemq.com:1883".to_string()
}

fn default_client_id_prefix() -> String {
    "sensor-ingest".to_string()
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_keep_alive() -> u64 {
    60
}

/// Reading store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Upper bound applied to every `recent(limit)` request
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_history: default_max_history(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://sensor_data.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_history() -> usize {
    1000
}

/// Subscriber reconnect behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriberSection {
    /// Delays for the first reconnect attempts, in milliseconds
    #[serde(default = "default_backoff_pattern")]
    pub backoff_pattern_ms: Vec<u64>,
    /// Delay used once the pattern is exhausted, forever
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
    /// How long to wait for CONNACK / SUBACK
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SubscriberSection {
    fn default() -> Self {
        Self {
            backoff_pattern_ms: default_backoff_pattern(),
            sustained_delay_ms: default_sustained_delay(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_backoff_pattern() -> Vec<u64> {
    vec![250, 500, 1000, 2000, 5000]
}

fn default_sustained_delay() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    10
}

/// Health/metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            port: default_health_port(),
        }
    }
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_port() -> u16 {
    8080
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IngestConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.mqtt.broker_url)?;
        validate_topic(&self.mqtt.topic)?;

        if self.mqtt.client_id_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id_prefix must not be empty".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "store.max_connections must be greater than 0".to_string(),
            ));
        }
        if self.store.max_history == 0 {
            return Err(ConfigError::InvalidConfig(
                "store.max_history must be greater than 0".to_string(),
            ));
        }
        if self.subscriber.sustained_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "subscriber.sustained_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.subscriber.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "subscriber.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Health port, with `HEALTH_PORT` taking precedence over the file
    pub fn health_port(&self) -> u16 {
        std::env::var("HEALTH_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.health.port)
    }
}

fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    let url = url::Url::parse(broker_url)
        .map_err(|e| ConfigError::InvalidConfig(format!("broker_url '{broker_url}': {e}")))?;

    match url.scheme() {
        "mqtt" | "mqtts" | "tcp" | "ssl" => {}
        other => {
            return Err(ConfigError::InvalidConfig(format!(
                "broker_url scheme '{other}' is not supported (use mqtt:// or mqtts://)"
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidConfig(format!(
            "broker_url '{broker_url}' has no host"
        )));
    }
    Ok(())
}

/// The subscriber listens on exactly one concrete topic, so wildcards are refused
fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidTopic(format!(
            "'{topic}' contains a wildcard; a fixed topic is required"
        )));
    }
    if topic.contains('\0') {
        return Err(ConfigError::InvalidTopic(format!(
            "'{}' contains a NUL character",
            topic.escape_default()
        )));
    }
    Ok(())
}
