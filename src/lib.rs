//! Sensor telemetry ingestion
//!
//! Subscribes to an MQTT topic carrying JSON sensor readings, validates each
//! message, appends it to an SQLite-backed store, and answers read-only
//! queries for the latest reading and recent history.
//!
//! # Overview
//!
//! - [`reading`] - payload decoding, validation and the ingest clock
//! - [`store`] - the append-only [`store::ReadingStore`] and its SQLite implementation
//! - [`transport`] - the [`transport::Transport`] seam and its MQTT binding
//! - [`subscriber`] - connect / subscribe / ingest loop with reconnect backoff
//! - [`query`] - latest reading and history payloads
//! - [`observability`] - logging, metrics and health endpoints
//!
//! # Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use sensor_ingest::reading::NewReading;
//!
//! let payload = br#"{"device_id":"dev1","temperature":21.5,"humidity":40.0,"location":"lab"}"#;
//! let reading = NewReading::from_payload(payload, Utc::now()).unwrap();
//! assert_eq!(reading.device_id(), "dev1");
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod query;
pub mod reading;
pub mod store;
pub mod subscriber;
pub mod testing;
pub mod transport;

pub use config::*;
pub use error::{IngestError, IngestResult};
pub use query::{HistoryEntry, LatestReading, NoDataResponse, QueryError, QueryService};
pub use reading::{NewReading, PayloadError, Reading};
pub use store::{ReadingStore, SqliteStore, StoreError};
pub use subscriber::{BackoffPolicy, MessageOutcome, Subscriber, SubscriberState};
pub use transport::mqtt::MqttClient;
