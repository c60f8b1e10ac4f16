//! Test helpers and utilities for integration tests

use chrono::{DateTime, Utc};
use sensor_ingest::config::{IngestConfig, StoreSection};
use sensor_ingest::reading::NewReading;
use sensor_ingest::store::{ReadingStore, SqliteStore};
use sensor_ingest::subscriber::{BackoffPolicy, SubscriberState};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

pub const TEST_TOPIC: &str = "iot/sensor/data";

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig::default();
    config.mqtt.broker_url = "mqtt://localhost:1883".to_string();
    config.subscriber.backoff_pattern_ms = vec![10, 20];
    config.subscriber.sustained_delay_ms = 20;
    config.health.enabled = false;
    config
}

/// Millisecond backoff so reconnect tests finish quickly
#[allow(dead_code)]
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::new(vec![5, 10], 10)
}

/// SQLite store in a throwaway directory; keep the `TempDir` alive
#[allow(dead_code)]
pub async fn temp_sqlite_store(max_history: usize) -> (SqliteStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreSection {
        database_url: format!("sqlite://{}", dir.path().join("sensor_data.db").display()),
        max_history,
        ..StoreSection::default()
    };
    let store = SqliteStore::open(&config).await.unwrap();
    store.initialize().await.unwrap();
    (store, dir)
}

#[allow(dead_code)]
pub fn payload(device_id: &str, temperature: f64, humidity: f64, location: &str) -> String {
    serde_json::json!({
        "device_id": device_id,
        "temperature": temperature,
        "humidity": humidity,
        "location": location,
    })
    .to_string()
}

#[allow(dead_code)]
pub fn new_reading(device_id: &str, temperature: f64, received_at: DateTime<Utc>) -> NewReading {
    NewReading::from_payload(
        payload(device_id, temperature, 40.0, "lab").as_bytes(),
        received_at,
    )
    .unwrap()
}

/// Wait until the subscriber reports `expected`, failing after `timeout`
#[allow(dead_code)]
pub async fn wait_for_state(
    state_rx: &mut watch::Receiver<SubscriberState>,
    expected: SubscriberState,
    timeout: Duration,
) {
    tokio::time::timeout(timeout, state_rx.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("subscriber never reached {expected}"))
        .unwrap();
}

/// Poll `condition` every few milliseconds until it holds
#[allow(dead_code)]
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
