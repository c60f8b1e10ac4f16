//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! ingestion, MQTT connectivity and query statistics.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Samples kept for append latency percentiles
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Ingestion
    messages_received: AtomicU64,
    messages_ignored: AtomicU64,
    messages_rejected: AtomicU64,
    readings_stored: AtomicU64,
    write_failures: AtomicU64,
    last_stored_at: AtomicU64,

    // MQTT
    mqtt_subscribed: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,

    // Queries
    queries_served: AtomicU64,
    queries_failed: AtomicU64,

    // Append latency in microseconds
    append_latencies: Mutex<Vec<u64>>,

    subscriber_state: Mutex<String>,
    state_transitions: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            messages_rejected: AtomicU64::new(0),
            readings_stored: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            last_stored_at: AtomicU64::new(0),
            mqtt_subscribed: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            queries_served: AtomicU64::new(0),
            queries_failed: AtomicU64::new(0),
            append_latencies: Mutex::new(Vec::new()),
            subscriber_state: Mutex::new("disconnected".to_string()),
            state_transitions: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Ingestion metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reading_stored(&self, append_latency: Duration) {
        self.readings_stored.fetch_add(1, Ordering::Relaxed);
        self.last_stored_at
            .store(current_timestamp(), Ordering::Relaxed);
        self.record_append_latency(append_latency);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_append_latency(&self, duration: Duration) {
        if let Ok(mut latencies) = self.append_latencies.lock() {
            latencies.push(duration.as_micros() as u64);

            if latencies.len() > MAX_LATENCY_SAMPLES {
                latencies.remove(0);
            }
        }
    }

    /// Unix seconds of the last successful append, if any
    pub fn last_stored_at(&self) -> Option<u64> {
        match self.last_stored_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_subscribed.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_subscribed.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_subscribed(&self) {
        self.mqtt_subscribed.store(true, Ordering::Relaxed);
    }

    pub fn is_subscribed(&self) -> bool {
        self.mqtt_subscribed.load(Ordering::Relaxed)
    }

    // Query metrics
    pub fn query_served(&self) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_subscriber_state(&self, state: &str) {
        if let Ok(mut current_state) = self.subscriber_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.messages_ignored,
            &self.messages_rejected,
            &self.readings_stored,
            &self.write_failures,
            &self.last_stored_at,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.connection_start_time,
            &self.queries_served,
            &self.queries_failed,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_subscribed.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut latencies) = self.append_latencies.lock() {
            latencies.clear();
        }
        if let Ok(mut state) = self.subscriber_state.lock() {
            *state = "disconnected".to_string();
        }
    }

    /// Calculate append latency statistics in milliseconds (pure function)
    fn calculate_latency_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(latencies) = self.append_latencies.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if latencies.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();

        let to_ms = |micros: f64| micros / 1000.0;
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;

        (
            to_ms(avg),
            to_ms(percentile(&sorted, 50.0)),
            to_ms(percentile(&sorted, 95.0)),
            to_ms(percentile(&sorted, 99.0)),
        )
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if self.is_subscribed() && start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    fn current_subscriber_state(&self) -> String {
        self.subscriber_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_append_ms, p50, p95, p99) = self.calculate_latency_statistics();

        MetricsSnapshot {
            ingest: IngestMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
                messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
                readings_stored: self.readings_stored.load(Ordering::Relaxed),
                write_failures: self.write_failures.load(Ordering::Relaxed),
                last_stored_at: self.last_stored_at(),
                avg_append_time_ms: avg_append_ms,
                append_time_p50_ms: p50,
                append_time_p95_ms: p95,
                append_time_p99_ms: p99,
            },
            mqtt: MqttMetrics {
                subscribed: self.is_subscribed(),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            queries: QueryMetrics {
                queries_served: self.queries_served.load(Ordering::Relaxed),
                queries_failed: self.queries_failed.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                subscriber_state: self.current_subscriber_state(),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub ingest: IngestMetrics,
    pub mqtt: MqttMetrics,
    pub queries: QueryMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestMetrics {
    pub messages_received: u64,
    pub messages_ignored: u64,
    pub messages_rejected: u64,
    pub readings_stored: u64,
    pub write_failures: u64,
    pub last_stored_at: Option<u64>,
    pub avg_append_time_ms: f64,
    pub append_time_p50_ms: f64,
    pub append_time_p95_ms: f64,
    pub append_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub subscribed: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct QueryMetrics {
    pub queries_served: u64,
    pub queries_failed: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub subscriber_state: String,
    pub state_transitions: u64,
    pub uptime_seconds: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
