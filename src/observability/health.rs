//! Health check HTTP server for container orchestration
//!
//! Provides HTTP endpoints for monitoring ingestion status. These are
//! operational endpoints only; readings are not served here.

use crate::observability::metrics::metrics;
use crate::reading::Reading;
use crate::store::{ReadingStore, StoreError};
use crate::subscriber::SubscriberState;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

/// Readings older than this mark the store check as stale
const READING_STALENESS_THRESHOLD_SECONDS: i64 = 300;

/// HTTP health check server
pub struct HealthServer {
    port: u16,
    state_rx: watch::Receiver<SubscriberState>,
    store: Arc<dyn ReadingStore>,
}

impl HealthServer {
    /// Create new health server
    pub fn new(
        port: u16,
        state_rx: watch::Receiver<SubscriberState>,
        store: Arc<dyn ReadingStore>,
    ) -> Self {
        Self {
            port,
            state_rx,
            store,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn subscriber_state(&self) -> SubscriberState {
        *self.state_rx.borrow()
    }

    /// Start the HTTP health server
    pub async fn start(self: Arc<Self>) {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - comprehensive health status
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.get_health_status().await;
                let status_code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&status),
                    status_code,
                ))
            }
        });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(|| async {
            Ok::<_, Infallible>(warp::reply::json(&metrics().get_metrics()))
        });

        // GET /ready - readiness probe, true only while subscribed
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let state = server.subscriber_state();
                let ready = state == SubscriberState::Subscribed;
                let response = ReadinessResponse {
                    ready,
                    subscriber_state: state.as_str(),
                    timestamp: current_timestamp(),
                };
                let status_code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&response),
                    status_code,
                ))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).and_then(|| async {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        // GET / - endpoint index
        let root_route = warp::path::end().and(warp::get()).and_then(|| async {
            let response = ApiDocumentationResponse {
                endpoints: endpoint_index(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        let routes = health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin());

        tracing::info!("Starting health server on port {}", self.port);

        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }

    async fn get_health_status(&self) -> HealthStatus {
        let now = current_timestamp();

        let mut checks = HashMap::new();
        checks.insert(
            "mqtt".to_string(),
            check_subscriber_health(self.subscriber_state(), now),
        );
        checks.insert(
            "store".to_string(),
            check_store_health(&self.store.latest().await, now),
        );

        let overall_healthy = checks.values().all(|check| check.status == "healthy");
        let overall_status = if overall_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        };

        HealthStatus {
            status: overall_status,
            timestamp: now,
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }
}

/// MQTT check: healthy only while subscribed (pure function)
pub fn check_subscriber_health(state: SubscriberState, now: u64) -> HealthCheck {
    match state {
        SubscriberState::Subscribed => HealthCheck {
            status: "healthy".to_string(),
            message: Some("Subscribed to telemetry topic".to_string()),
            last_check: now,
        },
        other => HealthCheck {
            status: "unhealthy".to_string(),
            message: Some(format!("Subscriber is {other}")),
            last_check: now,
        },
    }
}

/// Store check: readable, and the newest reading is recent (pure function)
pub fn check_store_health(latest: &Result<Option<Reading>, StoreError>, now: u64) -> HealthCheck {
    let (status, message) = match latest {
        Err(e) => ("unhealthy", format!("Store read failed: {e}")),
        // Empty store is healthy for a fresh deployment
        Ok(None) => ("healthy", "No readings stored yet".to_string()),
        Ok(Some(reading)) => {
            let age = Utc::now()
                .signed_duration_since(reading.received_at)
                .num_seconds();
            if age > READING_STALENESS_THRESHOLD_SECONDS {
                ("stale", format!("No new readings for {age} seconds"))
            } else {
                ("healthy", "Recent readings".to_string())
            }
        }
    };

    HealthCheck {
        status: status.to_string(),
        message: Some(message),
        last_check: now,
    }
}

fn endpoint_index() -> HashMap<String, String> {
    [
        ("/health", "Overall health status with detailed checks"),
        ("/metrics", "Ingestion, MQTT and query metrics"),
        ("/ready", "Readiness probe, 200 while subscribed"),
        ("/live", "Liveness probe"),
    ]
    .into_iter()
    .map(|(path, description)| (path.to_string(), description.to_string()))
    .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    subscriber_state: &'static str,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<String, String>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::NewReading;
    use crate::testing::mocks::MockStore;
    use chrono::Duration as ChronoDuration;

    fn reading_aged(seconds: i64) -> Reading {
        let payload = r#"{"device_id":"d","temperature":1,"humidity":2,"location":"x"}"#;
        NewReading::from_payload(
            payload.as_bytes(),
            Utc::now() - ChronoDuration::seconds(seconds),
        )
        .unwrap()
        .into_reading(1)
    }

    fn server(store: Arc<MockStore>) -> (HealthServer, watch::Sender<SubscriberState>) {
        let (state_tx, state_rx) = watch::channel(SubscriberState::Disconnected);
        (HealthServer::new(8080, state_rx, store), state_tx)
    }

    #[test]
    fn test_subscriber_check() {
        assert_eq!(
            check_subscriber_health(SubscriberState::Subscribed, 0).status,
            "healthy"
        );
        assert_eq!(
            check_subscriber_health(SubscriberState::Connecting, 0).status,
            "unhealthy"
        );
    }

    #[test]
    fn test_store_check() {
        assert_eq!(check_store_health(&Ok(None), 0).status, "healthy");
        assert_eq!(
            check_store_health(&Ok(Some(reading_aged(5))), 0).status,
            "healthy"
        );
        assert_eq!(
            check_store_health(&Ok(Some(reading_aged(600))), 0).status,
            "stale"
        );
        assert_eq!(
            check_store_health(&Err(StoreError::Read(sqlx::Error::PoolClosed)), 0).status,
            "unhealthy"
        );
    }

    #[tokio::test]
    async fn test_overall_health_status() {
        let (health_server, state_tx) = server(Arc::new(MockStore::new()));
        assert_eq!(health_server.port(), 8080);

        let status = health_server.get_health_status().await;
        assert_eq!(status.status, "degraded");
        assert!(status.checks.contains_key("mqtt"));
        assert!(status.checks.contains_key("store"));

        state_tx.send(SubscriberState::Subscribed).unwrap();
        let status = health_server.get_health_status().await;
        assert_eq!(status.status, "healthy");
    }

    #[tokio::test]
    async fn test_store_read_failure_degrades_health() {
        let store = Arc::new(MockStore::new());
        store.fail_reads(true);
        let (health_server, state_tx) = server(store);
        state_tx.send(SubscriberState::Subscribed).unwrap();

        let status = health_server.get_health_status().await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.checks["store"].status, "unhealthy");
    }
}
