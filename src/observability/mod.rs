//! Observability for the ingestion service
//!
//! Structured logging, process-wide metrics, and the operational health
//! endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{ingest_span, mqtt_span};
