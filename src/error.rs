//! Top-level error type for the ingestion service
//!
//! Each layer has its own `thiserror` enum; [`IngestError`] wraps them for
//! the binary and anything else that crosses layers.

use crate::config::ConfigError;
use crate::query::QueryError;
use crate::reading::PayloadError;
use crate::store::StoreError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for sensor ingestion operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl IngestError {
    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors the process cannot continue past
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::Config(_) | IngestError::Io(_) | IngestError::Internal { .. } => true,
            IngestError::Store(e) => e.is_fatal(),
            IngestError::Query(_)
            | IngestError::Transport(_)
            | IngestError::Payload(_)
            | IngestError::Serialization(_) => false,
        }
    }
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;
