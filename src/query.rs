//! Read-only query service over the reading store
//!
//! [`QueryService`] turns store results into the response payloads the
//! serving layer hands out. It never mutates the store.

use crate::observability::metrics::metrics;
use crate::reading::Reading;
use crate::store::{ReadingStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Number of entries returned by `get_history` when no limit is given
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Body returned when the store holds no readings
pub const NO_DATA_MESSAGE: &str = "No data available";

/// Most recent reading, as served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestReading {
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
    pub location: String,
}

impl From<Reading> for LatestReading {
    fn from(reading: Reading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.received_at,
            location: reading.location,
        }
    }
}

/// One row of the history listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<Reading> for HistoryEntry {
    fn from(reading: Reading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.received_at,
        }
    }
}

/// Empty-store response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoDataResponse {
    pub error: String,
}

impl Default for NoDataResponse {
    fn default() -> Self {
        Self {
            error: NO_DATA_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    /// The store is empty. Not a failure of the store.
    #[error("{}", NO_DATA_MESSAGE)]
    NoData,
    #[error("limit must be a positive integer, got {0}")]
    InvalidLimit(usize),
    #[error("query failed: {0}")]
    ReadFailed(#[source] StoreError),
}

impl From<StoreError> for QueryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InvalidLimit(limit) => QueryError::InvalidLimit(limit),
            other => QueryError::ReadFailed(other),
        }
    }
}

/// Read-only view over a [`ReadingStore`]
pub struct QueryService<S: ReadingStore> {
    store: Arc<S>,
}

impl<S: ReadingStore> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: ReadingStore> QueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Most recent reading, or [`QueryError::NoData`] when there is none
    pub async fn get_latest(&self) -> Result<LatestReading, QueryError> {
        let result = match self.store.latest().await {
            Ok(Some(reading)) => Ok(LatestReading::from(reading)),
            Ok(None) => Err(QueryError::NoData),
            Err(e) => Err(QueryError::from(e)),
        };
        record_outcome("latest", &result);
        result
    }

    /// Up to `limit` (default 50) entries, most recent first
    pub async fn get_history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, QueryError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let result = self
            .store
            .recent(limit)
            .await
            .map(|readings| readings.into_iter().map(HistoryEntry::from).collect())
            .map_err(QueryError::from);
        record_outcome("history", &result);
        result
    }
}

fn record_outcome<T>(query: &'static str, result: &Result<T, QueryError>) {
    match result {
        Ok(_) | Err(QueryError::NoData) => {
            metrics().query_served();
            debug!(query, "Query served");
        }
        Err(QueryError::InvalidLimit(limit)) => {
            metrics().query_failed();
            debug!(query, limit, "Query rejected");
        }
        Err(e) => {
            metrics().query_failed();
            error!(query, error = %e, "Query failed");
        }
    }
}
