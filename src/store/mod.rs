//! Append-only reading store
//!
//! [`ReadingStore`] is the seam between the ingestion pipeline, the query
//! side and the persistence medium. Production uses [`SqliteStore`]; tests
//! can substitute [`crate::testing::MockStore`].
//!
//! The store only ever appends and reads; the trait has no update or delete.

use crate::reading::{NewReading, Reading};
use async_trait::async_trait;
use thiserror::Error;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Medium-level store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// The medium could not be opened or the schema could not be created
    #[error("storage initialization failed: {0}")]
    Init(#[source] sqlx::Error),
    #[error("write failed: {0}")]
    Write(#[source] sqlx::Error),
    #[error("read failed: {0}")]
    Read(#[source] sqlx::Error),
    #[error("limit must be a positive integer, got {0}")]
    InvalidLimit(usize),
}

impl StoreError {
    /// Initialization failures are the only fatal store errors
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Init(_))
    }
}

/// Durable, append-only persistence of readings
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Idempotently create the schema. Never destroys existing data.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Persist one reading atomically and return its assigned id
    async fn append(&self, reading: &NewReading) -> Result<i64, StoreError>;

    /// Most recent reading by `received_at`, ties broken by highest id.
    /// `None` when the store is empty.
    async fn latest(&self) -> Result<Option<Reading>, StoreError>;

    /// Up to `limit` readings, newest first (`received_at` desc, `id` desc).
    /// `limit` must be positive and may be capped by the store.
    async fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError>;
}
