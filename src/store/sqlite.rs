//! SQLite-backed reading store
//!
//! WAL journaling lets readers run against a consistent snapshot while the
//! subscriber appends, and every append is a single INSERT, so a query never
//! observes a half-written row.

use super::{ReadingStore, StoreError};
use crate::config::StoreSection;
use crate::reading::{NewReading, Reading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sensor_readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL CHECK (length(device_id) > 0),
    temperature REAL NOT NULL,
    humidity REAL NOT NULL,
    location TEXT NOT NULL,
    received_at INTEGER NOT NULL
)
"#;

const CREATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sensor_readings_received_at
    ON sensor_readings (received_at DESC, id DESC)
"#;

const INSERT_READING: &str = r#"
INSERT INTO sensor_readings (device_id, temperature, humidity, location, received_at)
VALUES (?, ?, ?, ?, ?)
"#;

const SELECT_RECENT: &str = r#"
SELECT id, device_id, temperature, humidity, location, received_at
FROM sensor_readings
ORDER BY received_at DESC, id DESC
LIMIT ?
"#;

/// Reading store over an SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_history: usize,
}

impl SqliteStore {
    /// Open (creating if missing) the database described by `config`.
    ///
    /// Fails with [`StoreError::Init`] when the file cannot be opened or created.
    pub async fn open(config: &StoreSection) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(StoreError::Init)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(StoreError::Init)?;

        info!(database_url = %config.database_url, "Opened reading store");

        Ok(Self {
            pool,
            max_history: config.max_history,
        })
    }

    /// Build a store from an existing pool (tests, embedding)
    pub fn from_pool(pool: SqlitePool, max_history: usize) -> Self {
        Self { pool, max_history }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Clamp a requested limit to the configured maximum (pure function)
    fn effective_limit(requested: usize, max_history: usize) -> Result<usize, StoreError> {
        if requested == 0 {
            return Err(StoreError::InvalidLimit(requested));
        }
        Ok(requested.min(max_history))
    }
}

fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

fn reading_from_row(row: &SqliteRow) -> Result<Reading, sqlx::Error> {
    let micros: i64 = row.try_get("received_at")?;
    let received_at =
        DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "received_at".to_string(),
            source: format!("timestamp {micros}us is out of range").into(),
        })?;

    Ok(Reading {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        temperature: row.try_get("temperature")?,
        humidity: row.try_get("humidity")?,
        location: row.try_get("location")?,
        received_at,
    })
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Init)?;
        sqlx::query(CREATE_TABLE)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Init)?;
        sqlx::query(CREATE_INDEX)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Init)?;
        tx.commit().await.map_err(StoreError::Init)?;

        debug!("Reading store schema ensured");
        Ok(())
    }

    async fn append(&self, reading: &NewReading) -> Result<i64, StoreError> {
        let result = sqlx::query(INSERT_READING)
            .bind(reading.device_id())
            .bind(reading.temperature())
            .bind(reading.humidity())
            .bind(reading.location())
            .bind(to_micros(reading.received_at()))
            .execute(&self.pool)
            .await
            .map_err(StoreError::Write)?;

        Ok(result.last_insert_rowid())
    }

    async fn latest(&self) -> Result<Option<Reading>, StoreError> {
        let row = sqlx::query(SELECT_RECENT)
            .bind(1_i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Read)?;

        row.as_ref()
            .map(reading_from_row)
            .transpose()
            .map_err(StoreError::Read)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        let limit = Self::effective_limit(limit, self.max_history)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(SELECT_RECENT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Read)?;

        rows.iter()
            .map(reading_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    async fn temp_store(max_history: usize) -> (SqliteStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreSection {
            database_url: format!("sqlite://{}", dir.path().join("readings.db").display()),
            max_history,
            ..StoreSection::default()
        };
        let store = SqliteStore::open(&config).await.unwrap();
        store.initialize().await.unwrap();
        (store, dir)
    }

    fn reading(device_id: &str, temperature: f64, received_at: DateTime<Utc>) -> NewReading {
        let payload = serde_json::json!({
            "device_id": device_id,
            "temperature": temperature,
            "humidity": 40.0,
            "location": "lab",
        });
        NewReading::from_payload(payload.to_string().as_bytes(), received_at).unwrap()
    }

    #[test]
    fn test_effective_limit() {
        assert!(matches!(
            SqliteStore::effective_limit(0, 10),
            Err(StoreError::InvalidLimit(0))
        ));
        assert_eq!(SqliteStore::effective_limit(5, 10).unwrap(), 5);
        assert_eq!(SqliteStore::effective_limit(50, 10).unwrap(), 10);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_and_keeps_data() {
        let (store, _dir) = temp_store(100).await;
        store.append(&reading("dev1", 20.0, Utc::now())).await.unwrap();

        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let (store, _dir) = temp_store(100).await;
        let now = Utc::now();

        let first = store.append(&reading("a", 1.0, now)).await.unwrap();
        let second = store.append(&reading("b", 2.0, now)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_latest_breaks_ties_by_id() {
        let (store, _dir) = temp_store(100).await;
        let now = Utc::now();

        store.append(&reading("first", 1.0, now)).await.unwrap();
        let second_id = store.append(&reading("second", 2.0, now)).await.unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.id, second_id);
        assert_eq!(latest.device_id, "second");
    }

    #[tokio::test]
    async fn test_latest_prefers_received_at_over_id() {
        let (store, _dir) = temp_store(100).await;
        let now = Utc::now();

        store.append(&reading("newer", 1.0, now)).await.unwrap();
        store
            .append(&reading("older", 2.0, now - ChronoDuration::seconds(30)))
            .await
            .unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.device_id, "newer");
    }

    #[tokio::test]
    async fn test_nanosecond_stamp_round_trips_unchanged() {
        let (store, _dir) = temp_store(100).await;
        let stamped = DateTime::<Utc>::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let new_reading = reading("dev1", 1.0, stamped);

        let id = store.append(&new_reading).await.unwrap();
        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest, new_reading.clone().into_reading(id));
        assert_eq!(store.recent(1).await.unwrap()[0].received_at, new_reading.received_at());
    }

    #[tokio::test]
    async fn test_timestamp_survives_storage_at_microsecond_precision() {
        let (store, _dir) = temp_store(100).await;
        let received_at = DateTime::<Utc>::from_timestamp_micros(1_700_000_000_123_456).unwrap();

        store.append(&reading("dev1", 1.0, received_at)).await.unwrap();
        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.received_at, received_at);
    }

    #[tokio::test]
    async fn test_recent_is_capped_by_max_history() {
        let (store, _dir) = temp_store(3).await;
        let start = Utc::now();
        for i in 0..5 {
            store
                .append(&reading("dev", i as f64, start + ChronoDuration::seconds(i)))
                .await
                .unwrap();
        }

        let recent = store.recent(50).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].temperature, 4.0);
    }

    #[tokio::test]
    async fn test_recent_rejects_zero_limit() {
        let (store, _dir) = temp_store(10).await;
        assert!(matches!(
            store.recent(0).await,
            Err(StoreError::InvalidLimit(0))
        ));
    }

    #[tokio::test]
    async fn test_open_unwritable_location_is_init_error() {
        let config = StoreSection {
            database_url: "sqlite:///nonexistent-dir/for/sure/readings.db".to_string(),
            ..StoreSection::default()
        };
        let err = SqliteStore::open(&config).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, StoreError::Init(_)));
    }
}
