//! Query service behavior over a real SQLite store

use chrono::{Duration as ChronoDuration, Utc};
use sensor_ingest::query::{QueryError, QueryService, DEFAULT_HISTORY_LIMIT};
use sensor_ingest::reading::truncate_to_storage_precision;
use sensor_ingest::store::ReadingStore;
use std::sync::Arc;

mod test_helpers;
use test_helpers::{new_reading, temp_sqlite_store};

#[tokio::test]
async fn test_latest_on_empty_store_is_no_data() {
    let (store, _dir) = temp_sqlite_store(1000).await;
    let service = QueryService::new(Arc::new(store));

    let err = service.get_latest().await.unwrap_err();
    assert!(matches!(err, QueryError::NoData));
    assert_eq!(err.to_string(), "No data available");
}

#[tokio::test]
async fn test_latest_returns_most_recent_reading() {
    let (store, _dir) = temp_sqlite_store(1000).await;
    let now = truncate_to_storage_precision(Utc::now());
    store
        .append(&new_reading("old", 10.0, now - ChronoDuration::seconds(5)))
        .await
        .unwrap();
    store.append(&new_reading("new", 21.5, now)).await.unwrap();

    let latest = QueryService::new(Arc::new(store)).get_latest().await.unwrap();
    assert_eq!(latest.temperature, 21.5);
    assert_eq!(latest.humidity, 40.0);
    assert_eq!(latest.location, "lab");
    assert_eq!(latest.timestamp, now);
}

#[tokio::test]
async fn test_history_defaults_to_fifty_newest_first() {
    let (store, _dir) = temp_sqlite_store(1000).await;
    let start = Utc::now();
    for i in 0..60 {
        store
            .append(&new_reading("dev", i as f64, start + ChronoDuration::seconds(i)))
            .await
            .unwrap();
    }

    let history = QueryService::new(Arc::new(store))
        .get_history(None)
        .await
        .unwrap();

    assert_eq!(history.len(), DEFAULT_HISTORY_LIMIT);
    assert_eq!(history[0].temperature, 59.0);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].timestamp >= pair[1].timestamp));
}

#[tokio::test]
async fn test_history_is_capped_by_store_maximum() {
    let (store, _dir) = temp_sqlite_store(5).await;
    for i in 0..10 {
        store
            .append(&new_reading("dev", i as f64, Utc::now()))
            .await
            .unwrap();
    }

    let history = QueryService::new(Arc::new(store))
        .get_history(Some(100))
        .await
        .unwrap();
    assert_eq!(history.len(), 5);
}

#[tokio::test]
async fn test_history_entries_serialize_without_location() {
    let (store, _dir) = temp_sqlite_store(1000).await;
    store
        .append(&new_reading("dev", 20.0, Utc::now()))
        .await
        .unwrap();

    let history = QueryService::new(Arc::new(store))
        .get_history(Some(1))
        .await
        .unwrap();
    let json = serde_json::to_value(&history).unwrap();

    let entry = &json[0];
    assert_eq!(entry["temperature"], 20.0);
    assert!(entry["timestamp"].is_string());
    assert!(entry.get("location").is_none());
}

#[tokio::test]
async fn test_queries_run_concurrently() {
    let (store, _dir) = temp_sqlite_store(1000).await;
    store
        .append(&new_reading("dev", 20.0, Utc::now()))
        .await
        .unwrap();
    let service = QueryService::new(Arc::new(store));

    let queries = (0..16).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.get_latest().await.map(|r| r.temperature) })
    });

    for result in futures::future::join_all(queries).await {
        assert_eq!(result.unwrap().unwrap(), 20.0);
    }
}
