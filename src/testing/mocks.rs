//! Mock implementations for testing
//!
//! Provides a scripted [`Transport`] and an in-memory [`ReadingStore`] so the
//! subscriber and query paths can be exercised without a broker or a
//! database file.

use crate::reading::{NewReading, Reading};
use crate::store::{ReadingStore, StoreError};
use crate::transport::{InboundMessage, Transport, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Error)]
#[error("mock transport: {0}")]
pub struct MockTransportError(pub String);

#[derive(Debug, Default)]
struct TransportShared {
    connect_failures_remaining: AtomicU32,
    fail_subscribe: AtomicBool,
    connected: AtomicBool,
    connects: AtomicU32,
    disconnects: AtomicU32,
    subscriptions: Mutex<Vec<String>>,
}

/// Mock transport fed through a [`MockTransportHandle`]
#[derive(Debug)]
pub struct MockTransport {
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    shared: Arc<TransportShared>,
}

/// Test-side controls for a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<TransportShared>,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(TransportShared::default());
        (
            Self {
                events_rx,
                shared: shared.clone(),
            },
            MockTransportHandle { events_tx, shared },
        )
    }
}

impl MockTransportHandle {
    /// Deliver a non-retained message
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.send(TransportEvent::Message(InboundMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            retain: false,
        }));
    }

    pub fn publish_retained(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.send(TransportEvent::Message(InboundMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            retain: true,
        }));
    }

    /// Simulate the broker going away
    pub fn drop_connection(&self, reason: &str) {
        self.send(TransportEvent::ConnectionLost(reason.to_string()));
    }

    fn send(&self, event: TransportEvent) {
        // Receiver gone means the subscriber was dropped; nothing to deliver to
        let _ = self.events_tx.send(event);
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: u32) {
        self.shared
            .connect_failures_remaining
            .store(n, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.shared.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> u32 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.shared.subscriptions).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        let remaining = self.shared.connect_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.shared
                .connect_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(MockTransportError("Mock connection failure".to_string()));
        }

        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(MockTransportError("Not connected".to_string()));
        }
        if self.shared.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MockTransportError("Mock subscribe failure".to_string()));
        }

        lock(&self.shared.subscriptions).push(topic.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return TransportEvent::ConnectionLost("Not connected".to_string());
        }

        match self.events_rx.recv().await {
            Some(TransportEvent::ConnectionLost(reason)) => {
                self.shared.connected.store(false, Ordering::SeqCst);
                TransportEvent::ConnectionLost(reason)
            }
            Some(event) => event,
            // Every handle is gone: stay quiet until the caller shuts down
            None => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory reading store with failure injection
#[derive(Debug)]
pub struct MockStore {
    readings: Mutex<Vec<Reading>>,
    max_history: usize,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
    append_delay: Mutex<Option<Duration>>,
    initialized: AtomicBool,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::with_max_history(1000)
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            readings: Mutex::new(Vec::new()),
            max_history,
            fail_appends: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            append_delay: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every append take at least `delay`
    pub fn set_append_delay(&self, delay: Option<Duration>) {
        *lock(&self.append_delay) = delay;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Everything appended so far, in append order
    pub fn readings(&self) -> Vec<Reading> {
        lock(&self.readings).clone()
    }

    fn newest_first(&self) -> Vec<Reading> {
        let mut readings = self.readings();
        readings.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        readings
    }
}

#[async_trait]
impl ReadingStore for MockStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn append(&self, reading: &NewReading) -> Result<i64, StoreError> {
        let delay = *lock(&self.append_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Write(sqlx::Error::Protocol(
                "Mock write failure".to_string(),
            )));
        }

        let mut readings = lock(&self.readings);
        let id = readings.last().map_or(1, |last| last.id + 1);
        readings.push(reading.clone().into_reading(id));
        Ok(id)
    }

    async fn latest(&self) -> Result<Option<Reading>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read(sqlx::Error::Protocol(
                "Mock read failure".to_string(),
            )));
        }
        Ok(self.newest_first().into_iter().next())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        if limit == 0 {
            return Err(StoreError::InvalidLimit(limit));
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read(sqlx::Error::Protocol(
                "Mock read failure".to_string(),
            )));
        }

        let mut readings = self.newest_first();
        readings.truncate(limit.min(self.max_history));
        Ok(readings)
    }
}
