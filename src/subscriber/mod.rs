//! Telemetry subscriber
//!
//! [`Subscriber::run`] is a single pull loop over [`Transport::next_event`]:
//! connect, subscribe to the one configured topic, then decode, validate and
//! append each message in arrival order. Any connection-level failure drops
//! the subscriber back to [`SubscriberState::Disconnected`] and the backoff
//! cycle starts again. Only shutdown ends the loop.

pub mod backoff;

pub use backoff::{interruptible_sleep, wait_for_shutdown, BackoffPolicy, ReconnectionDecision};

use crate::observability::metrics::metrics;
use crate::reading::{IngestClock, NewReading, PayloadError};
use crate::store::{ReadingStore, StoreError};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{InboundMessage, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Connection lifecycle of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Subscribed,
}

impl SubscriberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Disconnected => "disconnected",
            SubscriberState::Connecting => "connecting",
            SubscriberState::Subscribed => "subscribed",
        }
    }
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one inbound message
#[derive(Debug)]
pub enum MessageOutcome {
    /// Persisted under `id`
    Stored { id: i64 },
    /// Retained replay or foreign topic
    Ignored,
    /// Payload failed decoding or validation; dropped
    Rejected(PayloadError),
    /// Store refused the append; dropped
    WriteFailed(StoreError),
}

impl MessageOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, MessageOutcome::Stored { .. })
    }
}

/// Why the receive loop returned
#[derive(Debug)]
enum ReceiveExit {
    Shutdown,
    ConnectionLost(String),
}

/// Drives one transport into one store
pub struct Subscriber<T: Transport, S: ReadingStore> {
    transport: T,
    store: Arc<S>,
    topic: String,
    backoff: BackoffPolicy,
    clock: IngestClock,
    state_tx: watch::Sender<SubscriberState>,
}

impl<T: Transport, S: ReadingStore> Subscriber<T, S> {
    pub fn new(transport: T, store: Arc<S>, topic: impl Into<String>, backoff: BackoffPolicy) -> Self {
        let (state_tx, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            transport,
            store,
            topic: topic.into(),
            backoff,
            clock: IngestClock::new(),
            state_tx,
        }
    }

    /// Observe state transitions
    pub fn state(&self) -> watch::Receiver<SubscriberState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> SubscriberState {
        *self.state_tx.borrow()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn set_state(&self, state: SubscriberState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Subscriber state transition");
        }
        metrics().set_subscriber_state(state.as_str());
    }

    /// Run until `shutdown_rx` turns true (or its sender is dropped).
    ///
    /// A message already being processed when shutdown arrives is finished
    /// before this returns.
    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut failed_attempts: u32 = 0;

        loop {
            if failed_attempts > 0 {
                let shutdown_requested = *shutdown_rx.borrow();
                match self
                    .backoff
                    .should_attempt_reconnection(failed_attempts, shutdown_requested)
                {
                    ReconnectionDecision::Proceed { attempt, delay_ms } => {
                        info!(attempt, delay_ms, "Reconnecting after backoff");
                        let delay = self.backoff.delay_for(attempt);
                        if !interruptible_sleep(&mut shutdown_rx, delay).await {
                            break;
                        }
                    }
                    ReconnectionDecision::AbortShutdownRequested => break,
                }
            }

            let attempt = BackoffPolicy::next_attempt(failed_attempts);
            let span = crate::mqtt_span!(attempt = attempt, topic = %self.topic);
            let connected = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                result = self.connect_and_subscribe().instrument(span) => result,
            };

            if let Err(e) = connected {
                metrics().mqtt_connection_failed();
                warn!(attempt, error = %e, "Failed to connect and subscribe");
                self.set_state(SubscriberState::Disconnected);
                failed_attempts = attempt;
                continue;
            }

            metrics().mqtt_subscribed();
            self.set_state(SubscriberState::Subscribed);
            info!(topic = %self.topic, "Subscribed, ingesting readings");

            match self.receive_loop(&mut shutdown_rx).await {
                ReceiveExit::Shutdown => {
                    if let Err(e) = self.transport.disconnect().await {
                        debug!("Disconnect during shutdown failed: {}", e);
                    }
                    break;
                }
                ReceiveExit::ConnectionLost(reason) => {
                    metrics().mqtt_connection_lost();
                    warn!(reason = %reason, "Connection lost");
                    self.set_state(SubscriberState::Disconnected);
                    // Backoff restarts from the first step after a good session
                    failed_attempts = 1;
                }
            }
        }

        self.set_state(SubscriberState::Disconnected);
        info!("Subscriber stopped");
    }

    async fn connect_and_subscribe(&mut self) -> Result<(), T::Error> {
        self.set_state(SubscriberState::Connecting);
        metrics().mqtt_connection_attempt();

        self.transport.connect().await?;
        metrics().mqtt_connection_established();

        if let Err(e) = self.transport.subscribe(&self.topic).await {
            if let Err(disconnect_error) = self.transport.disconnect().await {
                debug!("Disconnect after failed subscribe: {}", disconnect_error);
            }
            return Err(e);
        }

        Ok(())
    }

    async fn receive_loop(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> ReceiveExit {
        loop {
            let event = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown_rx) => return ReceiveExit::Shutdown,
                event = self.transport.next_event() => event,
            };

            match event {
                // Not raced against shutdown: an in-flight message always completes
                TransportEvent::Message(message) => {
                    self.handle_message(&message).await;
                }
                TransportEvent::ConnectionLost(reason) => return ReceiveExit::ConnectionLost(reason),
            }
        }
    }

    /// Filter, stamp, validate and persist one inbound message
    pub async fn handle_message(&mut self, message: &InboundMessage) -> MessageOutcome {
        metrics().message_received();

        if !MessageHandler::should_process_message(&message.topic, message.retain, &self.topic) {
            metrics().message_ignored();
            return MessageOutcome::Ignored;
        }

        let received_at = self.clock.now();
        let span = crate::ingest_span!(
            topic = %message.topic,
            payload_bytes = message.payload.len(),
            device_id = tracing::field::Empty,
        );

        ingest(self.store.as_ref(), &message.payload, received_at)
            .instrument(span)
            .await
    }
}

async fn ingest<S: ReadingStore + ?Sized>(
    store: &S,
    payload: &[u8],
    received_at: DateTime<Utc>,
) -> MessageOutcome {
    let reading = match NewReading::from_payload(payload, received_at) {
        Ok(reading) => reading,
        Err(e) => {
            metrics().message_rejected();
            warn!(error = %e, "Dropping malformed message");
            return MessageOutcome::Rejected(e);
        }
    };

    tracing::Span::current().record("device_id", reading.device_id());

    let started = Instant::now();
    match store.append(&reading).await {
        Ok(id) => {
            metrics().reading_stored(started.elapsed());
            info!(
                reading_id = id,
                device_id = %reading.device_id(),
                temperature = reading.temperature(),
                humidity = reading.humidity(),
                "Stored reading"
            );
            MessageOutcome::Stored { id }
        }
        Err(e) => {
            metrics().write_failed();
            error!(device_id = %reading.device_id(), error = %e, "Failed to store reading, dropping message");
            MessageOutcome::WriteFailed(e)
        }
    }
}
