//! Pure reconnection backoff logic
//!
//! The delay for the n-th consecutive failed attempt is taken from a fixed
//! pattern, then held at a sustained delay forever. Retries are unlimited.

use crate::config::SubscriberSection;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Reconnect delay schedule
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delays for the first attempts, in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000, 5000],
            sustained_delay: 5000,
        }
    }
}

impl BackoffPolicy {
    pub fn new(backoff_pattern: Vec<u64>, sustained_delay: u64) -> Self {
        Self {
            backoff_pattern,
            sustained_delay,
        }
    }

    pub fn from_config(config: &SubscriberSection) -> Self {
        Self::new(config.backoff_pattern_ms.clone(), config.sustained_delay_ms)
    }

    /// Delay in milliseconds before `attempt` (1-based) (pure function)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.calculate_backoff_delay(attempt))
    }

    /// Attempt number following `failed_attempts` failures; pins at `u32::MAX`
    pub fn next_attempt(failed_attempts: u32) -> u32 {
        failed_attempts.saturating_add(1)
    }

    /// Determine if reconnection should be attempted (pure function)
    pub fn should_attempt_reconnection(
        &self,
        failed_attempts: u32,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        ReconnectionDecision::Proceed {
            attempt: failed_attempts,
            delay_ms: self.calculate_backoff_delay(failed_attempts),
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Sleep `delay_ms`, then try again
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Resolve once shutdown has been requested or the sender is gone.
///
/// Cancel-safe, so it can be raced in `select!`.
pub async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Perform interruptible sleep with shutdown monitoring.
/// Returns true if sleep completed, false if shutdown requested.
pub async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = wait_for_shutdown(shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pattern_then_sustained() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=8).map(|n| policy.calculate_backoff_delay(n)).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 5000, 5000, 5000, 5000]);
        assert_eq!(policy.calculate_backoff_delay(10_000), 5000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let policy = BackoffPolicy::new(vec![], 750);
        assert_eq!(policy.delay_for(1), Duration::from_millis(750));
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let policy = BackoffPolicy::default();

        assert_eq!(
            policy.should_attempt_reconnection(2, false),
            ReconnectionDecision::Proceed {
                attempt: 2,
                delay_ms: 500
            }
        );
        assert_eq!(
            policy.should_attempt_reconnection(2, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_from_config() {
        let config = SubscriberSection {
            backoff_pattern_ms: vec![10, 20],
            sustained_delay_ms: 30,
            ..SubscriberSection::default()
        };
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy.calculate_backoff_delay(3), 30);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(interruptible_sleep(&mut rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, mut rx) = watch::channel(false);

        let handle =
            tokio::spawn(async move { interruptible_sleep(&mut rx, Duration::from_secs(30)).await });
        tx.send(true).unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_sees_earlier_signal() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(100), wait_for_shutdown(&mut rx))
            .await
            .unwrap();
    }

    #[test]
    fn test_next_attempt_never_overflows() {
        assert_eq!(BackoffPolicy::next_attempt(0), 1);
        assert_eq!(BackoffPolicy::next_attempt(4), 5);
        assert_eq!(BackoffPolicy::next_attempt(u32::MAX), u32::MAX);

        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.calculate_backoff_delay(BackoffPolicy::next_attempt(u32::MAX)),
            5000
        );
    }
}
