// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exponential backoff for transient remote failures.
//!
//! The sync engine keeps a [`Backoff`] across drain attempts: every transient
//! failure of the front operation lengthens the wait, every success resets
//! it. One-shot reads such as the startup refresh use [`retry`] instead.
//!
//! # Example
//!
//! ```
//! use taskrank_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Daemon: never give up on the queue
//! let daemon = RetryConfig::daemon();
//! assert_eq!(daemon.max_retries, None);
//!
//! // Query: quick retry, then fail
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, Some(3));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::RemoteError;

/// Delay policy for retrying remote calls.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::daemon()`] - Infinite retry for the drain loop
/// - [`RetryConfig::query()`] - Quick retry for one-shot reads
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::daemon()
    }
}

impl RetryConfig {
    /// Infinite retry, capped at 5 minutes. Queued operations are never
    /// abandoned because the network is flaky.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
        }
    }

    /// 3 attempts with fast backoff, then the caller handles it.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Minimal delays for tests
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Build from millisecond settings, as read from configuration.
    #[must_use]
    pub fn from_millis(initial_ms: u64, max_ms: u64, factor: f64) -> Self {
        let initial_delay = Duration::from_millis(initial_ms.max(1));
        Self {
            max_retries: None,
            initial_delay,
            max_delay: Duration::from_millis(max_ms).max(initial_delay),
            factor: if factor >= 1.0 { factor } else { 1.0 },
        }
    }
}

/// Running backoff state: `initial * factor^n`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    next: Duration,
    attempts: usize,
}

impl Backoff {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let next = config.initial_delay;
        Self { config, next, attempts: 0 }
    }

    /// The delay to wait now; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.mul_f64(self.config.factor).min(self.config.max_delay);
        self.attempts += 1;
        delay
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.next = self.config.initial_delay;
        self.attempts = 0;
    }
}

/// Run `operation`, retrying transient failures per `config`.
///
/// Non-retryable errors return immediately.
pub async fn retry<F, Fut, T>(operation_name: &str, config: &RetryConfig, mut operation: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut backoff = Backoff::new(config.clone());

    loop {
        match operation().await {
            Ok(val) => {
                if backoff.attempts() > 0 {
                    info!(operation = operation_name, retries = backoff.attempts(), "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                let delay = backoff.next_delay();
                if let Some(max) = config.max_retries {
                    if backoff.attempts() >= max {
                        return Err(err);
                    }
                }
                warn!(
                    operation = operation_name,
                    attempt = backoff.attempts(),
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = retry("list_tasks", &RetryConfig::test(), || {
            let a = attempts_clone.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(RemoteError::Transient(format!("fail {}", count)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), _> = retry("list_tasks", &RetryConfig::test(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Transient("always fail".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_rejection() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<(), _> = retry("list_tasks", &RetryConfig::test(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Unauthorized)
            }
        })
        .await;

        assert_eq!(result, Err(RemoteError::Unauthorized));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_exponential_then_capped() {
        let mut backoff = Backoff::new(RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
            max_retries: None,
        });

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.attempts(), 4);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_millis_sanitizes() {
        let config = RetryConfig::from_millis(0, 0, 0.5);
        assert_eq!(config.initial_delay, Duration::from_millis(1));
        assert_eq!(config.max_delay, Duration::from_millis(1));
        assert_eq!(config.factor, 1.0);
        assert!(config.max_retries.is_none());
    }
}
