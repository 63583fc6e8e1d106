//! Retry configuration, delay calculation, and the shared retry loop.
//!
//! [`RetryConfig`] controls how many times a provider call is attempted
//! and how long to wait in between. [`with_retry`] is the single place
//! retry logic lives; the orchestrator drives both `complete` calls and
//! stream openings through it.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry;
use crate::{ParleyError, Result};

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff capped at `max_delay`:
///
/// ```rust
/// # use parley::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 4s.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 10s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a new config with the default policy (3 attempts, 4s..10s).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate the delay after a failed attempt (0-indexed).
    ///
    /// Uses exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Execute an async operation with retry logic.
///
/// Retries on transient errors (as classified by [`ParleyError::is_transient()`])
/// up to `config.max_attempts`, sleeping with exponential backoff in between.
/// `on_retry` is called before each sleep with the 1-based number of the
/// attempt that just failed.
///
/// Permanent errors are returned immediately without retry.
pub(crate) async fn with_retry<F, Fut, T, R>(
    config: &RetryConfig,
    model: &str,
    operation: &'static str,
    mut on_retry: R,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, &ParleyError),
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => {
                if attempt + 1 < config.max_attempts {
                    metrics::counter!(telemetry::RETRIES_TOTAL,
                        "model" => model.to_owned(),
                        "operation" => operation,
                    )
                    .increment(1);
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        model,
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    on_retry(attempt + 1, &e);
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e), // permanent error, no retry
        }
    }
    Err(last_err.unwrap_or_else(|| ParleyError::transient("no attempts made")))
}
