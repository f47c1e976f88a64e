//! Retry with exponential backoff for transient external-call failures

use crate::config::TimeoutConfig;
use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Attempt count and backoff bounds
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn from_config(timeouts: &TimeoutConfig) -> Self {
        Self {
            max_attempts: timeouts.retry_attempts.max(1),
            initial_delay: Duration::from_millis(timeouts.retry_initial_delay_ms),
            max_delay: Duration::from_millis(timeouts.retry_max_delay_ms),
        }
    }
}

/// Retry an operation while it fails with a transient error
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. On success, return result
/// 3. On a transient error (`Error::is_transient`) with attempts left:
///    log WARN, sleep, double the delay (capped at `max_delay`), retry
/// 4. On a permanent error, or once attempts are exhausted, return the
///    last error unchanged
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Operation failed: retries exhausted"
                    );
                    return Err(err);
                }

                let wait = delay.min(policy.max_delay);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = wait.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

/// Map a `tokio::time::timeout` expiry into `Error::Timeout`
pub async fn with_timeout<T>(
    operation_name: &str,
    limit: Duration,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation_name.to_string(),
            limit,
        }),
    }
}
