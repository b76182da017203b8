//! Retry and backoff for transient failures
//!
//! [`ExponentialBackoff`] computes delays for the transaction retry engine and
//! [`retry`] drives generic re-attempts such as the network monitor's forced
//! connectivity probe.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::abstractions::Clock;

/// Delay of `base * multiplier^(attempt - 1)`, capped at `max`
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self { base, max, multiplier }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powf(attempt.saturating_sub(1) as f64);
        let delay_ms = self.base.as_millis() as f64 * factor;
        if !delay_ms.is_finite() || delay_ms >= self.max.as_millis() as f64 {
            return self.max;
        }
        std::cmp::min(Duration::from_millis(delay_ms as u64), self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30), 2.0)
    }
}

/// Configuration for [`retry`]
#[derive(Debug, Clone)]
pub struct RetryConfig<E> {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    pub backoff: ExponentialBackoff,
    /// Decides whether a failure is worth another attempt
    pub is_retryable: fn(&E) -> bool,
    pub operation_name: String,
}

impl<E> RetryConfig<E> {
    pub fn new(operation_name: impl Into<String>, max_attempts: u32, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            is_retryable: |_| true,
            operation_name: operation_name.into(),
        }
    }

    pub fn with_retryable(mut self, is_retryable: fn(&E) -> bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }
}

/// Retry an async operation, sleeping through `clock` between attempts
pub async fn retry<F, Fut, T, E>(config: &RetryConfig<E>, clock: &dyn Clock, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %config.operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if attempt >= config.max_attempts || !(config.is_retryable)(&error) {
                    debug!(operation = %config.operation_name, attempt, error = %error, "Giving up");
                    return Err(error);
                }
                let delay = config.backoff.delay(attempt);
                warn!(
                    "Retry attempt {}/{} for {} after error: {} (waiting {:?})",
                    attempt, config.max_attempts, config.operation_name, error, delay
                );
                clock.sleep(delay).await;
            }
        }
    }
}
