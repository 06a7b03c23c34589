//! Bounded retry with exponential backoff for transient failures

use ferry_core::{FerryError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff calculator.
///
/// Delay grows by `multiplier` per attempt, capped at `max_delay_ms`, with
/// optional jitter to spread retries from concurrent jobs.
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter: bool,
}

impl BackoffStrategy {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms: initial_delay_ms.max(1),
            max_delay_ms: max_delay_ms.max(initial_delay_ms),
            multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given retry attempt (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt as i32);
        let base = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter {
            // +/- 25% spread so retrying jobs don't hammer in lockstep
            let factor = 0.75 + rand_simple() * 0.5;
            (base * factor).min(self.max_delay_ms as f64)
        } else {
            base
        };

        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::new(1000, 10_000)
    }
}

/// Cheap pseudo-random in [0, 1) from the system clock, good enough for
/// jitter spreading.
fn rand_simple() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Retry policy for transient errors: a fixed attempt budget over a
/// [`BackoffStrategy`].
///
/// Only errors classified retryable by [`FerryError::is_retryable`] are
/// retried; everything else fails the operation on first occurrence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation`, retrying transient failures up to the attempt budget.
    ///
    /// `label` names the operation in log output.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.calculate_delay(attempt);
                    warn!(
                        operation = label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(
                        operation = label,
                        attempt = attempt + 1,
                        retryable = err.is_retryable(),
                        "operation failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffStrategy::default())
    }
}

/// Classify a timeout elapse as a retryable error.
pub fn timeout_error(label: &str, limit: Duration) -> FerryError {
    FerryError::Timeout(format!(
        "{} did not complete within {}ms",
        label,
        limit.as_millis()
    ))
}
