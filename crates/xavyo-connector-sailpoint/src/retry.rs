//! Exponential backoff retry policy for outbound SailPoint requests.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{SailPointError, SailPointResult};

/// Retry policy wrapped around every outbound call.
///
/// The delay before retry `n` (1-based) is `multiplier * 2^(n-1)` seconds,
/// clamped into `[min_delay, max_delay]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff multiplier in seconds.
    pub multiplier: f64,
    /// Lower bound of a single backoff delay.
    pub min_delay: Duration,
    /// Upper bound of a single backoff delay.
    pub max_delay: Duration,
    /// HTTP status codes that are retried. Network failures are always retried.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier: 1.0,
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Creates a policy optimized for testing (millisecond delays).
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            multiplier: 0.001,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Self::default()
        }
    }

    /// A policy that gives up after the first failure.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Validates the policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.max_delay < self.min_delay {
            return Err("max_delay must be >= min_delay".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 0.0 {
            return Err("multiplier must be a non-negative number".to_string());
        }
        Ok(())
    }

    /// Whether a failed attempt is worth repeating.
    #[must_use]
    pub fn is_retryable(&self, error: &SailPointError) -> bool {
        match error {
            SailPointError::Api {
                status_code: None, ..
            } => true,
            SailPointError::Api {
                status_code: Some(status),
                ..
            } => self.retryable_statuses.contains(status),
            _ => false,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let secs = self.multiplier * f64::from(1u32 << exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .clamp(self.min_delay, self.max_delay)
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> SailPointResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SailPointResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.is_retryable(&error) {
                        return Err(error);
                    }
                    if attempt >= self.max_attempts {
                        warn!(
                            operation,
                            attempts = attempt,
                            error = %error,
                            "Retry attempts exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
