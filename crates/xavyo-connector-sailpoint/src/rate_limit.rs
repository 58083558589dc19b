//! Minimum spacing between outbound SailPoint requests.
//!
//! Requests issued faster than the configured interval are delayed, never
//! dropped. There is no token bucket: the source API publishes a flat
//! per-tenant rate, so one slot per interval is enough.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Enforces a minimum interval between consecutive requests.
#[derive(Debug)]
pub struct RequestSpacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestSpacer {
    /// Creates a spacer with the given minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Returns the configured interval.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the next request slot is free and claims it.
    ///
    /// Returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let now = Instant::now();

        let waited = match *last {
            Some(previous) => {
                let ready_at = previous + self.min_interval;
                if ready_at > now {
                    let wait = ready_at - now;
                    trace!(wait_ms = wait.as_millis() as u64, "Spacing request");
                    tokio::time::sleep_until(ready_at).await;
                    wait
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };

        *last = Some(Instant::now());
        waited
    }
}
