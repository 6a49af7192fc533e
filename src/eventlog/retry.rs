use super::LogResponse;
use crate::core::{QueryRange, Result, SliceKind, TrackerError};
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;

/// Bounded retry for log queries that report NOT_READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `fetch` until it succeeds, fails, or the attempts run out.
    ///
    /// `range` and `slice` only label the error so the consumer can tell
    /// which part of a reconciliation gave up.
    pub async fn run<T, F, Fut>(&self, range: QueryRange, slice: SliceKind, mut fetch: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LogResponse<T>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match fetch().await {
                LogResponse::Success(value) => return Ok(value),
                LogResponse::Failure(reason) => {
                    return Err(TrackerError::LogFailure {
                        range,
                        slice,
                        reason,
                    });
                }
                LogResponse::NotReady => {
                    if attempts >= self.max_attempts {
                        warn!(
                            "{} slice {} not ready after {} attempts, giving up",
                            slice, range, attempts
                        );
                        return Err(TrackerError::LoadFailure {
                            range,
                            slice,
                            attempts,
                        });
                    }
                    debug!("{} slice {} not ready (attempt {})", slice, range, attempts);
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(20, Duration::from_millis(50))
    }
}
