// ============================================================================
// Event Log Interface
// ============================================================================
//
// The allocation event log is an external, append-only service. The tracker
// only ever reads from it, one time slice at a time. Responses may be
// NOT_READY while the agent is still flushing batches; callers retry through
// `RetryPolicy`.
//
// ============================================================================

pub mod memory;
pub mod retry;

pub use memory::InMemoryEventLog;
pub use retry::RetryPolicy;

use crate::core::{ContextBatch, EventBatch, JniRefEvent, SamplingChange, Timestamp};
use async_trait::async_trait;

/// Status-carrying reply from the event log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogResponse<T> {
    Success(T),
    /// Data for the slice has not been materialized yet. Retry later.
    NotReady,
    /// Terminal failure reported by the log.
    Failure(String),
}

impl<T> LogResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, LogResponse::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LogResponse<U> {
        match self {
            LogResponse::Success(value) => LogResponse::Success(f(value)),
            LogResponse::NotReady => LogResponse::NotReady,
            LogResponse::Failure(reason) => LogResponse::Failure(reason),
        }
    }
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Event batches whose envelope timestamp lies in `[start, end)`, ordered
    /// by envelope timestamp.
    async fn events(&self, start: Timestamp, end: Timestamp) -> LogResponse<Vec<EventBatch>>;

    /// Context batches whose timestamp lies in `[start, end)`. Every id an
    /// event references is described by a context batch at or before the
    /// event's own batch.
    async fn contexts(&self, start: Timestamp, end: Timestamp)
    -> LogResponse<Vec<ContextBatch>>;

    /// Sampling changes affecting `[start, end)`, including the one already in
    /// effect at `start`.
    async fn sampling_changes(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> LogResponse<Vec<SamplingChange>>;

    /// JNI global reference events with timestamps in `[start, end)`, ordered
    /// by timestamp. Logs that do not record references report none.
    async fn jni_ref_events(
        &self,
        _start: Timestamp,
        _end: Timestamp,
    ) -> LogResponse<Vec<JniRefEvent>> {
        LogResponse::Success(Vec::new())
    }
}
