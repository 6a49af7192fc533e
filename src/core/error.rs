use super::types::{QueryRange, SliceKind, Tag, Timestamp};
use thiserror::Error;

/// Which kind of context metadata an event referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Class,
    Callstack,
    Thread,
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextKind::Class => write!(f, "class"),
            ContextKind::Callstack => write!(f, "callstack"),
            ContextKind::Thread => write!(f, "thread"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Load failure: {slice} slice {range} still not ready after {attempts} attempts")]
    LoadFailure {
        range: QueryRange,
        slice: SliceKind,
        attempts: u32,
    },

    #[error("Event log failure on {slice} slice {range}: {reason}")]
    LogFailure {
        range: QueryRange,
        slice: SliceKind,
        reason: String,
    },

    #[error("Missing context: {kind} {id} was never resolved")]
    MissingContext { kind: ContextKind, id: i64 },

    #[error("Unknown tag {tag}: no live instance at {timestamp}")]
    UnknownTag { tag: Tag, timestamp: Timestamp },

    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: Timestamp, end: Timestamp },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Load worker is not running")]
    WorkerStopped,
}

impl TrackerError {
    /// Terminal errors abort the current reconciliation; everything else is
    /// handled where it is raised.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackerError::UnknownTag { .. })
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

impl<T> From<std::sync::PoisonError<T>> for TrackerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
