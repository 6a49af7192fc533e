// ============================================================================
// Live Allocation Tracker
// ============================================================================
//
// Public entry point. The engine lives on a background worker owned by the
// load scheduler; callers post ranges and consume load events in order.
//
// ============================================================================

pub mod config;
pub mod scheduler;

pub use config::TrackerConfig;
pub use scheduler::{LoadEvent, LoadScheduler, ReconcileFailure, SchedulerStats};

use crate::context::FrameLookup;
use crate::core::{MethodId, QueryRange, Result, StackFrame, Timestamp, TrackerError};
use crate::eventlog::EventLog;
use crate::reconcile::{ReconcileEngine, ReconcileResult};
use log::info;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Tracks the live allocations of one capture session.
///
/// # Examples
///
/// ```
/// use livealloc::{InMemoryEventLog, LiveAllocationTracker, TrackerConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> livealloc::Result<()> {
/// let log = Arc::new(InMemoryEventLog::new());
/// let mut tracker = LiveAllocationTracker::new(log, TrackerConfig::default())?;
///
/// tracker.set_range(0, 1_000)?;
/// let result = tracker.next_result().await.expect("worker running")?;
/// assert!(result.reset);
/// tracker.shutdown().await
/// # }
/// ```
pub struct LiveAllocationTracker {
    scheduler: LoadScheduler,
    events: mpsc::UnboundedReceiver<LoadEvent>,
    frames: FrameLookup,
    config: TrackerConfig,
}

impl LiveAllocationTracker {
    /// Create a tracker reading from `log` and start its load worker.
    /// Must be called within a tokio runtime.
    pub fn new(log: Arc<dyn EventLog>, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| {
            TrackerError::Config("tracker must be created inside a tokio runtime".to_string())
        })?;

        let engine = ReconcileEngine::new(log, &config);
        let frames = engine.frame_lookup();
        let (events_tx, events) = mpsc::unbounded_channel();
        let scheduler = LoadScheduler::spawn(engine, events_tx);

        info!(
            "live allocation tracker started (session start {}, buffer {:?})",
            config.session_start, config.query_buffer
        );
        Ok(Self {
            scheduler,
            events,
            frames,
            config,
        })
    }

    /// Select `[start, end)`. The load runs in the background; returns false
    /// if the same range is already queued or loading.
    pub fn set_range(&self, start: Timestamp, end: Timestamp) -> Result<bool> {
        let range = QueryRange::new(start, end)?;
        self.scheduler.request(range)
    }

    /// Next load event, or None once the worker has stopped.
    pub async fn next_event(&mut self) -> Option<LoadEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<LoadEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next load to finish, skipping start notifications.
    pub async fn next_result(&mut self) -> Option<Result<ReconcileResult>> {
        loop {
            match self.events.recv().await? {
                LoadEvent::Started(_) => continue,
                LoadEvent::Completed(result) => return Some(Ok(result)),
                LoadEvent::Failed(failure) => return Some(Err(failure.error)),
            }
        }
    }

    /// Resolve a method id against the frames loaded so far.
    pub fn lookup_callstack_frame(&self, method_id: MethodId) -> Result<Option<StackFrame>> {
        self.frames.get(method_id)
    }

    pub fn frame_lookup(&self) -> FrameLookup {
        self.frames.clone()
    }

    pub fn stats(&self) -> Result<SchedulerStats> {
        self.scheduler.stats()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Stop the worker, letting a load in progress finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("live allocation tracker shutting down");
        self.scheduler.stop().await
    }
}
