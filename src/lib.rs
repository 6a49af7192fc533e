// ============================================================================
// livealloc Library
// ============================================================================
//
// Incremental live-object tracking over a recorded allocation event log.
// A selection of `[start, end)` yields the objects alive at `start`
// (the snapshot) plus the allocations and frees inside the range (the
// delta); moving the selection only queries what changed.
//
// ============================================================================

pub mod context;
pub mod core;
pub mod eventlog;
pub mod reconcile;
mod registry;
pub mod tracker;

// Re-export main types for convenience
pub use core::{
    AllocatedClass, Allocation, AllocationEvent, ContextBatch, ContextKind, EncodedStack,
    EventBatch, EventKind, JniRefEvent, JniRefKind, QueryRange, Result, SamplingChange, SliceKind,
    StackFrame, ThreadInfo, Timestamp, TrackerError,
};
pub use eventlog::{EventLog, InMemoryEventLog, LogResponse, RetryPolicy};
pub use reconcile::{Changes, DeltaEvent, DeltaKind, ReconcileEngine, ReconcileResult};
pub use registry::{Instance, InstanceId, JniReference};
pub use tracker::{
    LiveAllocationTracker, LoadEvent, ReconcileFailure, SchedulerStats, TrackerConfig,
};
