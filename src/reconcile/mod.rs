// ============================================================================
// Range Reconciliation Engine
// ============================================================================
//
// Turns a sequence of selected ranges into incremental changes. When the new
// range overlaps the previous one only the slices between the old and new
// edges are queried; otherwise the engine replays the log from the session
// start and rebuilds its state.
//
// Slice queries are widened by the query buffer and their results filtered
// back to the slice, since a batch may be stamped later than the events it
// carries.
//
// ============================================================================

pub mod engine;
pub mod result;
mod slice;

pub use engine::ReconcileEngine;
pub use result::{Changes, DeltaEvent, DeltaKind, ReconcileResult, SAMPLING_INFO_MESSAGE};
