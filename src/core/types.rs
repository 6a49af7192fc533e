use super::{Result, TrackerError};
use serde::{Deserialize, Serialize};

/// Nanoseconds on the profiled device's clock.
pub type Timestamp = i64;
/// Runtime-assigned object tag. Unique among live objects only.
pub type Tag = i32;
pub type ClassTag = i32;
pub type StackId = i32;
pub type ThreadId = i32;
pub type MethodId = i64;
pub type HeapId = i32;

/// Deallocation time of an instance that has not been freed (within what
/// the consumer has been told).
pub const NOT_FREED: Timestamp = Timestamp::MAX;

/// Allocation time of an instance whose allocation lies before the window.
pub const ALLOCATED_BEFORE_WINDOW: Timestamp = Timestamp::MIN;

/// Id `0` in an allocation event means "no callstack" / "no thread".
pub const NO_CONTEXT_ID: i32 = 0;

pub const DEFAULT_HEAP_ID: HeapId = 0;
pub const IMAGE_HEAP_ID: HeapId = 1;
pub const ZYGOTE_HEAP_ID: HeapId = 2;
pub const APP_HEAP_ID: HeapId = 3;
pub const JNI_HEAP_ID: HeapId = 4;

const HEAP_NAMES: [&str; 5] = ["default", "image", "zygote", "app", "JNI"];

/// Display name of a heap, `None` for ids the runtime does not report.
pub fn heap_name(heap_id: HeapId) -> Option<&'static str> {
    usize::try_from(heap_id)
        .ok()
        .and_then(|idx| HEAP_NAMES.get(idx).copied())
}

/// Half-open time range `[start, end)` over the event timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl QueryRange {
    /// Create a range, rejecting `start > end`.
    ///
    /// `start == end` is a point selection: it has a snapshot but no delta.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start > end {
            return Err(TrackerError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub(crate) fn between(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> i64 {
        self.end.saturating_sub(self.start).max(0)
    }

    /// Whether the two ranges share at least the boundary region needed for
    /// incremental reconciliation. Touching ranges (`a.end == b.start`) do not.
    pub fn overlaps(&self, other: &QueryRange) -> bool {
        !(other.end <= self.start || self.end <= other.start)
    }

    /// Widen the range by `buffer` on both ends, saturating at the clock limits.
    pub fn widen(&self, buffer: i64) -> QueryRange {
        QueryRange {
            start: self.start.saturating_sub(buffer),
            end: self.end.saturating_add(buffer),
        }
    }
}

impl std::fmt::Display for QueryRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Which part of a reconciliation a log query belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceKind {
    /// Replay from the session start up to the new window start.
    Snapshot,
    /// The whole new window after a hard reset.
    Window,
    /// Window start moved earlier.
    LeftExtend,
    /// Window start moved later.
    LeftRetract,
    /// Window end moved later.
    RightExtend,
    /// Window end moved earlier.
    RightRetract,
    /// Replay that rebuilds instances evicted during a snapshot.
    Recovery,
    Context,
    Sampling,
}

impl SliceKind {
    /// Slices whose events are taken out of the reported delta.
    pub fn is_retraction(&self) -> bool {
        matches!(self, SliceKind::LeftRetract | SliceKind::RightRetract)
    }

    /// Slices that move the window's left edge and therefore also change the
    /// snapshot at the window start.
    pub fn moves_left_edge(&self) -> bool {
        matches!(self, SliceKind::LeftExtend | SliceKind::LeftRetract)
    }
}

impl std::fmt::Display for SliceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SliceKind::Snapshot => "snapshot",
            SliceKind::Window => "window",
            SliceKind::LeftExtend => "left-extend",
            SliceKind::LeftRetract => "left-retract",
            SliceKind::RightExtend => "right-extend",
            SliceKind::RightRetract => "right-retract",
            SliceKind::Recovery => "recovery",
            SliceKind::Context => "context",
            SliceKind::Sampling => "sampling",
        };
        f.write_str(name)
    }
}
