// ============================================================================
// Event Log Records
// ============================================================================
//
// Plain records served by the external allocation event log. They carry no
// behavior of their own; the context cache and reconciliation engine give
// them meaning.
//
// ============================================================================

use super::types::{ClassTag, HeapId, MethodId, StackId, Tag, ThreadId, Timestamp};
use serde::{Deserialize, Serialize};

/// Sampling interval that means every allocation is reported.
pub const FULL_TRACKING_INTERVAL: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub tag: Tag,
    pub class_tag: ClassTag,
    pub stack_id: StackId,
    pub thread_id: ThreadId,
    pub size: i64,
    pub heap_id: HeapId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Alloc(Allocation),
    Free { tag: Tag },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEvent {
    pub timestamp: Timestamp,
    pub kind: EventKind,
}

impl AllocationEvent {
    pub fn alloc(timestamp: Timestamp, allocation: Allocation) -> Self {
        Self {
            timestamp,
            kind: EventKind::Alloc(allocation),
        }
    }

    pub fn free(timestamp: Timestamp, tag: Tag) -> Self {
        Self {
            timestamp,
            kind: EventKind::Free { tag },
        }
    }

    pub fn tag(&self) -> Tag {
        match &self.kind {
            EventKind::Alloc(allocation) => allocation.tag,
            EventKind::Free { tag } => *tag,
        }
    }

    pub fn is_alloc(&self) -> bool {
        matches!(self.kind, EventKind::Alloc(_))
    }
}

/// A batch of events as delivered by the agent. The envelope timestamp is at
/// or after every event timestamp inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    pub timestamp: Timestamp,
    pub events: Vec<AllocationEvent>,
}

impl EventBatch {
    pub fn new(timestamp: Timestamp, events: Vec<AllocationEvent>) -> Self {
        Self { timestamp, events }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedClass {
    pub class_id: ClassTag,
    #[serde(default)]
    pub classloader_id: i64,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    pub method_id: MethodId,
    pub method_name: String,
    pub class_name: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub line_number: i32,
}

/// Call stack encoded as the method ids of its frames, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedStack {
    pub stack_id: StackId,
    pub method_ids: Vec<MethodId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: ThreadId,
    pub thread_name: String,
}

/// Metadata introduced by the agent up to `timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBatch {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub classes: Vec<AllocatedClass>,
    #[serde(default)]
    pub methods: Vec<StackFrame>,
    #[serde(default)]
    pub stacks: Vec<EncodedStack>,
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
}

/// Allocation sampling interval in effect from `timestamp` onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingChange {
    pub timestamp: Timestamp,
    pub sampling_interval: i32,
}

impl SamplingChange {
    pub fn is_full_tracking(&self) -> bool {
        self.sampling_interval == FULL_TRACKING_INTERVAL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JniRefKind {
    CreateGlobalRef,
    DeleteGlobalRef,
}

/// A JNI global reference created on, or deleted from, a tagged object.
///
/// References are identified by `(object_tag, ref_value)`; the object the
/// tag names at `timestamp` is the reference's referent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JniRefEvent {
    pub timestamp: Timestamp,
    pub kind: JniRefKind,
    pub object_tag: Tag,
    pub ref_value: i64,
    #[serde(default)]
    pub thread_id: ThreadId,
}

impl JniRefEvent {
    pub fn create(timestamp: Timestamp, object_tag: Tag, ref_value: i64) -> Self {
        Self {
            timestamp,
            kind: JniRefKind::CreateGlobalRef,
            object_tag,
            ref_value,
            thread_id: 0,
        }
    }

    pub fn delete(timestamp: Timestamp, object_tag: Tag, ref_value: i64) -> Self {
        Self {
            timestamp,
            kind: JniRefKind::DeleteGlobalRef,
            object_tag,
            ref_value,
            thread_id: 0,
        }
    }

    pub fn on_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn is_create(&self) -> bool {
        self.kind == JniRefKind::CreateGlobalRef
    }
}
