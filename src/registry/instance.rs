use crate::context::{CallstackEntry, ClassEntry, ThreadEntry};
use crate::core::{ALLOCATED_BEFORE_WINDOW, HeapId, NOT_FREED, Tag, Timestamp};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one tracked instance. Unlike tags, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inst_{}", self.0)
    }
}

/// One allocated object.
///
/// Identity and metadata are fixed at allocation. The alloc/dealloc times
/// follow the engine: each reconciliation updates them as it applies its
/// slices, which may be after an earlier result carrying this instance was
/// delivered. Consumers that need the time a specific change happened read
/// it from `DeltaEvent::timestamp` instead.
#[derive(Debug)]
pub struct Instance {
    id: InstanceId,
    tag: Tag,
    class: Arc<ClassEntry>,
    size: i64,
    heap_id: HeapId,
    callstack: Option<Arc<CallstackEntry>>,
    thread: Option<Arc<ThreadEntry>>,
    allocated_at: Timestamp,
    alloc_time: AtomicI64,
    dealloc_time: AtomicI64,
}

impl Instance {
    pub(crate) fn new(
        tag: Tag,
        class: Arc<ClassEntry>,
        size: i64,
        heap_id: HeapId,
        callstack: Option<Arc<CallstackEntry>>,
        thread: Option<Arc<ThreadEntry>>,
        allocated_at: Timestamp,
    ) -> Self {
        Self {
            id: InstanceId::next(),
            tag,
            class,
            size,
            heap_id,
            callstack,
            thread,
            allocated_at,
            alloc_time: AtomicI64::new(allocated_at),
            dealloc_time: AtomicI64::new(NOT_FREED),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn class(&self) -> &Arc<ClassEntry> {
        &self.class
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn heap_id(&self) -> HeapId {
        self.heap_id
    }

    pub fn callstack(&self) -> Option<&Arc<CallstackEntry>> {
        self.callstack.as_ref()
    }

    pub fn thread(&self) -> Option<&Arc<ThreadEntry>> {
        self.thread.as_ref()
    }

    /// Timestamp of the ALLOC event that created this instance.
    pub fn allocated_at(&self) -> Timestamp {
        self.allocated_at
    }

    /// Allocation time as seen from the current window;
    /// `ALLOCATED_BEFORE_WINDOW` once the allocation left the delta.
    pub fn alloc_time(&self) -> Timestamp {
        self.alloc_time.load(Ordering::Acquire)
    }

    /// Deallocation time as seen from the current window, `NOT_FREED` if none.
    pub fn dealloc_time(&self) -> Timestamp {
        self.dealloc_time.load(Ordering::Acquire)
    }

    pub fn is_freed(&self) -> bool {
        self.dealloc_time() != NOT_FREED
    }

    pub(crate) fn set_alloc_time(&self, timestamp: Timestamp) {
        self.alloc_time.store(timestamp, Ordering::Release);
    }

    pub(crate) fn reset_alloc_time(&self) {
        self.set_alloc_time(ALLOCATED_BEFORE_WINDOW);
    }

    pub(crate) fn set_dealloc_time(&self, timestamp: Timestamp) {
        self.dealloc_time.store(timestamp, Ordering::Release);
    }

    pub(crate) fn reset_dealloc_time(&self) {
        self.set_dealloc_time(NOT_FREED);
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Instance {}

impl std::hash::Hash for Instance {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
