use super::instance::{Instance, InstanceId};
use crate::context::ThreadEntry;
use crate::core::{ALLOCATED_BEFORE_WINDOW, HeapId, JNI_HEAP_ID, NOT_FREED, Tag, Timestamp};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A JNI global reference held on a tracked object.
///
/// Created the first time an event names `(referent, ref_value)` and kept
/// with its referent until the referent is evicted.
#[derive(Debug)]
pub struct JniReference {
    id: InstanceId,
    ref_value: i64,
    referent: Arc<Instance>,
    thread: Option<Arc<ThreadEntry>>,
    alloc_time: AtomicI64,
    dealloc_time: AtomicI64,
}

impl JniReference {
    pub(crate) fn new(
        referent: Arc<Instance>,
        ref_value: i64,
        thread: Option<Arc<ThreadEntry>>,
    ) -> Self {
        Self {
            id: InstanceId::next(),
            ref_value,
            referent,
            thread,
            alloc_time: AtomicI64::new(ALLOCATED_BEFORE_WINDOW),
            dealloc_time: AtomicI64::new(NOT_FREED),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn ref_value(&self) -> i64 {
        self.ref_value
    }

    /// The object the reference keeps alive.
    pub fn referent(&self) -> &Arc<Instance> {
        &self.referent
    }

    pub fn object_tag(&self) -> Tag {
        self.referent.tag()
    }

    /// Thread of the first event seen for this reference.
    pub fn thread(&self) -> Option<&Arc<ThreadEntry>> {
        self.thread.as_ref()
    }

    pub fn heap_id(&self) -> HeapId {
        JNI_HEAP_ID
    }

    pub fn alloc_time(&self) -> Timestamp {
        self.alloc_time.load(Ordering::Acquire)
    }

    pub fn dealloc_time(&self) -> Timestamp {
        self.dealloc_time.load(Ordering::Acquire)
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

impl PartialEq for JniReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JniReference {}
