// ============================================================================
// Instance Registry
// ============================================================================
//
// Maps runtime tags to the instances the reconciliation engine is tracking.
// Tags are only unique among live objects, so a tag may carry several
// generations (one per ALLOC observed for it), ordered by allocation time.
// A FREE always belongs to the newest generation allocated at or before it.
// JNI global references are kept per referent and leave with it.
//
// ============================================================================

pub mod instance;
pub mod jni;

pub use instance::{Instance, InstanceId};
pub use jni::JniReference;

use crate::context::ContextCache;
use crate::core::{Allocation, JniRefEvent, Result, Tag, Timestamp, TrackerError};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct InstanceRegistry {
    instances: HashMap<Tag, Vec<Arc<Instance>>>,
    jni_refs: HashMap<InstanceId, Vec<Arc<JniReference>>>,
    len: usize,
}

impl InstanceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the instance created by the ALLOC at `timestamp`, registering
    /// it (with metadata resolved from `context`) on first sight.
    pub(crate) fn get_or_create(
        &mut self,
        allocation: &Allocation,
        timestamp: Timestamp,
        context: &ContextCache,
    ) -> Result<Arc<Instance>> {
        if let Some(existing) = self
            .instances
            .get(&allocation.tag)
            .and_then(|gens| gens.iter().find(|g| g.allocated_at() == timestamp))
        {
            return Ok(Arc::clone(existing));
        }

        let class = context.class(allocation.class_tag)?;
        let callstack = context.callstack(allocation.stack_id)?;
        let thread = context.thread(allocation.thread_id)?;

        let instance = Arc::new(Instance::new(
            allocation.tag,
            class,
            allocation.size,
            allocation.heap_id,
            callstack,
            thread,
            timestamp,
        ));
        self.insert(Arc::clone(&instance));
        Ok(instance)
    }

    pub(crate) fn insert(&mut self, instance: Arc<Instance>) {
        let generations = self.instances.entry(instance.tag()).or_default();
        let idx = generations.partition_point(|g| g.allocated_at() <= instance.allocated_at());
        generations.insert(idx, instance);
        self.len += 1;
    }

    /// Newest generation of `tag` allocated at or before `timestamp`.
    pub(crate) fn find(&self, tag: Tag, timestamp: Timestamp) -> Option<Arc<Instance>> {
        self.instances.get(&tag).and_then(|generations| {
            generations
                .iter()
                .rev()
                .find(|g| g.allocated_at() <= timestamp)
                .cloned()
        })
    }

    /// Record a FREE at `timestamp`.
    pub(crate) fn mark_freed(&mut self, tag: Tag, timestamp: Timestamp) -> Result<Arc<Instance>> {
        let instance = self
            .find(tag, timestamp)
            .ok_or(TrackerError::UnknownTag { tag, timestamp })?;
        instance.set_dealloc_time(timestamp);
        Ok(instance)
    }

    /// Return the reference `event` names, creating it on first sight.
    /// `None` when no tracked instance carries the event's object tag.
    pub(crate) fn get_or_create_jni_ref(
        &mut self,
        event: &JniRefEvent,
        context: &ContextCache,
    ) -> Result<Option<Arc<JniReference>>> {
        let Some(referent) = self.find(event.object_tag, event.timestamp) else {
            return Ok(None);
        };

        let refs = self.jni_refs.entry(referent.id()).or_default();
        if let Some(existing) = refs.iter().find(|r| r.ref_value() == event.ref_value) {
            return Ok(Some(Arc::clone(existing)));
        }

        let thread = context.thread(event.thread_id)?;
        let reference = Arc::new(JniReference::new(referent, event.ref_value, thread));
        refs.push(Arc::clone(&reference));
        Ok(Some(reference))
    }

    /// Drop the newest generation of `tag` along with its JNI references.
    pub(crate) fn evict(&mut self, tag: Tag) -> Option<Arc<Instance>> {
        let generations = self.instances.get_mut(&tag)?;
        let evicted = generations.pop();
        if generations.is_empty() {
            self.instances.remove(&tag);
        }
        if let Some(instance) = &evicted {
            self.jni_refs.remove(&instance.id());
            self.len -= 1;
        }
        evicted
    }

    pub(crate) fn contains(&self, tag: Tag) -> bool {
        self.instances.contains_key(&tag)
    }

    pub(crate) fn clear(&mut self) {
        self.instances.clear();
        self.jni_refs.clear();
        self.len = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn jni_ref_count(&self) -> usize {
        self.jni_refs.values().map(Vec::len).sum()
    }
}
