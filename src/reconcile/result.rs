use crate::core::{HeapId, JNI_HEAP_ID, QueryRange, SliceKind, Timestamp};
use crate::registry::{Instance, JniReference};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Shown when part of the selected range only had sampled allocation tracking.
pub const SAMPLING_INFO_MESSAGE: &str =
    "Selected region does not have full tracking. Data may be inaccurate.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Allocation,
    Deallocation,
}

/// One ALLOC or FREE event that entered or left the delta. For JNI
/// references these are the CREATE and DELETE of the reference.
#[derive(Debug)]
pub struct DeltaEvent<T = Instance> {
    pub kind: DeltaKind,
    /// Time of the event itself; unlike the object's alloc/dealloc times it
    /// never changes after the result is built.
    pub timestamp: Timestamp,
    pub instance: Arc<T>,
}

impl<T> DeltaEvent<T> {
    pub(crate) fn allocation(instance: Arc<T>, timestamp: Timestamp) -> Self {
        Self {
            kind: DeltaKind::Allocation,
            timestamp,
            instance,
        }
    }

    pub(crate) fn deallocation(instance: Arc<T>, timestamp: Timestamp) -> Self {
        Self {
            kind: DeltaKind::Deallocation,
            timestamp,
            instance,
        }
    }

    pub fn is_allocation(&self) -> bool {
        self.kind == DeltaKind::Allocation
    }
}

impl<T> Clone for DeltaEvent<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            timestamp: self.timestamp,
            instance: Arc::clone(&self.instance),
        }
    }
}

/// Where an event lands, given the slice it was found in.
///
/// Additive slices report into the delta adds, retractions into the delta
/// removes. Slices that move the left edge also move the object across the
/// snapshot boundary: an allocation entering the delta leaves the snapshot,
/// a free entering the delta means the object was alive at the new start.
fn record_into<T>(
    slice: SliceKind,
    delta: DeltaEvent<T>,
    snapshot_adds: &mut Vec<Arc<T>>,
    snapshot_removes: &mut Vec<Arc<T>>,
    delta_adds: &mut Vec<DeltaEvent<T>>,
    delta_removes: &mut Vec<DeltaEvent<T>>,
) {
    let retract = slice.is_retraction();
    if slice.moves_left_edge() {
        let instance = Arc::clone(&delta.instance);
        if retract == delta.is_allocation() {
            snapshot_adds.push(instance);
        } else {
            snapshot_removes.push(instance);
        }
    }
    if retract {
        delta_removes.push(delta);
    } else {
        delta_adds.push(delta);
    }
}

/// The four change lists for one kind of tracked object.
#[derive(Debug)]
pub struct Changes<T> {
    pub snapshot_adds: Vec<Arc<T>>,
    pub snapshot_removes: Vec<Arc<T>>,
    pub delta_adds: Vec<DeltaEvent<T>>,
    pub delta_removes: Vec<DeltaEvent<T>>,
}

impl<T> Changes<T> {
    pub(crate) fn record(&mut self, slice: SliceKind, delta: DeltaEvent<T>) {
        record_into(
            slice,
            delta,
            &mut self.snapshot_adds,
            &mut self.snapshot_removes,
            &mut self.delta_adds,
            &mut self.delta_removes,
        );
    }

    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    pub fn change_count(&self) -> usize {
        self.snapshot_adds.len()
            + self.snapshot_removes.len()
            + self.delta_adds.len()
            + self.delta_removes.len()
    }
}

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Self {
            snapshot_adds: Vec::new(),
            snapshot_removes: Vec::new(),
            delta_adds: Vec::new(),
            delta_removes: Vec::new(),
        }
    }
}

impl<T> Clone for Changes<T> {
    fn clone(&self) -> Self {
        Self {
            snapshot_adds: self.snapshot_adds.clone(),
            snapshot_removes: self.snapshot_removes.clone(),
            delta_adds: self.delta_adds.clone(),
            delta_removes: self.delta_removes.clone(),
        }
    }
}

/// Changes that turn the previously reported state into the state for `range`.
///
/// Consumers apply, in order: clear everything if `reset`; snapshot adds then
/// snapshot removes; delta adds then delta removes. JNI references follow the
/// same order in `jni_refs`. The engine does not interpret membership beyond
/// that.
#[derive(Debug, Clone)]
pub struct ReconcileResult {
    /// Range that was requested.
    pub range: QueryRange,
    /// Range the lists below describe. Its end trails the requested end
    /// while the log has not delivered that far yet.
    pub reconciled: QueryRange,
    /// Previously reported state was discarded.
    pub reset: bool,
    pub snapshot_adds: Vec<Arc<Instance>>,
    pub snapshot_removes: Vec<Arc<Instance>>,
    pub delta_adds: Vec<DeltaEvent>,
    pub delta_removes: Vec<DeltaEvent>,
    /// Empty unless JNI reference tracking is enabled.
    pub jni_refs: Changes<JniReference>,
    pub info_message: Option<&'static str>,
}

impl ReconcileResult {
    pub(crate) fn new(range: QueryRange, reset: bool) -> Self {
        Self {
            range,
            reconciled: range,
            reset,
            snapshot_adds: Vec::new(),
            snapshot_removes: Vec::new(),
            delta_adds: Vec::new(),
            delta_removes: Vec::new(),
            jni_refs: Changes::default(),
            info_message: None,
        }
    }

    pub(crate) fn unchanged(range: QueryRange) -> Self {
        Self::new(range, false)
    }

    pub(crate) fn record(&mut self, slice: SliceKind, delta: DeltaEvent) {
        record_into(
            slice,
            delta,
            &mut self.snapshot_adds,
            &mut self.snapshot_removes,
            &mut self.delta_adds,
            &mut self.delta_removes,
        );
    }

    /// True when there is nothing for the consumer to apply.
    pub fn is_empty(&self) -> bool {
        !self.reset && self.change_count() == 0
    }

    pub fn change_count(&self) -> usize {
        self.snapshot_adds.len()
            + self.snapshot_removes.len()
            + self.delta_adds.len()
            + self.delta_removes.len()
            + self.jni_refs.change_count()
    }

    /// Heaps touched by any of the lists.
    pub fn affected_heaps(&self) -> BTreeSet<HeapId> {
        let mut heaps: BTreeSet<HeapId> = self
            .snapshot_adds
            .iter()
            .chain(self.snapshot_removes.iter())
            .map(|instance| instance.heap_id())
            .chain(
                self.delta_adds
                    .iter()
                    .chain(self.delta_removes.iter())
                    .map(|delta| delta.instance.heap_id()),
            )
            .collect();
        if !self.jni_refs.is_empty() {
            heaps.insert(JNI_HEAP_ID);
        }
        heaps
    }
}
