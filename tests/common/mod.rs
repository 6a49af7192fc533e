#![allow(dead_code)]

use async_trait::async_trait;
use livealloc::{
    AllocatedClass, Allocation, AllocationEvent, ContextBatch, DeltaKind, EventBatch, EventKind,
    EventLog, InMemoryEventLog, JniRefEvent, JniRefKind, LogResponse, QueryRange, ReconcileResult,
    SamplingChange, Timestamp, TrackerConfig,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};

pub type Tag = i32;

/// Identity of an instance as a consumer sees it.
pub type Key = (Tag, Timestamp);

pub const BUFFER: i64 = 10;

pub fn config() -> TrackerConfig {
    TrackerConfig::new()
        .query_buffer(Duration::from_nanos(BUFFER as u64))
        .max_load_attempts(5)
        .retry_interval(Duration::from_millis(1))
}

pub fn range(start: Timestamp, end: Timestamp) -> QueryRange {
    QueryRange::new(start, end).unwrap()
}

pub fn alloc(timestamp: Timestamp, tag: Tag) -> AllocationEvent {
    alloc_class(timestamp, tag, 1)
}

pub fn alloc_class(timestamp: Timestamp, tag: Tag, class_tag: i32) -> AllocationEvent {
    AllocationEvent::alloc(
        timestamp,
        Allocation {
            tag,
            class_tag,
            stack_id: 0,
            thread_id: 0,
            size: 64,
            heap_id: 3,
        },
    )
}

pub fn free(timestamp: Timestamp, tag: Tag) -> AllocationEvent {
    AllocationEvent::free(timestamp, tag)
}

/// Classes 1..=3 published at time 0.
pub fn base_context() -> ContextBatch {
    ContextBatch {
        timestamp: 0,
        classes: (1..=3)
            .map(|id| AllocatedClass {
                class_id: id,
                classloader_id: 0,
                class_name: format!("com.example.Type{id}"),
            })
            .collect(),
        ..ContextBatch::default()
    }
}

/// Log with the base context where every event sits in its own batch,
/// stamped with the event time.
pub async fn log_with(events: &[AllocationEvent]) -> Arc<InMemoryEventLog> {
    let log = Arc::new(InMemoryEventLog::new());
    log.append_context(base_context()).await;
    for event in events {
        log.append_events(EventBatch::new(event.timestamp, vec![event.clone()]))
            .await;
    }
    log
}

/// Batches for `events` flushed every `flush` nanoseconds, each stamped with
/// the end of its flush period, in delivery order.
pub fn flushed_batches(events: &[AllocationEvent], flush: i64) -> Vec<EventBatch> {
    let mut batches: BTreeMap<Timestamp, Vec<AllocationEvent>> = BTreeMap::new();
    for event in events {
        let stamp = (event.timestamp.div_euclid(flush) + 1) * flush;
        batches.entry(stamp).or_default().push(event.clone());
    }
    batches
        .into_iter()
        .map(|(stamp, events)| EventBatch::new(stamp, events))
        .collect()
}

/// Log with the base context and no events yet.
pub async fn empty_log() -> Arc<InMemoryEventLog> {
    let log = Arc::new(InMemoryEventLog::new());
    log.append_context(base_context()).await;
    log
}

/// Log with the base context where events are flushed every `flush`
/// nanoseconds, each batch stamped with the end of its flush period.
pub async fn log_flushed(events: &[AllocationEvent], flush: i64) -> Arc<InMemoryEventLog> {
    let log = empty_log().await;
    for batch in flushed_batches(events, flush) {
        log.append_events(batch).await;
    }
    log
}

/// Consumer-side model: applies results the way a view would.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowView {
    /// Alive at the start of the range
    pub snapshot: BTreeSet<Key>,
    /// Allocated within the range
    pub allocations: BTreeSet<Key>,
    /// Freed within the range, with the free time
    pub frees: BTreeSet<(Tag, Timestamp, Timestamp)>,
}

impl WindowView {
    pub fn apply(&mut self, result: &ReconcileResult) {
        if result.reset {
            *self = WindowView::default();
        }
        for instance in &result.snapshot_adds {
            self.snapshot.insert((instance.tag(), instance.allocated_at()));
        }
        for instance in &result.snapshot_removes {
            self.snapshot.remove(&(instance.tag(), instance.allocated_at()));
        }
        for delta in &result.delta_adds {
            let key = (delta.instance.tag(), delta.instance.allocated_at());
            match delta.kind {
                DeltaKind::Allocation => {
                    self.allocations.insert(key);
                }
                DeltaKind::Deallocation => {
                    self.frees.insert((key.0, key.1, delta.timestamp));
                }
            }
        }
        for delta in &result.delta_removes {
            let key = (delta.instance.tag(), delta.instance.allocated_at());
            match delta.kind {
                DeltaKind::Allocation => {
                    self.allocations.remove(&key);
                }
                DeltaKind::Deallocation => {
                    self.frees.remove(&(key.0, key.1, delta.timestamp));
                }
            }
        }
    }

    /// What a full scan of `events` reports for `range`.
    pub fn rescan(events: &[AllocationEvent], range: QueryRange) -> WindowView {
        let mut sorted = events.to_vec();
        sorted.sort_by_key(|event| event.timestamp);

        let mut view = WindowView::default();
        let mut live: HashMap<Tag, Timestamp> = HashMap::new();
        for event in &sorted {
            let ts = event.timestamp;
            match &event.kind {
                EventKind::Alloc(allocation) => {
                    live.insert(allocation.tag, ts);
                    if range.contains(ts) {
                        view.allocations.insert((allocation.tag, ts));
                    }
                }
                EventKind::Free { tag } => {
                    if let Some(at) = live.remove(tag) {
                        if range.contains(ts) {
                            view.frees.insert((*tag, at, ts));
                        }
                    }
                }
            }
        }

        let mut alive: HashMap<Tag, Timestamp> = HashMap::new();
        for event in sorted.iter().filter(|event| event.timestamp < range.start) {
            match &event.kind {
                EventKind::Alloc(allocation) => {
                    alive.insert(allocation.tag, event.timestamp);
                }
                EventKind::Free { tag } => {
                    alive.remove(tag);
                }
            }
        }
        view.snapshot = alive.into_iter().collect();
        view
    }
}

/// Asserts that `result` reports no change twice, and that an instance sits
/// on both sides of a category only when its allocation and free were both
/// queried by this load. `previous` is the range reconciled before it.
pub fn assert_no_double_report(previous: Option<QueryRange>, result: &ReconcileResult) {
    fn unique<K: std::hash::Hash + Eq + std::fmt::Debug + Clone>(keys: impl Iterator<Item = K>, list: &str) {
        let mut seen = HashSet::new();
        for key in keys {
            assert!(seen.insert(key.clone()), "{list} reports {key:?} more than once");
        }
    }

    unique(result.snapshot_adds.iter().map(|i| i.id()), "snapshot_adds");
    unique(result.snapshot_removes.iter().map(|i| i.id()), "snapshot_removes");
    unique(result.delta_adds.iter().map(|d| (d.instance.id(), d.kind)), "delta_adds");
    unique(result.delta_removes.iter().map(|d| (d.instance.id(), d.kind)), "delta_removes");
    let jni = &result.jni_refs;
    unique(jni.snapshot_adds.iter().map(|r| r.id()), "JNI snapshot_adds");
    unique(jni.snapshot_removes.iter().map(|r| r.id()), "JNI snapshot_removes");
    unique(jni.delta_adds.iter().map(|d| (d.instance.id(), d.kind)), "JNI delta_adds");
    unique(jni.delta_removes.iter().map(|d| (d.instance.id(), d.kind)), "JNI delta_removes");

    if result.reset {
        assert!(result.snapshot_removes.is_empty(), "reset removes from the snapshot");
        assert!(result.delta_removes.is_empty(), "reset removes from the delta");
        assert!(jni.snapshot_removes.is_empty() && jni.delta_removes.is_empty());
    }

    let (left, right) = queried_slices(previous, result);
    let queried = |ts: Timestamp| {
        left.is_some_and(|slice| slice.contains(ts)) || right.is_some_and(|slice| slice.contains(ts))
    };
    let deltas = || result.delta_adds.iter().chain(result.delta_removes.iter());

    let removed: HashSet<_> = result.snapshot_removes.iter().map(|i| i.id()).collect();
    for instance in result.snapshot_adds.iter().filter(|i| removed.contains(&i.id())) {
        let left = left.expect("snapshot changed without moving the start");
        assert!(
            left.contains(instance.allocated_at()),
            "{} on both snapshot sides but allocated outside {}",
            instance.id(),
            left
        );
        assert!(
            deltas().any(|d| d.instance.id() == instance.id()
                && d.kind == DeltaKind::Deallocation
                && left.contains(d.timestamp)),
            "{} on both snapshot sides but not freed inside {}",
            instance.id(),
            left
        );
    }

    let removed: HashSet<_> = result.delta_removes.iter().map(|d| d.instance.id()).collect();
    for delta in result.delta_adds.iter().filter(|d| removed.contains(&d.instance.id())) {
        let id = delta.instance.id();
        let entries: Vec<_> = deltas().filter(|d| d.instance.id() == id).collect();
        assert!(
            entries.iter().any(|d| d.kind == DeltaKind::Allocation)
                && entries.iter().any(|d| d.kind == DeltaKind::Deallocation),
            "{id} on both delta sides without both its allocation and free"
        );
        assert!(
            entries.iter().all(|d| queried(d.timestamp)),
            "{id} on both delta sides with an event outside the queried slices"
        );
    }
}

/// Left and right slices a result was computed from.
fn queried_slices(
    previous: Option<QueryRange>,
    result: &ReconcileResult,
) -> (Option<QueryRange>, Option<QueryRange>) {
    let next = result.range;
    match previous {
        _ if result.reset => (None, Some(next)),
        None => (None, None),
        Some(previous) => {
            let between = |a: Timestamp, b: Timestamp| {
                (a != b).then(|| range(a.min(b), a.max(b)))
            };
            (
                between(previous.start, next.start),
                between(previous.end, next.end),
            )
        }
    }
}

/// Identity of a JNI reference as a consumer sees it: referent and value.
pub type JniKey = (Tag, Timestamp, i64);

fn jni_key(reference: &livealloc::JniReference) -> JniKey {
    (
        reference.object_tag(),
        reference.referent().allocated_at(),
        reference.ref_value(),
    )
}

/// Consumer-side model of the JNI reference lists.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JniView {
    pub snapshot: BTreeSet<JniKey>,
    pub creates: BTreeSet<JniKey>,
    pub deletes: BTreeSet<(JniKey, Timestamp)>,
}

impl JniView {
    pub fn apply(&mut self, result: &ReconcileResult) {
        if result.reset {
            *self = JniView::default();
        }
        let changes = &result.jni_refs;
        for reference in &changes.snapshot_adds {
            self.snapshot.insert(jni_key(reference));
        }
        for reference in &changes.snapshot_removes {
            self.snapshot.remove(&jni_key(reference));
        }
        for delta in &changes.delta_adds {
            match delta.kind {
                DeltaKind::Allocation => {
                    self.creates.insert(jni_key(&delta.instance));
                }
                DeltaKind::Deallocation => {
                    self.deletes.insert((jni_key(&delta.instance), delta.timestamp));
                }
            }
        }
        for delta in &changes.delta_removes {
            match delta.kind {
                DeltaKind::Allocation => {
                    self.creates.remove(&jni_key(&delta.instance));
                }
                DeltaKind::Deallocation => {
                    self.deletes.remove(&(jni_key(&delta.instance), delta.timestamp));
                }
            }
        }
    }

    /// What a full scan reports for `range`. References whose object tag
    /// names no allocated object are not reported.
    pub fn rescan(events: &[AllocationEvent], jni: &[JniRefEvent], range: QueryRange) -> JniView {
        let mut sorted = events.to_vec();
        sorted.sort_by_key(|event| event.timestamp);

        // Per tag: (allocated at, freed at) of every generation, oldest first.
        let mut generations: HashMap<Tag, Vec<(Timestamp, Option<Timestamp>)>> = HashMap::new();
        for event in &sorted {
            match &event.kind {
                EventKind::Alloc(allocation) => {
                    generations
                        .entry(allocation.tag)
                        .or_default()
                        .push((event.timestamp, None));
                }
                EventKind::Free { tag } => {
                    if let Some(last) = generations.get_mut(tag).and_then(|g| g.last_mut()) {
                        last.1.get_or_insert(event.timestamp);
                    }
                }
            }
        }
        let referent = |tag: Tag, ts: Timestamp| {
            generations
                .get(&tag)
                .and_then(|g| g.iter().rev().find(|(at, _)| *at <= ts).copied())
        };

        let mut refs = jni.to_vec();
        refs.sort_by_key(|event| event.timestamp);

        let mut view = JniView::default();
        let mut open: HashMap<JniKey, Option<Timestamp>> = HashMap::new();
        for event in &refs {
            let Some((allocated_at, freed_at)) = referent(event.object_tag, event.timestamp) else {
                continue;
            };
            let key = (event.object_tag, allocated_at, event.ref_value);
            let ts = event.timestamp;
            match event.kind {
                JniRefKind::CreateGlobalRef => {
                    if ts < range.start {
                        open.insert(key, freed_at);
                    }
                    if range.contains(ts) {
                        view.creates.insert(key);
                    }
                }
                JniRefKind::DeleteGlobalRef => {
                    if ts < range.start {
                        open.remove(&key);
                    }
                    if range.contains(ts) {
                        view.deletes.insert((key, ts));
                    }
                }
            }
        }
        view.snapshot = open
            .into_iter()
            .filter(|(_, freed_at)| freed_at.is_none_or(|at| at >= range.start))
            .map(|(key, _)| key)
            .collect();
        view
    }
}

/// Event log whose `events` queries block until the gate opens.
pub struct GatedLog {
    inner: Arc<InMemoryEventLog>,
    open: watch::Sender<bool>,
    pub entered: Notify,
    pub queries: AtomicUsize,
}

impl GatedLog {
    pub fn new(inner: Arc<InMemoryEventLog>) -> Self {
        let (open, _) = watch::channel(false);
        Self {
            inner,
            open,
            entered: Notify::new(),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }
}

#[async_trait]
impl EventLog for GatedLog {
    async fn events(&self, start: Timestamp, end: Timestamp) -> LogResponse<Vec<EventBatch>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let mut open = self.open.subscribe();
        let opened = open.wait_for(|open| *open).await.is_ok();
        if !opened {
            return LogResponse::Failure("gate dropped".to_string());
        }
        self.inner.events(start, end).await
    }

    async fn contexts(&self, start: Timestamp, end: Timestamp) -> LogResponse<Vec<ContextBatch>> {
        self.inner.contexts(start, end).await
    }

    async fn sampling_changes(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> LogResponse<Vec<SamplingChange>> {
        self.inner.sampling_changes(start, end).await
    }

    async fn jni_ref_events(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> LogResponse<Vec<JniRefEvent>> {
        self.inner.jni_ref_events(start, end).await
    }
}
