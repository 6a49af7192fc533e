use super::result::{DeltaEvent, ReconcileResult};
use super::slice::{FetchedSlice, Fetched, Plan, Recovery};
use crate::context::{ContextCache, FrameLookup};
use crate::core::{
    AllocationEvent, EventKind, JniRefEvent, JniRefKind, QueryRange, Result, Tag, Timestamp,
    TrackerError,
};
use crate::eventlog::{EventLog, RetryPolicy};
use crate::registry::{Instance, InstanceRegistry, JniReference};
use crate::tracker::TrackerConfig;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Incrementally reconciles tracked instances against the selected range.
///
/// Every call fetches everything it needs from the log first and only then
/// mutates tracked state, so a failed load leaves the engine exactly as the
/// last successful reconciliation left it.
pub struct ReconcileEngine {
    pub(super) log: Arc<dyn EventLog>,
    pub(super) retry: RetryPolicy,
    pub(super) query_buffer: i64,
    pub(super) session_start: Timestamp,
    pub(super) track_jni_refs: bool,
    pub(super) context: ContextCache,
    pub(super) registry: InstanceRegistry,
    pub(super) previous: Option<QueryRange>,
    pub(super) last_seen_sample: Timestamp,
}

impl ReconcileEngine {
    pub fn new(log: Arc<dyn EventLog>, config: &TrackerConfig) -> Self {
        let query_buffer = config.query_buffer_ns();
        Self {
            log,
            retry: config.retry_policy(),
            query_buffer,
            session_start: config.session_start,
            track_jni_refs: config.enable_jni_refs_tracking,
            context: ContextCache::new(query_buffer),
            registry: InstanceRegistry::new(),
            previous: None,
            last_seen_sample: Timestamp::MIN,
        }
    }

    /// Range the tracked state currently reflects. `None` before the first
    /// load, after a failed apply, and while the snapshot of the last
    /// selection may still be missing undelivered events.
    pub fn previous_range(&self) -> Option<QueryRange> {
        self.previous
    }

    /// Newest batch timestamp observed in any slice query.
    pub fn last_seen_sample_timestamp(&self) -> Timestamp {
        self.last_seen_sample
    }

    pub fn context(&self) -> &ContextCache {
        &self.context
    }

    pub fn frame_lookup(&self) -> FrameLookup {
        self.context.frame_lookup()
    }

    /// Number of instance generations currently registered.
    pub fn tracked_instances(&self) -> usize {
        self.registry.len()
    }

    pub fn tracked_jni_refs(&self) -> usize {
        self.registry.jni_ref_count()
    }

    pub fn is_tracking(&self, tag: Tag) -> bool {
        self.registry.contains(tag)
    }

    /// Bring tracked state from the previous range to `range` and report the
    /// changes.
    pub async fn reconcile(&mut self, range: QueryRange) -> Result<ReconcileResult> {
        let span = info_span!("reconcile", start = range.start, end = range.end);
        self.run(range).instrument(span).await
    }

    async fn run(&mut self, range: QueryRange) -> Result<ReconcileResult> {
        if self.previous == Some(range) {
            debug!("range {} already reconciled", range);
            return Ok(ReconcileResult::unchanged(range));
        }

        let info_message = self.sampling_message(range).await?;
        self.context
            .ensure_context(self.log.as_ref(), range.end, &self.retry)
            .await?;

        let plan = Plan::for_ranges(self.previous, range, self.session_start);
        let fetched = self.fetch(&plan).await?;

        // Batches are stamped at or after their events, so everything before
        // the newest stamp has been delivered but more events at that stamp
        // may still come. Events from there on are held back and picked up by
        // the right-extend slice of a later load.
        let horizon = range.end.min(self.last_seen_sample).max(range.start);
        let reconciled = QueryRange::between(range.start, horizon);

        let mut result = match self.apply(range, plan, fetched, horizon) {
            Ok(result) => result,
            Err(err) => {
                // State is partially applied; only a hard reset can recover.
                warn!("reconciliation of {} aborted: {}", range, err);
                self.previous = None;
                self.registry.clear();
                return Err(err);
            }
        };

        if reconciled != range {
            debug!(
                "log only delivered up to {}, reconciled {}",
                self.last_seen_sample, reconciled
            );
        }
        self.previous = if self.last_seen_sample < range.start {
            // Events just before the start may still be in flight, so the
            // snapshot is rebuilt on the next load.
            None
        } else {
            Some(reconciled)
        };
        result.reconciled = reconciled;
        result.info_message = info_message;

        info!(
            "reconciled {} ({}): {} changes, {} instances tracked",
            range,
            if result.reset { "reset" } else { "incremental" },
            result.change_count(),
            self.registry.len()
        );
        Ok(result)
    }

    fn apply(
        &mut self,
        range: QueryRange,
        plan: Plan,
        fetched: Fetched,
        horizon: Timestamp,
    ) -> Result<ReconcileResult> {
        let Fetched {
            snapshot,
            jni_snapshot,
            slices,
            recovery,
        } = fetched;

        let mut result = match plan {
            Plan::Reset { .. } => {
                info!("hard reset to {}", range);
                self.registry.clear();
                let mut result = ReconcileResult::new(range, true);
                result.snapshot_adds = self.replay_snapshot(snapshot.unwrap_or_default())?;
                result.jni_refs.snapshot_adds =
                    self.replay_jni_snapshot(jni_snapshot.unwrap_or_default())?;
                result
            }
            Plan::Incremental { .. } => {
                if let Some(recovery) = recovery {
                    self.recover(recovery)?;
                }
                ReconcileResult::new(range, false)
            }
        };

        for slice in slices {
            self.apply_slice(slice, horizon, &mut result)?;
        }
        Ok(result)
    }

    /// Replay the log from the session start and return the instances still
    /// alive at its end, oldest first.
    fn replay_snapshot(&mut self, events: Vec<AllocationEvent>) -> Result<Vec<Arc<Instance>>> {
        let mut live: HashMap<Tag, Arc<Instance>> = HashMap::new();

        for event in events {
            let timestamp = event.timestamp;
            match event.kind {
                EventKind::Alloc(allocation) => {
                    let instance = self
                        .registry
                        .get_or_create(&allocation, timestamp, &self.context)?;
                    if let Some(replaced) = live.insert(allocation.tag, instance) {
                        warn!(
                            "tag {} allocated again at {} while {} was live",
                            allocation.tag,
                            timestamp,
                            replaced.id()
                        );
                    }
                }
                EventKind::Free { tag } => {
                    if live.remove(&tag).is_some() {
                        self.registry.evict(tag);
                    } else {
                        warn!("snapshot FREE of unknown tag {} at {}, skipping", tag, timestamp);
                    }
                }
            }
        }

        let mut alive: Vec<Arc<Instance>> = live.into_values().collect();
        alive.sort_by_key(|instance| (instance.allocated_at(), instance.id()));
        Ok(alive)
    }

    /// JNI references created before the snapshot point and not yet deleted,
    /// attached to the instances the snapshot replay left alive.
    fn replay_jni_snapshot(&mut self, events: Vec<JniRefEvent>) -> Result<Vec<Arc<JniReference>>> {
        let mut live: HashMap<(Tag, i64), JniRefEvent> = HashMap::new();
        for event in events {
            let key = (event.object_tag, event.ref_value);
            match event.kind {
                JniRefKind::CreateGlobalRef => {
                    live.insert(key, event);
                }
                JniRefKind::DeleteGlobalRef => {
                    live.remove(&key);
                }
            }
        }

        let mut created: Vec<JniRefEvent> = live.into_values().collect();
        created.sort_by_key(|event| (event.timestamp, event.object_tag, event.ref_value));

        let mut alive = Vec::with_capacity(created.len());
        for event in created {
            match self.registry.get_or_create_jni_ref(&event, &self.context)? {
                Some(reference) => {
                    reference.set_alloc_time(event.timestamp);
                    alive.push(reference);
                }
                None => warn!(
                    "snapshot JNI reference {:#x} on unknown tag {}, skipping",
                    event.ref_value, event.object_tag
                ),
            }
        }
        Ok(alive)
    }

    /// Re-register instances of `recovery.tags` that are still alive at the
    /// end of the replay.
    fn recover(&mut self, recovery: Recovery) -> Result<()> {
        let Recovery { tags, events } = recovery;
        let mut live = HashMap::new();

        for event in events {
            if !tags.contains(&event.tag()) {
                continue;
            }
            match event.kind {
                EventKind::Alloc(allocation) => {
                    live.insert(allocation.tag, (allocation, event.timestamp));
                }
                EventKind::Free { tag } => {
                    live.remove(&tag);
                }
            }
        }

        for (allocation, timestamp) in live.into_values() {
            let instance = self
                .registry
                .get_or_create(&allocation, timestamp, &self.context)?;
            debug!("recovered {} (tag {}) allocated at {}", instance.id(), instance.tag(), timestamp);
        }
        Ok(())
    }

    /// Apply one slice. Additive slices skip events at or after `horizon`.
    fn apply_slice(
        &mut self,
        slice: FetchedSlice,
        horizon: Timestamp,
        result: &mut ReconcileResult,
    ) -> Result<()> {
        let FetchedSlice {
            kind,
            range,
            events,
            jni_events,
        } = slice;
        let retract = kind.is_retraction();
        let mut held = 0;

        for event in events {
            let timestamp = event.timestamp;
            if !retract && timestamp >= horizon {
                held += 1;
                continue;
            }
            let delta = match event.kind {
                EventKind::Alloc(allocation) => {
                    let instance = self
                        .registry
                        .get_or_create(&allocation, timestamp, &self.context)?;
                    if retract {
                        instance.reset_alloc_time();
                    } else {
                        instance.set_alloc_time(timestamp);
                    }
                    DeltaEvent::allocation(instance, timestamp)
                }
                EventKind::Free { tag } => {
                    let found = if retract {
                        self.unfree(tag, timestamp)
                    } else {
                        self.registry.mark_freed(tag, timestamp)
                    };
                    match found {
                        Ok(instance) => DeltaEvent::deallocation(instance, timestamp),
                        Err(err @ TrackerError::UnknownTag { .. }) => {
                            warn!("{} in {} slice {}, skipping", err, kind, range);
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
            };
            result.record(kind, delta);
        }

        // Referents are in the registry by now: allocations of this slice
        // were applied above.
        for event in jni_events {
            let timestamp = event.timestamp;
            if !retract && timestamp >= horizon {
                held += 1;
                continue;
            }
            let Some(reference) = self.registry.get_or_create_jni_ref(&event, &self.context)?
            else {
                warn!(
                    "JNI reference {:#x} on unknown tag {} in {} slice {}, skipping",
                    event.ref_value, event.object_tag, kind, range
                );
                continue;
            };
            let delta = match (event.kind, retract) {
                (JniRefKind::CreateGlobalRef, false) => {
                    reference.set_alloc_time(timestamp);
                    DeltaEvent::allocation(reference, timestamp)
                }
                (JniRefKind::CreateGlobalRef, true) => {
                    reference.reset_alloc_time();
                    DeltaEvent::allocation(reference, timestamp)
                }
                (JniRefKind::DeleteGlobalRef, false) => {
                    reference.set_dealloc_time(timestamp);
                    DeltaEvent::deallocation(reference, timestamp)
                }
                (JniRefKind::DeleteGlobalRef, true) => {
                    reference.reset_dealloc_time();
                    DeltaEvent::deallocation(reference, timestamp)
                }
            };
            result.jni_refs.record(kind, delta);
        }

        if held > 0 {
            debug!("{} slice {}: holding back {} events from {}", kind, range, held, horizon);
        }
        Ok(())
    }

    fn unfree(&self, tag: Tag, timestamp: Timestamp) -> Result<Arc<Instance>> {
        let instance = self
            .registry
            .find(tag, timestamp)
            .ok_or(TrackerError::UnknownTag { tag, timestamp })?;
        instance.reset_dealloc_time();
        Ok(instance)
    }
}
