// Slice fetching: every log round trip a reconciliation needs happens here,
// before any tracked state is touched.

use super::engine::ReconcileEngine;
use super::result::SAMPLING_INFO_MESSAGE;
use crate::core::{
    AllocationEvent, EventKind, JniRefEvent, QueryRange, Result, SliceKind, Tag, Timestamp,
};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// Events of one slice, restricted to the slice and sorted by timestamp.
#[derive(Debug)]
pub(super) struct FetchedSlice {
    pub kind: SliceKind,
    pub range: QueryRange,
    pub events: Vec<AllocationEvent>,
    pub jni_events: Vec<JniRefEvent>,
}

/// What a reconciliation has to do, decided from the previous range alone.
#[derive(Debug, Clone)]
pub(super) enum Plan {
    Reset {
        snapshot: QueryRange,
        window: QueryRange,
    },
    Incremental {
        slices: Vec<(SliceKind, QueryRange)>,
    },
}

impl Plan {
    pub(super) fn for_ranges(
        previous: Option<QueryRange>,
        next: QueryRange,
        session_start: Timestamp,
    ) -> Plan {
        let previous = match previous {
            Some(previous) if previous.overlaps(&next) => previous,
            _ => {
                return Plan::Reset {
                    snapshot: QueryRange::between(session_start.min(next.start), next.start),
                    window: next,
                };
            }
        };

        let mut slices = Vec::with_capacity(2);
        if next.start < previous.start {
            slices.push((
                SliceKind::LeftExtend,
                QueryRange::between(next.start, previous.start),
            ));
        } else if next.start > previous.start {
            slices.push((
                SliceKind::LeftRetract,
                QueryRange::between(previous.start, next.start),
            ));
        }

        if next.end < previous.end {
            slices.push((
                SliceKind::RightRetract,
                QueryRange::between(next.end, previous.end),
            ));
        } else if next.end > previous.end {
            slices.push((
                SliceKind::RightExtend,
                QueryRange::between(previous.end, next.end),
            ));
        }

        Plan::Incremental { slices }
    }
}

/// Replay needed to rebuild instances that a FREE refers to but that were
/// evicted by an earlier snapshot.
#[derive(Debug, Default)]
pub(super) struct Recovery {
    pub tags: HashSet<Tag>,
    pub events: Vec<AllocationEvent>,
}

#[derive(Debug)]
pub(super) struct Fetched {
    pub snapshot: Option<Vec<AllocationEvent>>,
    pub jni_snapshot: Option<Vec<JniRefEvent>>,
    pub slices: Vec<FetchedSlice>,
    pub recovery: Option<Recovery>,
}

impl ReconcileEngine {
    pub(super) async fn fetch(&mut self, plan: &Plan) -> Result<Fetched> {
        match plan {
            Plan::Reset { snapshot, window } => {
                let snapshot_events = self.fetch_up_to(SliceKind::Snapshot, *snapshot).await?;
                let jni_snapshot = self.fetch_jni(SliceKind::Snapshot, *snapshot).await?;
                let window = self.fetch_slice(SliceKind::Window, *window).await?;
                Ok(Fetched {
                    snapshot: Some(snapshot_events),
                    jni_snapshot: Some(jni_snapshot),
                    slices: vec![window],
                    recovery: None,
                })
            }
            Plan::Incremental { slices } => {
                let mut fetched = Vec::with_capacity(slices.len());
                let mut recovery = None;

                for (kind, range) in slices {
                    let slice = self.fetch_slice(*kind, *range).await?;
                    if *kind == SliceKind::LeftExtend {
                        let tags = self.unresolved_frees(&slice);
                        if !tags.is_empty() {
                            debug!(
                                "{} frees in {} need evicted instances, replaying up to {}",
                                tags.len(),
                                range,
                                range.start
                            );
                            let replay = QueryRange::between(
                                self.session_start.min(range.start),
                                range.start,
                            );
                            let events = self.fetch_up_to(SliceKind::Recovery, replay).await?;
                            recovery = Some(Recovery { tags, events });
                        }
                    }
                    fetched.push(slice);
                }

                Ok(Fetched {
                    snapshot: None,
                    jni_snapshot: None,
                    slices: fetched,
                    recovery,
                })
            }
        }
    }

    /// Query a slice widened by the buffer on both ends, keep only events
    /// inside the slice itself.
    pub(super) async fn fetch_slice(
        &mut self,
        kind: SliceKind,
        range: QueryRange,
    ) -> Result<FetchedSlice> {
        // Point selections have no delta.
        if range.is_empty() {
            return Ok(FetchedSlice {
                kind,
                range,
                events: Vec::new(),
                jni_events: Vec::new(),
            });
        }

        let query = range.widen(self.query_buffer);
        let events = self.fetch_events(kind, range, query).await?;
        let jni_events = self.fetch_jni(kind, range).await?;
        Ok(FetchedSlice {
            kind,
            range,
            events,
            jni_events,
        })
    }

    /// JNI reference events inside `range`, when reference tracking is on.
    /// They are stored by their own timestamp, so no buffer is needed.
    async fn fetch_jni(&self, kind: SliceKind, range: QueryRange) -> Result<Vec<JniRefEvent>> {
        if !self.track_jni_refs || range.is_empty() {
            return Ok(Vec::new());
        }

        let log = Arc::clone(&self.log);
        let mut events: Vec<JniRefEvent> = self
            .retry
            .run(range, kind, || log.jni_ref_events(range.start, range.end))
            .await?
            .into_iter()
            .filter(|event| range.contains(event.timestamp))
            .collect();
        events.sort_by_key(|event| event.timestamp);

        debug!("{} slice {}: {} JNI reference events", kind, range, events.len());
        Ok(events)
    }

    /// Query from the start of `range` with the buffer added to its end only;
    /// used for replays that begin at the session start.
    async fn fetch_up_to(
        &mut self,
        kind: SliceKind,
        range: QueryRange,
    ) -> Result<Vec<AllocationEvent>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let query = QueryRange::between(range.start, range.end.saturating_add(self.query_buffer));
        self.fetch_events(kind, range, query).await
    }

    async fn fetch_events(
        &mut self,
        kind: SliceKind,
        range: QueryRange,
        query: QueryRange,
    ) -> Result<Vec<AllocationEvent>> {
        let log = Arc::clone(&self.log);
        let batches = self
            .retry
            .run(range, kind, || log.events(query.start, query.end))
            .await?;

        for batch in &batches {
            if batch.timestamp > self.last_seen_sample {
                self.last_seen_sample = batch.timestamp;
            }
        }

        let mut events: Vec<AllocationEvent> = batches
            .into_iter()
            .flat_map(|batch| batch.events)
            .filter(|event| range.contains(event.timestamp))
            .collect();
        // Stable: same-timestamp events keep delivery order.
        events.sort_by_key(|event| event.timestamp);

        debug!("{} slice {}: {} events", kind, range, events.len());
        Ok(events)
    }

    /// Tags freed in `slice` with no instance to attach the free to: neither
    /// allocated earlier in the slice nor tracked by the registry.
    fn unresolved_frees(&self, slice: &FetchedSlice) -> HashSet<Tag> {
        let mut allocated = HashSet::new();
        let mut missing = HashSet::new();

        for event in &slice.events {
            match &event.kind {
                EventKind::Alloc(allocation) => {
                    allocated.insert(allocation.tag);
                }
                EventKind::Free { tag } => {
                    if !allocated.contains(tag)
                        && self.registry.find(*tag, event.timestamp).is_none()
                    {
                        missing.insert(*tag);
                    }
                }
            }
        }
        missing
    }

    pub(super) async fn sampling_message(
        &self,
        range: QueryRange,
    ) -> Result<Option<&'static str>> {
        let log = Arc::clone(&self.log);
        let changes = self
            .retry
            .run(range, SliceKind::Sampling, || {
                log.sampling_changes(range.start, range.end)
            })
            .await?;

        if changes.iter().all(|change| change.is_full_tracking()) {
            Ok(None)
        } else {
            Ok(Some(SAMPLING_INFO_MESSAGE))
        }
    }
}
