use super::{EventLog, LogResponse};
use crate::core::{ContextBatch, EventBatch, JniRefEvent, QueryRange, SamplingChange, Timestamp};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-process append-only event log.
///
/// Serves the same contract as the remote log service, which makes it the
/// backing store for embedding the tracker next to an agent that already
/// lives in-process, and for tests. Batches are kept sorted by envelope
/// timestamp so range queries can binary search.
pub struct InMemoryEventLog {
    state: RwLock<LogState>,
}

#[derive(Default)]
struct LogState {
    event_batches: Vec<EventBatch>,
    context_batches: Vec<ContextBatch>,
    sampling: Vec<SamplingChange>,
    jni_refs: Vec<JniRefEvent>,
    /// Number of upcoming `events` calls answered with NOT_READY.
    not_ready_remaining: u32,
    failure: Option<String>,
    event_queries: Vec<QueryRange>,
    jni_queries: Vec<QueryRange>,
}

fn insert_sorted<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> Timestamp) {
    let ts = key(&item);
    let idx = items.partition_point(|existing| key(existing) <= ts);
    items.insert(idx, item);
}

fn select_range<T: Clone>(items: &[T], start: Timestamp, end: Timestamp, key: impl Fn(&T) -> Timestamp) -> Vec<T> {
    let from = items.partition_point(|item| key(item) < start);
    let to = items.partition_point(|item| key(item) < end);
    if from >= to {
        return Vec::new();
    }
    items[from..to].to_vec()
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState::default()),
        }
    }

    /// Append an event batch.
    pub async fn append_events(&self, batch: EventBatch) {
        let mut state = self.state.write().await;
        insert_sorted(&mut state.event_batches, batch, |b| b.timestamp);
    }

    /// Append a context batch.
    pub async fn append_context(&self, batch: ContextBatch) {
        let mut state = self.state.write().await;
        insert_sorted(&mut state.context_batches, batch, |b| b.timestamp);
    }

    /// Record an allocation sampling change.
    pub async fn record_sampling(&self, change: SamplingChange) {
        let mut state = self.state.write().await;
        insert_sorted(&mut state.sampling, change, |c| c.timestamp);
    }

    /// Record JNI global reference events.
    pub async fn append_jni_refs(&self, events: Vec<JniRefEvent>) {
        let mut state = self.state.write().await;
        for event in events {
            insert_sorted(&mut state.jni_refs, event, |e| e.timestamp);
        }
    }

    /// Answer the next `count` event queries with NOT_READY.
    pub async fn delay_next_queries(&self, count: u32) {
        self.state.write().await.not_ready_remaining = count;
    }

    /// Make every subsequent query fail (`None` clears the failure).
    pub async fn set_failure(&self, reason: Option<String>) {
        self.state.write().await.failure = reason;
    }

    /// Every `events` query served so far, in order, as requested.
    pub async fn event_queries(&self) -> Vec<QueryRange> {
        self.state.read().await.event_queries.clone()
    }

    pub async fn clear_event_queries(&self) {
        self.state.write().await.event_queries.clear();
    }

    /// Every `jni_ref_events` query served so far, in order.
    pub async fn jni_queries(&self) -> Vec<QueryRange> {
        self.state.read().await.jni_queries.clone()
    }

    /// Envelope timestamp of the newest event batch.
    pub async fn last_batch_timestamp(&self) -> Option<Timestamp> {
        self.state
            .read()
            .await
            .event_batches
            .last()
            .map(|b| b.timestamp)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn events(&self, start: Timestamp, end: Timestamp) -> LogResponse<Vec<EventBatch>> {
        let mut state = self.state.write().await;
        state.event_queries.push(QueryRange { start, end });

        if let Some(reason) = &state.failure {
            return LogResponse::Failure(reason.clone());
        }
        if state.not_ready_remaining > 0 {
            state.not_ready_remaining -= 1;
            return LogResponse::NotReady;
        }

        LogResponse::Success(select_range(&state.event_batches, start, end, |b| b.timestamp))
    }

    async fn contexts(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> LogResponse<Vec<ContextBatch>> {
        let state = self.state.read().await;
        if let Some(reason) = &state.failure {
            return LogResponse::Failure(reason.clone());
        }
        LogResponse::Success(select_range(&state.context_batches, start, end, |b| b.timestamp))
    }

    async fn sampling_changes(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> LogResponse<Vec<SamplingChange>> {
        let state = self.state.read().await;
        if let Some(reason) = &state.failure {
            return LogResponse::Failure(reason.clone());
        }

        // The change in effect at `start` is the last one at or before it.
        let first = state.sampling.partition_point(|c| c.timestamp <= start);
        let from = first.saturating_sub(1);
        let to = state.sampling.partition_point(|c| c.timestamp < end);
        if from >= to {
            return LogResponse::Success(Vec::new());
        }
        LogResponse::Success(state.sampling[from..to].to_vec())
    }

    async fn jni_ref_events(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> LogResponse<Vec<JniRefEvent>> {
        let mut state = self.state.write().await;
        state.jni_queries.push(QueryRange { start, end });

        if let Some(reason) = &state.failure {
            return LogResponse::Failure(reason.clone());
        }
        LogResponse::Success(select_range(&state.jni_refs, start, end, |e| e.timestamp))
    }
}
