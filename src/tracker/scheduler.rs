use crate::core::{QueryRange, Result, TrackerError};
use crate::reconcile::{ReconcileEngine, ReconcileResult};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Lifecycle notifications for range loads, delivered in request order.
#[derive(Debug)]
pub enum LoadEvent {
    /// The worker picked up the range and began querying the log.
    Started(QueryRange),
    Completed(ReconcileResult),
    Failed(ReconcileFailure),
}

/// A reconciliation that did not complete.
#[derive(Debug)]
pub struct ReconcileFailure {
    pub range: QueryRange,
    pub error: TrackerError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Calls to `request`
    pub requested: u64,
    /// Pending requests replaced before the worker picked them up
    pub superseded: u64,
    /// Requests dropped because the same range was already queued or loaded
    pub skipped: u64,
    pub completed: u64,
    pub failed: u64,
    /// Instances registered after the latest load
    pub tracked_instances: usize,
    /// JNI references registered after the latest load
    pub tracked_jni_refs: usize,
    /// Range the tracked state reflects after the latest load
    pub reconciled: Option<QueryRange>,
}

#[derive(Default)]
struct SchedulerState {
    in_flight: Option<QueryRange>,
    pending: Option<QueryRange>,
    stats: SchedulerStats,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Notify,
}

/// Runs reconciliations one at a time on a background task.
///
/// At most one request waits behind the running one; a newer request replaces
/// it. A running reconciliation always finishes.
pub struct LoadScheduler {
    shared: Arc<Shared>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl LoadScheduler {
    /// Move `engine` onto a new worker task. Must be called within a tokio
    /// runtime.
    pub fn spawn(mut engine: ReconcileEngine, events: mpsc::UnboundedSender<LoadEvent>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::default()),
            wake: Notify::new(),
        });
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let worker_shared = Arc::clone(&shared);

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = worker_shared.wake.notified() => {
                        if let Err(err) = drain(&mut engine, &worker_shared, &events).await {
                            warn!("load worker stopping: {}", err);
                            break;
                        }
                    }
                }
            }
            debug!("load worker exited");
        });

        Self {
            shared,
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Queue `range` for reconciliation. Returns false when the request was
    /// dropped because the same range is already queued or loading.
    pub fn request(&self, range: QueryRange) -> Result<bool> {
        if self
            .join_handle
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
        {
            return Err(TrackerError::WorkerStopped);
        }

        {
            let mut state = self.shared.state.lock()?;
            state.stats.requested += 1;

            if state.pending == Some(range) {
                state.stats.skipped += 1;
                return Ok(false);
            }
            if state.in_flight == Some(range) {
                // The running load already produces the latest request.
                if let Some(replaced) = state.pending.take() {
                    debug!("dropping pending load of {}", replaced);
                    state.stats.superseded += 1;
                }
                state.stats.skipped += 1;
                return Ok(false);
            }
            if let Some(replaced) = state.pending.replace(range) {
                debug!("load of {} superseded by {}", replaced, range);
                state.stats.superseded += 1;
            }
        }

        self.shared.wake.notify_one();
        Ok(true)
    }

    pub fn stats(&self) -> Result<SchedulerStats> {
        Ok(self.shared.state.lock()?.stats.clone())
    }

    /// Signals the worker to stop and waits for it to finish. A load in
    /// progress completes first.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await.map_err(|err| {
                warn!("load worker join: {}", err);
                TrackerError::WorkerStopped
            })?;
        }
        Ok(())
    }
}

impl Drop for LoadScheduler {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Run pending requests until none is left.
async fn drain(
    engine: &mut ReconcileEngine,
    shared: &Shared,
    events: &mpsc::UnboundedSender<LoadEvent>,
) -> Result<()> {
    loop {
        let range = {
            let mut state = shared.state.lock()?;
            match state.pending.take() {
                Some(range) if engine.previous_range() == Some(range) => {
                    state.stats.skipped += 1;
                    continue;
                }
                Some(range) => {
                    state.in_flight = Some(range);
                    range
                }
                None => return Ok(()),
            }
        };

        publish(events, LoadEvent::Started(range));
        let outcome = engine.reconcile(range).await;

        {
            let mut state = shared.state.lock()?;
            state.in_flight = None;
            state.stats.tracked_instances = engine.tracked_instances();
            state.stats.tracked_jni_refs = engine.tracked_jni_refs();
            state.stats.reconciled = engine.previous_range();
            match &outcome {
                Ok(_) => state.stats.completed += 1,
                Err(_) => state.stats.failed += 1,
            }
        }

        match outcome {
            Ok(result) => {
                if let Some(message) = result.info_message {
                    info!("{}: {}", range, message);
                }
                publish(events, LoadEvent::Completed(result));
            }
            Err(error) => {
                warn!("load of {} failed: {}", range, error);
                publish(events, LoadEvent::Failed(ReconcileFailure { range, error }));
            }
        }
    }
}

fn publish(events: &mpsc::UnboundedSender<LoadEvent>, event: LoadEvent) {
    if events.send(event).is_err() {
        debug!("load event dropped, no listener");
    }
}
