//! Pull fallback: per-model embedding-status polling.
//!
//! [`PollingSupervisor`] runs one supervised periodic task per model id.
//! Each tick:
//!
//! 1. Reads the locally known embedding status for the id. Unless it is
//!    `Pending` or `Processing`, the tick is skipped without a request.
//! 2. Calls `GET /models/{id}/embedding-status` through a [`StatusSource`].
//! 3. Forwards the response to the session queue as a poll [`StatusEvent`].
//! 4. If the response is `Completed` or `Error`, the task removes itself.
//!    No external stop call is needed.
//!
//! A failed request is logged and retried on the next tick. Stopping a
//! model while its request is in flight lets that response through but
//! schedules nothing after it.

use rag_admin_core::models::{EmbeddingStatus, StatusEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::api::StatusSource;
use crate::task::CancelToken;

/// Shortest poll period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct PollEntry {
    known: EmbeddingStatus,
    cancel: CancelToken,
    generation: u64,
}

type Entries = Arc<Mutex<HashMap<String, PollEntry>>>;

/// Starts, stops, and self-terminates per-model polling tasks.
pub struct PollingSupervisor {
    source: Arc<dyn StatusSource>,
    events: mpsc::UnboundedSender<StatusEvent>,
    entries: Entries,
    generation: AtomicU64,
}

impl PollingSupervisor {
    /// Poll responses are delivered to `events`.
    pub fn new(source: Arc<dyn StatusSource>, events: mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self {
            source,
            events,
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Begin polling `model_id` once per `interval`, starting one interval
    /// from now. Restarting an id replaces its previous task. Intervals
    /// below one millisecond are raised to one millisecond.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_polling(&self, model_id: &str, interval: Duration, known: EmbeddingStatus) {
        let interval = interval.max(MIN_INTERVAL);
        let cancel = CancelToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = lock(&self.entries).insert(
            model_id.to_string(),
            PollEntry {
                known,
                cancel: cancel.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        debug!(model_id, interval_ms = interval.as_millis() as u64, %known, "polling started");
        tokio::spawn(poll_loop(
            model_id.to_string(),
            interval,
            self.source.clone(),
            self.events.clone(),
            self.entries.clone(),
            cancel,
            generation,
        ));
    }

    /// Cancel polling for `model_id`. Unknown ids are ignored.
    pub fn stop_polling(&self, model_id: &str) {
        if let Some(entry) = lock(&self.entries).remove(model_id) {
            entry.cancel.cancel();
            debug!(model_id, "polling stopped");
        }
    }

    pub fn stop_all(&self) {
        for (_, entry) in lock(&self.entries).drain() {
            entry.cancel.cancel();
        }
    }

    /// Record the latest embedding status seen for `model_id` from any
    /// source. A terminal status ends polling for that id.
    pub fn observe(&self, model_id: &str, status: EmbeddingStatus) {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(model_id) else {
            return;
        };
        entry.known = status;
        if status.is_terminal() {
            if let Some(entry) = entries.remove(model_id) {
                entry.cancel.cancel();
                debug!(model_id, %status, "polling stopped on observed terminal status");
            }
        }
    }

    pub fn is_polling(&self, model_id: &str) -> bool {
        lock(&self.entries).contains_key(model_id)
    }

    pub fn polled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.entries).keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for PollingSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, PollEntry>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Known status for this task's generation, or `None` if it was replaced
/// or stopped.
fn known_status(entries: &Entries, model_id: &str, generation: u64) -> Option<EmbeddingStatus> {
    lock(entries)
        .get(model_id)
        .filter(|e| e.generation == generation)
        .map(|e| e.known)
}

async fn poll_loop(
    model_id: String,
    interval: Duration,
    source: Arc<dyn StatusSource>,
    events: mpsc::UnboundedSender<StatusEvent>,
    entries: Entries,
    cancel: CancelToken,
    generation: u64,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(known) = known_status(&entries, &model_id, generation) else {
            break;
        };
        if !known.is_in_flight() {
            trace!(model_id = %model_id, %known, "embedding not in flight; skipping tick");
            continue;
        }

        // Not raced against `cancel`: a response already requested is
        // still delivered after a stop.
        match source.embedding_status(&model_id).await {
            Ok(report) => {
                let status = report.status;
                if let Some(entry) = lock(&entries)
                    .get_mut(&model_id)
                    .filter(|e| e.generation == generation)
                {
                    entry.known = status;
                }

                trace!(model_id = %model_id, %status, progress = ?report.progress, "embedding status polled");
                if events.send(report.into_event(model_id.clone())).is_err() {
                    debug!(model_id = %model_id, "session queue closed; polling ends");
                    break;
                }

                if status.is_terminal() {
                    let mut entries = lock(&entries);
                    if entries.get(&model_id).map(|e| e.generation) == Some(generation) {
                        entries.remove(&model_id);
                    }
                    info!(model_id = %model_id, %status, "embedding finished; polling ends");
                    break;
                }
            }
            Err(e) => {
                warn!(model_id = %model_id, error = %e, "embedding status poll failed; retrying next tick");
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }
}
