//! Reconciliation of status events into view collections.
//!
//! The push channel and the poller both produce [`StatusEvent`]s, and the
//! same model may be copied into several [`ViewCollection`]s. The
//! [`StatusMerger`] is the only code that writes status fields into those
//! copies.
//!
//! # Merge rules
//!
//! 1. Locate the model by id in each collection (linear scan). Collections
//!    that do not hold the model are skipped.
//! 2. Write only the fields present on the event. An event that carries only
//!    `embedding_progress` leaves `status` and `training_logs` untouched.
//! 3. A field change into `Ready`/`Error` (training) or `Completed`/`Error`
//!    (embedding) is a terminal transition.
//! 4. Each terminal transition is reported once per [`StatusMerger::apply`]
//!    call, however many collections it touched.
//!
//! Applying an event twice is a no-op the second time: the field values are
//! already equal, so nothing changes and no transition is reported. This is
//! what lets a push frame and a trailing poll response report the same
//! terminal state safely.
//!
//! Events are not ordered against each other. Each field converges to the
//! value carried by the last event that set it.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::collection::ViewCollection;
use crate::models::{EmbeddingStatus, Model, ModelStatus, StatusEvent};

/// The kind of terminal transition observed during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    /// `status` entered `Ready`.
    TrainingReady,
    /// `status` entered `Error`.
    TrainingFailed,
    /// `embedding_status` entered `Completed`.
    EmbeddingCompleted,
    /// `embedding_status` entered `Error`.
    EmbeddingFailed,
}

/// A notification-worthy state change of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub model_id: String,
    pub model_name: String,
    pub kind: TransitionKind,
    /// Backend error message carried by the event, if any.
    pub error: Option<String>,
}

/// Receives terminal transitions detected by the merger.
pub trait TransitionSink: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}

/// Sink that drops every transition.
pub struct NoTransitions;

impl TransitionSink for NoTransitions {
    fn on_transition(&self, _transition: &Transition) {}
}

/// Result of merging one event into one model copy.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// At least one field value changed.
    pub changed: bool,
    pub transitions: Vec<TransitionKind>,
}

/// Applies status events to every collection holding the target model.
pub struct StatusMerger {
    sink: Arc<dyn TransitionSink>,
}

impl StatusMerger {
    pub fn new(sink: Arc<dyn TransitionSink>) -> Self {
        Self { sink }
    }

    /// A merger that reports nothing.
    pub fn silent() -> Self {
        Self::new(Arc::new(NoTransitions))
    }

    /// Merge `event` into every collection that holds its model.
    ///
    /// Returns the number of collections whose copy actually changed. An
    /// event for an id held by no collection returns `0` and touches nothing.
    pub fn apply(&self, event: &StatusEvent, collections: &mut [&mut ViewCollection]) -> usize {
        let mut updated = 0;
        let mut transitions: Vec<Transition> = Vec::new();

        for collection in collections.iter_mut() {
            let Some(model) = collection.get_mut(&event.model_id) else {
                trace!(
                    model_id = %event.model_id,
                    collection = collection.name(),
                    "model not in collection; skipping"
                );
                continue;
            };

            let outcome = merge_into(model, event);
            if outcome.changed {
                updated += 1;
            }
            for kind in outcome.transitions {
                if transitions.iter().all(|t| t.kind != kind) {
                    transitions.push(Transition {
                        model_id: model.id.clone(),
                        model_name: model.name.clone(),
                        kind,
                        error: event.error.clone(),
                    });
                }
            }
        }

        debug!(
            model_id = %event.model_id,
            origin = %event.origin,
            updated,
            transitions = transitions.len(),
            "merged status event"
        );

        for transition in &transitions {
            self.sink.on_transition(transition);
        }
        updated
    }
}

/// Write the fields present on `event` into `model`.
pub fn merge_into(model: &mut Model, event: &StatusEvent) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    if let Some(status) = event.status {
        if model.status != status {
            let previous = model.status;
            model.status = status;
            outcome.changed = true;
            if let Some(kind) = training_transition(previous, status) {
                outcome.transitions.push(kind);
            }
        }
    }

    if let Some(status) = event.embedding_status {
        if model.embedding_status != status {
            let previous = model.embedding_status;
            model.embedding_status = status;
            outcome.changed = true;
            if let Some(kind) = embedding_transition(previous, status) {
                outcome.transitions.push(kind);
            }
        }
    }

    if let Some(progress) = event.embedding_progress {
        let progress = progress.min(100);
        if model.embedding_progress != progress {
            model.embedding_progress = progress;
            outcome.changed = true;
        }
    }

    if let Some(logs) = &event.training_logs {
        if &model.training_logs != logs {
            model.training_logs = logs.clone();
            outcome.changed = true;
        }
    }

    outcome
}

fn training_transition(previous: ModelStatus, next: ModelStatus) -> Option<TransitionKind> {
    if previous == next {
        return None;
    }
    match next {
        ModelStatus::Ready => Some(TransitionKind::TrainingReady),
        ModelStatus::Error => Some(TransitionKind::TrainingFailed),
        _ => None,
    }
}

fn embedding_transition(
    previous: EmbeddingStatus,
    next: EmbeddingStatus,
) -> Option<TransitionKind> {
    if previous == next {
        return None;
    }
    match next {
        EmbeddingStatus::Completed => Some(TransitionKind::EmbeddingCompleted),
        EmbeddingStatus::Error => Some(TransitionKind::EmbeddingFailed),
        _ => None,
    }
}
