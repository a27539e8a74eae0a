//! User-visible notifications ("toasts").
//!
//! Every call to [`NotificationDispatcher::success`] (and friends) creates
//! one [`Toast`] with a strictly increasing id and schedules its own expiry
//! on the tokio runtime. Toasts are not evicted by newer ones; each lives
//! until its ttl fires or it is dismissed. Ids are never reused, including
//! after [`clear_all`](NotificationDispatcher::clear_all).
//!
//! The dispatcher also implements [`TransitionSink`], turning terminal
//! status transitions from the merger into messages.

use rag_admin_core::merge::{Transition, TransitionKind, TransitionSink};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    #[serde(rename = "ttl_ms", serialize_with = "ttl_millis")]
    pub ttl: Duration,
}

fn ttl_millis<S: serde::Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(ttl.as_millis() as u64)
}

struct Inner {
    toasts: Mutex<Vec<Toast>>,
    next_id: AtomicU64,
    default_ttl: Duration,
    updates: watch::Sender<Vec<Toast>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<Toast>> {
        self.toasts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, toasts: &[Toast]) {
        self.updates.send_replace(toasts.to_vec());
    }

    fn remove(&self, id: u64) -> bool {
        let mut toasts = self.lock();
        let before = toasts.len();
        toasts.retain(|t| t.id != id);
        let removed = toasts.len() != before;
        if removed {
            self.publish(&toasts);
        }
        removed
    }
}

/// Cheaply cloneable handle to a shared toast queue.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<Inner>,
}

impl NotificationDispatcher {
    pub fn new(default_ttl: Duration) -> Self {
        let (updates, _rx) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                toasts: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                default_ttl,
                updates,
            }),
        }
    }

    pub fn success(&self, message: impl Into<String>, duration: Option<Duration>) -> u64 {
        self.show(Severity::Success, message.into(), duration)
    }

    pub fn error(&self, message: impl Into<String>, duration: Option<Duration>) -> u64 {
        self.show(Severity::Error, message.into(), duration)
    }

    pub fn warning(&self, message: impl Into<String>, duration: Option<Duration>) -> u64 {
        self.show(Severity::Warning, message.into(), duration)
    }

    pub fn info(&self, message: impl Into<String>, duration: Option<Duration>) -> u64 {
        self.show(Severity::Info, message.into(), duration)
    }

    /// Remove one toast before its ttl fires. Unknown ids are ignored.
    pub fn dismiss(&self, id: u64) -> bool {
        self.inner.remove(id)
    }

    /// Remove every current toast. The id counter keeps counting.
    pub fn clear_all(&self) {
        let mut toasts = self.inner.lock();
        toasts.clear();
        self.inner.publish(&toasts);
    }

    /// Current toasts, oldest first.
    pub fn toasts(&self) -> Vec<Toast> {
        self.inner.lock().clone()
    }

    /// Receiver that observes the full toast list after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Toast>> {
        self.inner.updates.subscribe()
    }

    fn show(&self, severity: Severity, message: String, duration: Option<Duration>) -> u64 {
        let ttl = duration
            .filter(|d| !d.is_zero())
            .unwrap_or(self.inner.default_ttl);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        match severity {
            Severity::Success | Severity::Info => info!(toast = id, "{}", message),
            Severity::Warning => warn!(toast = id, "{}", message),
            Severity::Error => error!(toast = id, "{}", message),
        }

        {
            let mut toasts = self.inner.lock();
            toasts.push(Toast {
                id,
                message,
                severity,
                ttl,
            });
            self.inner.publish(&toasts);
        }

        self.schedule_expiry(id, ttl);
        id
    }

    fn schedule_expiry(&self, id: u64, ttl: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(toast = id, "no runtime; toast stays until dismissed");
            return;
        };
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = inner.upgrade() {
                inner.remove(id);
            }
        });
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl TransitionSink for NotificationDispatcher {
    fn on_transition(&self, transition: &Transition) {
        let name = &transition.model_name;
        match transition.kind {
            TransitionKind::TrainingReady => {
                self.success(format!("Model \"{}\" training completed", name), None);
            }
            TransitionKind::TrainingFailed => {
                self.error(format!("Model \"{}\" training failed", name), None);
            }
            TransitionKind::EmbeddingCompleted => {
                self.success(
                    format!("Document embedding completed for \"{}\"", name),
                    None,
                );
            }
            TransitionKind::EmbeddingFailed => {
                let reason = transition.error.as_deref().unwrap_or("unknown error");
                self.error(
                    format!("Document embedding failed for \"{}\": {}", name, reason),
                    None,
                );
            }
        }
    }
}
