//! Keyed "operation in flight" indicators.
//!
//! Each key is an independent `{visible, message}` pair published through a
//! `tokio::sync::watch` channel. [`DEFAULT_KEY`] drives the global overlay;
//! other keys (e.g. `"upload"`) are read by scoped UI elements.
//!
//! Keys are last-writer-wins, not reference-counted: one `hide` clears a key
//! no matter how many `show` calls preceded it, and `hide` on a key that
//! was never shown does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadingState {
    pub visible: bool,
    pub message: Option<String>,
}

#[derive(Clone, Default)]
pub struct LoadingGate {
    keys: Arc<Mutex<HashMap<String, watch::Sender<LoadingState>>>>,
}

impl LoadingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, key: &str, message: Option<&str>) {
        let state = LoadingState {
            visible: true,
            message: message.map(str::to_string),
        };
        let mut keys = self.lock();
        match keys.get(key) {
            Some(tx) => {
                tx.send_replace(state);
            }
            None => {
                let (tx, _rx) = watch::channel(state);
                keys.insert(key.to_string(), tx);
            }
        }
    }

    pub fn hide(&self, key: &str) {
        if let Some(tx) = self.lock().get(key) {
            if tx.borrow().visible {
                tx.send_replace(LoadingState::default());
            }
        }
    }

    /// Replace the message of a visible key. Hidden keys are left alone.
    pub fn set_message(&self, key: &str, message: &str) {
        if let Some(tx) = self.lock().get(key) {
            tx.send_if_modified(|state| {
                if state.visible && state.message.as_deref() != Some(message) {
                    state.message = Some(message.to_string());
                    true
                } else {
                    false
                }
            });
        }
    }

    pub fn state(&self, key: &str) -> LoadingState {
        self.lock()
            .get(key)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    pub fn is_visible(&self, key: &str) -> bool {
        self.state(key).visible
    }

    /// Watch one key. Subscribing to a key that was never shown yields a
    /// hidden state until it is.
    pub fn subscribe(&self, key: &str) -> watch::Receiver<LoadingState> {
        self.lock()
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(LoadingState::default()).0)
            .subscribe()
    }

    /// Keys currently visible, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, tx)| tx.borrow().visible)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Show `key` until the returned guard is dropped.
    pub fn scoped(&self, key: &str, message: Option<&str>) -> LoadingGuard {
        self.show(key, message);
        LoadingGuard {
            gate: self.clone(),
            key: key.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<LoadingState>>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Hides its key on drop.
pub struct LoadingGuard {
    gate: LoadingGate,
    key: String,
}

impl LoadingGuard {
    pub fn set_message(&self, message: &str) {
        self.gate.set_message(&self.key, message);
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.gate.hide(&self.key);
    }
}
