//! Core data models shared by the push channel, the poller, and the merger.
//!
//! Wire types use the backend's camelCase JSON. Status enums accept both the
//! capitalised spelling used by the model endpoints (`"Processing"`) and the
//! lowercase spelling reported by the embedding-status endpoint
//! (`"processing"`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Training lifecycle of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelStatus {
    #[default]
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "training")]
    Training,
    #[serde(alias = "ready")]
    Ready,
    #[serde(alias = "error")]
    Error,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Pending => "Pending",
            ModelStatus::Training => "Training",
            ModelStatus::Ready => "Ready",
            ModelStatus::Error => "Error",
        }
    }

    /// `Ready` and `Error` end the training lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelStatus::Ready | ModelStatus::Error)
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ModelStatus::Pending),
            "training" => Ok(ModelStatus::Training),
            "ready" => Ok(ModelStatus::Ready),
            "error" => Ok(ModelStatus::Error),
            other => Err(format!(
                "unknown model status '{}': expected pending, training, ready, or error",
                other
            )),
        }
    }
}

/// Embedding lifecycle of a model, independent of [`ModelStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EmbeddingStatus {
    #[default]
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "processing")]
    Processing,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "error")]
    Error,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "Pending",
            EmbeddingStatus::Processing => "Processing",
            EmbeddingStatus::Completed => "Completed",
            EmbeddingStatus::Error => "Error",
        }
    }

    /// `Completed` and `Error` end the embedding lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EmbeddingStatus::Completed | EmbeddingStatus::Error)
    }

    /// Work is queued or running on the backend and may still change.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document attached to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreState {
    Active,
    Inactive,
}

/// Summary of the vector store backing a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStoreInfo {
    pub document_count: u64,
    #[serde(default)]
    pub last_updated: Option<String>,
    pub status: VectorStoreState,
}

/// A document-ingestion model as returned by `GET /models/{id}`.
///
/// Every view collection holds its own copy of this value; copies are
/// reconciled by [`StatusMerger`](crate::merge::StatusMerger), never shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ModelStatus,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<ModelFile>,
    /// Append-only, most recent entry last.
    #[serde(default, deserialize_with = "null_as_default")]
    pub training_logs: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub embedding_status: EmbeddingStatus,
    #[serde(default, deserialize_with = "progress::deserialize")]
    pub embedding_progress: u8,
    #[serde(default)]
    pub vector_store: Option<VectorStoreInfo>,
}

impl Model {
    /// A freshly created model with no files and nothing in flight.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            status: ModelStatus::Pending,
            date_created: None,
            files: Vec::new(),
            training_logs: Vec::new(),
            embedding_status: EmbeddingStatus::Pending,
            embedding_progress: 0,
            vector_store: None,
        }
    }
}

/// Response of `GET /models?page&limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPage {
    pub models: Vec<Model>,
    pub total: u64,
}

/// Response of `GET /models/{id}/embedding-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStatusReport {
    pub status: EmbeddingStatus,
    #[serde(default, deserialize_with = "progress::deserialize_opt")]
    pub progress: Option<u8>,
    #[serde(default)]
    pub error: Option<String>,
}

impl EmbeddingStatusReport {
    /// Convert a pull response into a merge event for `model_id`.
    pub fn into_event(self, model_id: impl Into<String>) -> StatusEvent {
        StatusEvent {
            embedding_status: Some(self.status),
            embedding_progress: self.progress,
            error: self.error,
            ..StatusEvent::new(model_id, EventOrigin::Poll)
        }
    }
}

/// A frame pushed by the status-update WebSocket.
///
/// `embeddingStatus` and `error` are not part of every backend's frames and
/// are honoured only when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUpdate {
    pub model_id: String,
    pub status: ModelStatus,
    #[serde(default)]
    pub training_logs: Option<Vec<String>>,
    #[serde(default, deserialize_with = "progress::deserialize_opt")]
    pub progress: Option<u8>,
    #[serde(default)]
    pub embedding_status: Option<EmbeddingStatus>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ModelUpdate {
    pub fn into_event(self) -> StatusEvent {
        StatusEvent {
            status: Some(self.status),
            embedding_status: self.embedding_status,
            embedding_progress: self.progress,
            training_logs: self.training_logs,
            error: self.error,
            ..StatusEvent::new(self.model_id, EventOrigin::Push)
        }
    }
}

/// Which source produced a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    Push,
    Poll,
    Local,
}

impl fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventOrigin::Push => "push",
            EventOrigin::Poll => "poll",
            EventOrigin::Local => "local",
        })
    }
}

/// A partial status update for one model.
///
/// Only the fields that are `Some` are written by the merger; an event
/// carrying only `embedding_progress` leaves every other field alone.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub model_id: String,
    pub status: Option<ModelStatus>,
    pub embedding_status: Option<EmbeddingStatus>,
    pub embedding_progress: Option<u8>,
    pub training_logs: Option<Vec<String>>,
    pub error: Option<String>,
    /// When this client received or produced the event. Not used for ordering.
    pub source_timestamp: DateTime<Utc>,
    pub origin: EventOrigin,
}

impl StatusEvent {
    /// An event that carries no field updates yet.
    pub fn new(model_id: impl Into<String>, origin: EventOrigin) -> Self {
        Self {
            model_id: model_id.into(),
            status: None,
            embedding_status: None,
            embedding_progress: None,
            training_logs: None,
            error: None,
            source_timestamp: Utc::now(),
            origin,
        }
    }

    pub fn with_status(mut self, status: ModelStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_embedding_status(mut self, status: EmbeddingStatus) -> Self {
        self.embedding_status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.embedding_progress = Some(progress.min(100));
        self
    }

    pub fn with_training_logs(mut self, logs: Vec<String>) -> Self {
        self.training_logs = Some(logs);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// True when the event would not change any field of any model.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.embedding_status.is_none()
            && self.embedding_progress.is_none()
            && self.training_logs.is_none()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Progress arrives as any JSON number (sometimes fractional); it is
/// stored as a whole percentage clamped to `0..=100`.
mod progress {
    use serde::{Deserialize, Deserializer};

    pub fn clamp(value: f64) -> u8 {
        if value.is_nan() {
            0
        } else {
            value.round().clamp(0.0, 100.0) as u8
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(deserialize_opt(deserializer)?.unwrap_or(0))
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<f64>::deserialize(deserializer)?.map(clamp))
    }
}
