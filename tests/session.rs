//! Integration tests for the synchronization session.
//!
//! The backend is an in-memory `ModelApi` with scripted embedding-status
//! responses, so polling runs on paused tokio time without any network.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rag_admin::api::{ModelApi, StatusSource};
use rag_admin::collection::ModelFilter;
use rag_admin::loading::DEFAULT_KEY;
use rag_admin::models::{
    EmbeddingStatus, EmbeddingStatusReport, EventOrigin, Model, ModelPage, ModelStatus,
    StatusEvent,
};
use rag_admin::notify::{NotificationDispatcher, Severity};
use rag_admin::session::SyncSession;
use rag_admin::task::CancelToken;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const INTERVAL: Duration = Duration::from_secs(5);

// ─── Fake backend ───────────────────────────────────────────────────

#[derive(Default)]
struct FakeBackend {
    summaries: Vec<Model>,
    details: HashMap<String, Model>,
    statuses: Mutex<VecDeque<EmbeddingStatusReport>>,
    train_error: Option<String>,
    detail_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
}

impl FakeBackend {
    fn with_models(models: Vec<Model>) -> Self {
        Self {
            summaries: models,
            ..Default::default()
        }
    }

    fn detail(mut self, model: Model) -> Self {
        self.details.insert(model.id.clone(), model);
        self
    }

    fn script(self, reports: Vec<EmbeddingStatusReport>) -> Self {
        *self.statuses.lock().unwrap() = reports.into();
        self
    }

    fn failing_train(mut self, message: &str) -> Self {
        self.train_error = Some(message.to_string());
        self
    }

    fn live(&self) -> Vec<Model> {
        let deleted = self.deleted.lock().unwrap();
        self.summaries
            .iter()
            .filter(|m| !deleted.contains(&m.id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StatusSource for FakeBackend {
    async fn embedding_status(&self, _model_id: &str) -> Result<EmbeddingStatusReport> {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted status"))
    }
}

#[async_trait]
impl ModelApi for FakeBackend {
    async fn list_models(&self, page: u32, limit: u32) -> Result<ModelPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let live = self.live();
        let skip = (page.saturating_sub(1) * limit) as usize;
        Ok(ModelPage {
            total: live.len() as u64,
            models: live.into_iter().skip(skip).take(limit as usize).collect(),
        })
    }

    async fn get_model(&self, model_id: &str) -> Result<Model> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .get(model_id)
            .or_else(|| self.summaries.iter().find(|m| m.id == model_id))
            .cloned()
            .ok_or_else(|| anyhow!("Model not found"))
    }

    async fn train_model(&self, _model_id: &str) -> Result<Value> {
        match &self.train_error {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(json!({ "message": "Training started" })),
        }
    }

    async fn reembed_model(&self, _model_id: &str) -> Result<Value> {
        Ok(json!({ "message": "Re-embedding started" }))
    }

    async fn create_model(&self, name: &str, description: &str) -> Result<Model> {
        let mut model = Model::new("m-new", name);
        model.description = description.to_string();
        Ok(model)
    }

    async fn delete_model(&self, model_id: &str) -> Result<()> {
        if !self.live().iter().any(|m| m.id == model_id) {
            return Err(anyhow!("Model not found"));
        }
        self.deleted.lock().unwrap().push(model_id.to_string());
        Ok(())
    }
}

fn model(id: &str, name: &str, embedding: EmbeddingStatus) -> Model {
    let mut model = Model::new(id, name);
    model.embedding_status = embedding;
    if embedding == EmbeddingStatus::Completed {
        model.embedding_progress = 100;
    }
    model
}

fn report(status: EmbeddingStatus, progress: u8) -> EmbeddingStatusReport {
    EmbeddingStatusReport {
        status,
        progress: Some(progress),
        error: None,
    }
}

fn session(backend: FakeBackend) -> (SyncSession, Arc<FakeBackend>) {
    let backend = Arc::new(backend);
    let session = SyncSession::new(
        backend.clone(),
        None,
        INTERVAL,
        NotificationDispatcher::default(),
    );
    (session, backend)
}

fn messages(session: &SyncSession) -> Vec<String> {
    session
        .notifications()
        .toasts()
        .into_iter()
        .map(|t| t.message)
        .collect()
}

// ─── Loading ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_load_page_refreshes_unfinished_models() {
    let mut processing = model("m2", "Handbook", EmbeddingStatus::Processing);
    processing.training_logs = vec!["full detail".to_string()];
    let backend = FakeBackend::with_models(vec![
        model("m1", "Contracts", EmbeddingStatus::Completed),
        model("m2", "Handbook", EmbeddingStatus::Processing),
    ])
    .detail(processing);
    let (mut session, backend) = session(backend);

    session.load_page(1, 10).await.unwrap();

    assert_eq!(backend.detail_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.models().len(), 2);
    assert_eq!(session.filtered().len(), 2);
    assert_eq!(
        session.models().get("m2").unwrap().training_logs,
        vec!["full detail".to_string()]
    );
    assert!(session.supervisor().is_polling("m2"));
    assert!(!session.supervisor().is_polling("m1"));
    assert!(!session.loading().is_visible(DEFAULT_KEY));
    assert_eq!(session.total(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reloading_page_stops_polling_models_no_longer_held() {
    let backend = FakeBackend::with_models(vec![model("m1", "A", EmbeddingStatus::Processing)]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();
    assert!(session.supervisor().is_polling("m1"));

    session.watch_embedding("gone");
    session.load_page(1, 10).await.unwrap();
    assert!(!session.supervisor().is_polling("gone"));
    assert!(session.supervisor().is_polling("m1"));
}

// ─── Merging ────────────────────────────────────────────────────────

/// A pending model the user watches: the next poll tick reports progress,
/// and both the list and the filtered view show it.
#[tokio::test(start_paused = true)]
async fn test_poll_result_reaches_every_view() {
    let backend = FakeBackend::with_models(vec![model("m1", "Contracts", EmbeddingStatus::Pending)])
        .script(vec![
            report(EmbeddingStatus::Processing, 10),
            report(EmbeddingStatus::Completed, 100),
        ]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();
    assert!(!session.supervisor().is_polling("m1"));

    session.watch_embedding("m1");
    assert_eq!(session.step().await, Some(2));

    for view in [session.models(), session.filtered()] {
        let m1 = view.get("m1").unwrap();
        assert_eq!(m1.embedding_status, EmbeddingStatus::Processing);
        assert_eq!(m1.embedding_progress, 10);
    }
    assert!(session.notifications().toasts().is_empty());

    assert_eq!(session.step().await, Some(2));
    assert_eq!(
        session.models().get("m1").unwrap().embedding_status,
        EmbeddingStatus::Completed
    );
    assert_eq!(
        messages(&session),
        vec!["Document embedding completed for \"Contracts\"".to_string()]
    );
    assert!(!session.supervisor().is_polling("m1"));
}

#[tokio::test(start_paused = true)]
async fn test_push_completion_stops_polling_and_notifies_once() {
    let contracts = model("m1", "Contracts", EmbeddingStatus::Processing);
    let backend = FakeBackend::with_models(vec![contracts]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();
    session.load_detail("m1").await.unwrap();
    assert!(session.supervisor().is_polling("m1"));

    let done = StatusEvent::new("m1", EventOrigin::Push)
        .with_status(ModelStatus::Ready)
        .with_embedding_status(EmbeddingStatus::Completed)
        .with_progress(100);
    assert_eq!(session.apply(done.clone()), 3);
    assert_eq!(session.apply(done), 0);

    assert!(!session.supervisor().is_polling("m1"));
    assert_eq!(
        messages(&session),
        vec![
            "Model \"Contracts\" training completed".to_string(),
            "Document embedding completed for \"Contracts\"".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_push_processing_starts_polling_for_held_model() {
    let backend = FakeBackend::with_models(vec![model("m1", "A", EmbeddingStatus::Completed)]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();

    let started = StatusEvent::new("m1", EventOrigin::Push)
        .with_status(ModelStatus::Ready)
        .with_embedding_status(EmbeddingStatus::Processing)
        .with_progress(0);
    session.apply(started.clone());
    assert!(session.supervisor().is_polling("m1"));

    let mut stranger = started;
    stranger.model_id = "nobody".to_string();
    assert_eq!(session.apply(stranger), 0);
    assert!(!session.supervisor().is_polling("nobody"));
}

#[tokio::test(start_paused = true)]
async fn test_filter_is_a_view_of_the_loaded_page() {
    let backend = FakeBackend::with_models(vec![
        model("m1", "Contracts", EmbeddingStatus::Completed),
        model("m2", "Handbook", EmbeddingStatus::Completed),
    ]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();

    session.set_filter(ModelFilter {
        search: Some("hand".to_string()),
        status: None,
    });
    assert_eq!(session.filtered().len(), 1);

    let event = StatusEvent::new("m2", EventOrigin::Push).with_status(ModelStatus::Training);
    assert_eq!(session.apply(event), 2);
    assert_eq!(
        session.filtered().get("m2").unwrap().status,
        ModelStatus::Training
    );
    assert_eq!(session.models().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_merges_until_cancelled() {
    let backend = FakeBackend::with_models(vec![model("m1", "Contracts", EmbeddingStatus::Pending)])
        .script(vec![report(EmbeddingStatus::Processing, 30)]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();
    session.watch_embedding("m1");

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        trigger.cancel();
    });
    session.run(&cancel).await;

    assert_eq!(session.models().get("m1").unwrap().embedding_progress, 30);
    assert!(session.supervisor().is_polling("m1"));
    assert_eq!(session.drain(), 0);
}

// ─── Actions ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_train_marks_model_training() {
    let contracts = model("m1", "Contracts", EmbeddingStatus::Completed);
    let backend = FakeBackend::with_models(vec![contracts]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();

    session.train("m1").await.unwrap();

    let m1 = session.models().get("m1").unwrap();
    assert_eq!(m1.status, ModelStatus::Training);
    assert!(m1.training_logs[0].starts_with("Training started at "));
    assert_eq!(
        messages(&session),
        vec!["Training initiated successfully".to_string()]
    );
    assert!(!session.loading().is_visible(DEFAULT_KEY));
}

#[tokio::test(start_paused = true)]
async fn test_train_failure_records_error_without_duplicate_toast() {
    let contracts = model("m1", "Contracts", EmbeddingStatus::Completed);
    let backend = FakeBackend::with_models(vec![contracts])
        .failing_train("backend unavailable");
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();

    assert!(session.train("m1").await.is_err());

    let m1 = session.models().get("m1").unwrap();
    assert_eq!(m1.status, ModelStatus::Error);
    let logs = &m1.training_logs;
    assert!(logs[logs.len() - 2].starts_with("Training failed at "));
    assert_eq!(logs[logs.len() - 1], "Error: backend unavailable");

    let toasts = session.notifications().toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].severity, Severity::Error);
    assert_eq!(
        toasts[0].message,
        "Error initiating training: backend unavailable"
    );
}

#[tokio::test(start_paused = true)]
async fn test_reembed_resets_progress_and_polls() {
    let contracts = model("m1", "Contracts", EmbeddingStatus::Completed);
    let backend = FakeBackend::with_models(vec![contracts])
        .script(vec![report(EmbeddingStatus::Error, 40)]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();

    session.reembed("m1").await.unwrap();

    let m1 = session.models().get("m1").unwrap();
    assert_eq!(m1.embedding_status, EmbeddingStatus::Pending);
    assert_eq!(m1.embedding_progress, 0);
    assert!(session.supervisor().is_polling("m1"));
    assert_eq!(
        messages(&session),
        vec!["Re-embedding process started".to_string()]
    );

    session.step().await.unwrap();
    assert_eq!(
        session.models().get("m1").unwrap().embedding_status,
        EmbeddingStatus::Error
    );
    assert!(!session.supervisor().is_polling("m1"));
    assert!(messages(&session)
        .iter()
        .any(|m| m.starts_with("Document embedding failed for \"Contracts\"")));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_everything() {
    let backend = FakeBackend::with_models(vec![model("m1", "A", EmbeddingStatus::Processing)]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();
    session.notifications().info("hello", None);

    session.shutdown();

    assert!(session.supervisor().polled_ids().is_empty());
    assert!(session.notifications().toasts().is_empty());
    assert!(!session.is_connected());
}

// ─── Create and delete ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_create_model_joins_matching_views() {
    let contracts = model("m1", "Contracts", EmbeddingStatus::Completed);
    let backend = FakeBackend::with_models(vec![contracts]);
    let (mut session, _) = session(backend);
    session.load_page(1, 10).await.unwrap();
    session.set_filter(ModelFilter {
        search: Some("invoice".to_string()),
        status: None,
    });

    let created = session.create_model("  Invoices ", "Q3 invoices").await.unwrap();

    assert_eq!(created.name, "Invoices");
    assert_eq!(session.total(), 2);
    assert_eq!(session.models().models().last().unwrap().id, "m-new");
    assert_eq!(session.filtered().len(), 1);
    assert!(session.filtered().contains("m-new"));
    assert_eq!(messages(&session), vec!["Model created successfully".to_string()]);
    assert!(!session.loading().is_visible(DEFAULT_KEY));
}

#[tokio::test(start_paused = true)]
async fn test_create_model_requires_a_name() {
    let (mut session, _) = session(FakeBackend::default());

    assert!(session.create_model("   ", "whatever").await.is_err());

    assert!(session.models().is_empty());
    let toasts = session.notifications().toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].severity, Severity::Error);
    assert_eq!(toasts[0].message, "Model name is required");
}

#[tokio::test(start_paused = true)]
async fn test_delete_model_drops_it_everywhere_and_reloads() {
    let backend = FakeBackend::with_models(vec![
        model("m1", "Contracts", EmbeddingStatus::Processing),
        model("m2", "Handbook", EmbeddingStatus::Completed),
    ]);
    let (mut session, backend) = session(backend);
    session.load_page(1, 10).await.unwrap();
    assert!(session.supervisor().is_polling("m1"));

    session.delete_model("m1").await.unwrap();

    assert_eq!(backend.list_calls.load(Ordering::SeqCst), 2);
    assert!(!session.models().contains("m1"));
    assert!(!session.filtered().contains("m1"));
    assert!(!session.detail().contains("m1"));
    assert!(!session.supervisor().is_polling("m1"));
    assert_eq!(session.total(), 1);
    assert_eq!(messages(&session), vec!["Model deleted successfully".to_string()]);
    assert!(!session.loading().is_visible(DEFAULT_KEY));
}

#[tokio::test(start_paused = true)]
async fn test_deleting_last_row_of_a_page_steps_back() {
    let backend = FakeBackend::with_models(vec![
        model("m1", "A", EmbeddingStatus::Completed),
        model("m2", "B", EmbeddingStatus::Completed),
        model("m3", "C", EmbeddingStatus::Completed),
    ]);
    let (mut session, _) = session(backend);
    session.load_page(2, 2).await.unwrap();
    assert_eq!(session.models().len(), 1);

    session.delete_model("m3").await.unwrap();

    assert_eq!(session.page(), 1);
    assert_eq!(session.total(), 2);
    assert_eq!(session.models().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delete_failure_keeps_views() {
    let backend = FakeBackend::with_models(vec![model("m1", "A", EmbeddingStatus::Completed)]);
    let (mut session, backend) = session(backend);
    session.load_page(1, 10).await.unwrap();

    assert!(session.delete_model("missing").await.is_err());

    assert_eq!(backend.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.models().len(), 1);
    let toasts = session.notifications().toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].message, "Error deleting model: Model not found");
    assert!(!session.loading().is_visible(DEFAULT_KEY));
}
