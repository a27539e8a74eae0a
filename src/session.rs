//! The synchronization session: single owner of the view collections.
//!
//! ```text
//! ┌──────────────────────┐            ┌─────────────────────┐
//! │ ReconnectingChannel  │──push────▶│                     │
//! └──────────────────────┘            │     SyncSession     │──▶ StatusMerger ──▶ models / filtered / detail
//! ┌──────────────────────┐            │  (one event queue)  │          │
//! │ PollingSupervisor    │──poll────▶│                     │          ▼
//! └──────────────────────┘            └─────────────────────┘   NotificationDispatcher
//! ```
//!
//! Background tasks only produce [`StatusEvent`]s. The session consumes them
//! one at a time and is the only code that mutates the collections, so no
//! two merges ever interleave. Events for different models interleave
//! freely; events for the same model are merged per field in arrival order.
//!
//! Membership of the collections changes only through [`SyncSession::load_page`],
//! [`SyncSession::load_detail`], [`SyncSession::create_model`] and
//! [`SyncSession::delete_model`]; merging never inserts or removes.

use anyhow::{bail, Result};
use rag_admin_core::collection::{is_valid_page, page_count, ModelFilter, ViewCollection};
use rag_admin_core::merge::StatusMerger;
use rag_admin_core::models::{EmbeddingStatus, EventOrigin, Model, ModelStatus, StatusEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ModelApi, StatusSource};
use crate::channel::{Backoff, ReconnectingChannel, StatusStream};
use crate::config::Config;
use crate::loading::{LoadingGate, DEFAULT_KEY};
use crate::notify::NotificationDispatcher;
use crate::poller::PollingSupervisor;
use crate::task::CancelToken;

pub const MODELS: &str = "models";
pub const FILTERED: &str = "filtered";
pub const DETAIL: &str = "detail";

pub struct SyncSession {
    api: Arc<dyn ModelApi>,
    channel: Option<ReconnectingChannel>,
    stream: Option<StatusStream>,
    supervisor: PollingSupervisor,
    poll_events: mpsc::UnboundedReceiver<StatusEvent>,
    merger: StatusMerger,
    poll_interval: Duration,
    loading: LoadingGate,
    notifications: NotificationDispatcher,
    models: ViewCollection,
    filtered: ViewCollection,
    detail: ViewCollection,
    filter: ModelFilter,
    page: u32,
    limit: Option<u32>,
    total: u64,
}

impl SyncSession {
    /// Build a session around `api`. Without a `channel` the session runs on
    /// the poll fallback alone.
    pub fn new<A>(
        api: Arc<A>,
        channel: Option<ReconnectingChannel>,
        poll_interval: Duration,
        notifications: NotificationDispatcher,
    ) -> Self
    where
        A: ModelApi + 'static,
    {
        let (poll_tx, poll_events) = mpsc::unbounded_channel();
        let source: Arc<dyn StatusSource> = api.clone();
        let supervisor = PollingSupervisor::new(source, poll_tx);

        Self {
            api,
            channel,
            stream: None,
            supervisor,
            poll_events,
            merger: StatusMerger::new(Arc::new(notifications.clone())),
            poll_interval,
            loading: LoadingGate::new(),
            notifications,
            models: ViewCollection::new(MODELS),
            filtered: ViewCollection::new(FILTERED),
            detail: ViewCollection::new(DETAIL),
            filter: ModelFilter::default(),
            page: 1,
            limit: None,
            total: 0,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config.api)?);
        let channel = ReconnectingChannel::new(
            config.api.ws_url.clone(),
            Backoff::from_config(&config.channel),
        );
        let notifications = NotificationDispatcher::new(Duration::from_millis(
            config.notifications.default_duration_ms,
        ));
        Ok(Self::new(
            api,
            Some(channel),
            config.polling.interval(),
            notifications,
        ))
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub fn models(&self) -> &ViewCollection {
        &self.models
    }

    pub fn filtered(&self) -> &ViewCollection {
        &self.filtered
    }

    pub fn detail(&self) -> &ViewCollection {
        &self.detail
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn loading(&self) -> &LoadingGate {
        &self.loading
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    pub fn supervisor(&self) -> &PollingSupervisor {
        &self.supervisor
    }

    pub fn is_connected(&self) -> bool {
        self.channel
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    // ─── Push channel ───────────────────────────────────────────────

    /// Open (or reopen) the push channel. No-op for poll-only sessions.
    pub fn connect(&mut self) {
        if let Some(channel) = &self.channel {
            info!(url = channel.url(), "connecting status channel");
            self.stream = Some(channel.connect());
        }
    }

    pub fn disconnect(&mut self) {
        if let Some(channel) = &self.channel {
            channel.disconnect();
        }
        self.stream = None;
    }

    // ─── Loading ────────────────────────────────────────────────────

    /// Load one page of models, refreshing full details for every model
    /// whose embedding has not completed.
    pub async fn load_page(&mut self, page: u32, limit: u32) -> Result<()> {
        let _busy = self.loading.scoped(DEFAULT_KEY, Some("Loading models..."));

        let listing = match self.api.list_models(page, limit).await {
            Ok(listing) => listing,
            Err(e) => {
                self.notifications.error(format!("Error loading models: {}", e), None);
                return Err(e);
            }
        };

        let mut models = listing.models;
        let mut details = JoinSet::new();
        for (index, model) in models.iter().enumerate() {
            if model.embedding_status == EmbeddingStatus::Completed {
                continue;
            }
            let api = self.api.clone();
            let id = model.id.clone();
            details.spawn(async move { (index, api.get_model(&id).await) });
        }
        while let Some(joined) = details.join_next().await {
            match joined {
                Ok((index, Ok(detail))) => models[index] = detail,
                Ok((index, Err(e))) => {
                    warn!(model_id = %models[index].id, error = %e, "model detail fetch failed; keeping summary");
                }
                Err(e) => warn!(error = %e, "model detail task failed"),
            }
        }

        debug!(page, count = models.len(), total = listing.total, "models loaded");
        self.models.replace_all(models);
        self.page = page;
        self.limit = Some(limit);
        self.total = listing.total;
        self.refresh_filtered();
        self.sync_polling();
        Ok(())
    }

    /// Load a single model into the detail collection.
    pub async fn load_detail(&mut self, model_id: &str) -> Result<()> {
        let _busy = self.loading.scoped(DEFAULT_KEY, Some("Loading model details..."));

        match self.api.get_model(model_id).await {
            Ok(model) => {
                self.detail.replace_all(vec![model]);
                self.sync_polling();
                Ok(())
            }
            Err(e) => {
                self.notifications.error(format!("Error loading model: {}", e), None);
                Err(e)
            }
        }
    }

    pub fn set_filter(&mut self, filter: ModelFilter) {
        self.filter = filter;
        self.refresh_filtered();
    }

    fn refresh_filtered(&mut self) {
        self.filtered = self.filter.apply(FILTERED, &self.models);
    }

    fn find(&self, model_id: &str) -> Option<&Model> {
        self.detail
            .get(model_id)
            .or_else(|| self.models.get(model_id))
    }

    fn holds(&self, model_id: &str) -> bool {
        self.find(model_id).is_some()
    }

    /// Start polling held models that are processing; stop polling ids no
    /// collection holds any more.
    fn sync_polling(&self) {
        for id in self.supervisor.polled_ids() {
            if !self.holds(&id) {
                self.supervisor.stop_polling(&id);
            }
        }
        for model in self.models.iter().chain(self.detail.iter()) {
            if model.embedding_status == EmbeddingStatus::Processing
                && !self.supervisor.is_polling(&model.id)
            {
                self.supervisor.start_polling(
                    &model.id,
                    self.poll_interval,
                    model.embedding_status,
                );
            }
        }
    }

    /// Register interest in `model_id`'s embedding progress using its
    /// locally known status.
    pub fn watch_embedding(&self, model_id: &str) {
        let known = self
            .find(model_id)
            .map(|m| m.embedding_status)
            .unwrap_or(EmbeddingStatus::Pending);
        self.supervisor.start_polling(model_id, self.poll_interval, known);
    }

    // ─── Merging ────────────────────────────────────────────────────

    /// Merge one event into every collection and update polling interest.
    ///
    /// Returns the number of collections whose copy changed.
    pub fn apply(&mut self, event: StatusEvent) -> usize {
        let updated = self.merger.apply(
            &event,
            &mut [&mut self.models, &mut self.filtered, &mut self.detail],
        );
        self.track(&event);
        updated
    }

    /// Merge a change made by this client. No notification is raised; the
    /// caller reports the outcome itself.
    fn apply_local(&mut self, event: StatusEvent) -> usize {
        let updated = StatusMerger::silent().apply(
            &event,
            &mut [&mut self.models, &mut self.filtered, &mut self.detail],
        );
        self.track(&event);
        updated
    }

    fn track(&self, event: &StatusEvent) {
        let Some(status) = event.embedding_status else {
            return;
        };
        if status == EmbeddingStatus::Processing
            && !self.supervisor.is_polling(&event.model_id)
            && self.holds(&event.model_id)
        {
            self.supervisor.start_polling(&event.model_id, self.poll_interval, status);
        } else {
            self.supervisor.observe(&event.model_id, status);
        }
    }

    /// Next event from either source. `None` only when both are closed.
    pub async fn next_event(&mut self) -> Option<StatusEvent> {
        match self.stream.as_mut() {
            Some(stream) => tokio::select! {
                Some(event) = stream.next_event() => Some(event),
                Some(event) = self.poll_events.recv() => Some(event),
                else => None,
            },
            None => self.poll_events.recv().await,
        }
    }

    /// Wait for one event and merge it.
    pub async fn step(&mut self) -> Option<usize> {
        let event = self.next_event().await?;
        Some(self.apply(event))
    }

    /// Merge every event that is already queued without waiting.
    pub fn drain(&mut self) -> usize {
        let mut events = Vec::new();
        if let Some(stream) = self.stream.as_mut() {
            while let Some(event) = stream.try_next_event() {
                events.push(event);
            }
        }
        while let Ok(event) = self.poll_events.try_recv() {
            events.push(event);
        }
        let count = events.len();
        for event in events {
            self.apply(event);
        }
        count
    }

    /// Merge events until `cancel` fires.
    pub async fn run(&mut self, cancel: &CancelToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => None,
                event = self.next_event() => event,
            };
            match event {
                Some(event) => {
                    self.apply(event);
                }
                None => break,
            }
        }
    }

    // ─── Actions ────────────────────────────────────────────────────

    /// Trigger training. On success the model is marked `Training` locally;
    /// on failure it is marked `Error` with the failure appended to its logs.
    pub async fn train(&mut self, model_id: &str) -> Result<()> {
        let _busy = self.loading.scoped(DEFAULT_KEY, Some("Initiating model training..."));
        let mut logs = self
            .find(model_id)
            .map(|m| m.training_logs.clone())
            .unwrap_or_default();

        match self.api.train_model(model_id).await {
            Ok(_) => {
                logs.push(format!("Training started at {}", local_timestamp()));
                self.apply_local(
                    StatusEvent::new(model_id, EventOrigin::Local)
                        .with_status(ModelStatus::Training)
                        .with_training_logs(logs),
                );
                self.notifications.success("Training initiated successfully", None);
                Ok(())
            }
            Err(e) => {
                logs.push(format!("Training failed at {}", local_timestamp()));
                logs.push(format!("Error: {}", e));
                self.apply_local(
                    StatusEvent::new(model_id, EventOrigin::Local)
                        .with_status(ModelStatus::Error)
                        .with_training_logs(logs),
                );
                self.notifications.error(format!("Error initiating training: {}", e), None);
                Err(e)
            }
        }
    }

    /// Restart embedding for a model and start polling its progress.
    pub async fn reembed(&mut self, model_id: &str) -> Result<()> {
        let _busy = self
            .loading
            .scoped(DEFAULT_KEY, Some("Starting re-embedding process..."));

        match self.api.reembed_model(model_id).await {
            Ok(_) => {
                self.apply_local(
                    StatusEvent::new(model_id, EventOrigin::Local)
                        .with_embedding_status(EmbeddingStatus::Pending)
                        .with_progress(0),
                );
                self.supervisor.start_polling(
                    model_id,
                    self.poll_interval,
                    EmbeddingStatus::Pending,
                );
                self.notifications.success("Re-embedding process started", None);
                Ok(())
            }
            Err(e) => {
                self.notifications.error(
                    format!("Error starting re-embedding process: {}", e),
                    None,
                );
                Err(e)
            }
        }
    }

    /// Create a model and append it to the loaded views.
    pub async fn create_model(&mut self, name: &str, description: &str) -> Result<Model> {
        let name = name.trim();
        if name.is_empty() {
            self.notifications.error("Model name is required", None);
            bail!("Model name is required");
        }
        let _busy = self.loading.scoped(DEFAULT_KEY, Some("Creating model..."));

        match self.api.create_model(name, description.trim()).await {
            Ok(model) => {
                info!(model_id = %model.id, name = %model.name, "model created");
                if self.models.insert(model.clone()) {
                    self.total += 1;
                }
                if self.filter.matches(&model) {
                    self.filtered.insert(model.clone());
                }
                self.notifications.success("Model created successfully", None);
                Ok(model)
            }
            Err(e) => {
                self.notifications.error(format!("Error creating model: {}", e), None);
                Err(e)
            }
        }
    }

    /// Delete a model, drop it from every view, and reload the current page
    /// if one is loaded. A page left empty by the delete steps back to the
    /// last page that still exists.
    pub async fn delete_model(&mut self, model_id: &str) -> Result<()> {
        {
            let _busy = self.loading.scoped(DEFAULT_KEY, Some("Deleting model..."));
            if let Err(e) = self.api.delete_model(model_id).await {
                self.notifications.error(format!("Error deleting model: {}", e), None);
                return Err(e);
            }
        }

        self.supervisor.stop_polling(model_id);
        if self.models.remove(model_id).is_some() {
            self.total = self.total.saturating_sub(1);
        }
        self.filtered.remove(model_id);
        self.detail.remove(model_id);
        self.notifications.success("Model deleted successfully", None);

        if let Some(limit) = self.limit {
            let mut page = self.page;
            if !is_valid_page(page, self.total, limit) {
                page = page_count(self.total, limit).max(1) as u32;
            }
            if let Err(e) = self.load_page(page, limit).await {
                warn!(model_id, error = %e, "reload after delete failed");
            }
        }
        Ok(())
    }

    /// Tear down: stop the channel and every poll task and drop pending
    /// toasts. Events already queued are discarded.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.supervisor.stop_all();
        self.notifications.clear_all();
        debug!("sync session shut down");
    }
}

fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
