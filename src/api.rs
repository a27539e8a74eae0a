//! REST client for the model-management backend.
//!
//! Only the endpoints the synchronization subsystem consumes are wrapped
//! here. Each method is a single HTTP call; retry and scheduling belong to
//! the callers ([`PollingSupervisor`](crate::poller::PollingSupervisor)
//! retries on its next tick).
//!
//! Path segments are percent-encoded one by one, so model ids are never
//! parsed as path separators or query strings.
//!
//! # Endpoints
//!
//! | Method | Path | Returns |
//! |--------|------|---------|
//! | `GET`  | `/models?page&limit` | [`ModelPage`] |
//! | `GET`  | `/models/{id}` | [`Model`] |
//! | `POST` | `/models` | created [`Model`] |
//! | `DELETE` | `/models/{id}` | nothing |
//! | `GET`  | `/models/{id}/embedding-status` | [`EmbeddingStatusReport`] |
//! | `POST` | `/models/{id}/train` | acknowledgement JSON |
//! | `POST` | `/models/{id}/reembed` | acknowledgement JSON |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rag_admin_core::models::{EmbeddingStatusReport, Model, ModelPage};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ApiConfig;

/// Source of pull-based embedding status, consumed by the poller.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn embedding_status(&self, model_id: &str) -> Result<EmbeddingStatusReport>;
}

/// The model-management operations used by [`SyncSession`](crate::session::SyncSession).
#[async_trait]
pub trait ModelApi: StatusSource {
    async fn list_models(&self, page: u32, limit: u32) -> Result<ModelPage>;
    async fn get_model(&self, model_id: &str) -> Result<Model>;
    async fn create_model(&self, name: &str, description: &str) -> Result<Model>;
    async fn delete_model(&self, model_id: &str) -> Result<()>;
    async fn train_model(&self, model_id: &str) -> Result<Value>;
    async fn reembed_model(&self, model_id: &str) -> Result<Value>;
}

/// HTTP implementation of [`ModelApi`] backed by `reqwest`.
pub struct ApiClient {
    base: Url,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid api.base_url: {}", config.base_url))?;
        if base.cannot_be_a_base() {
            bail!("api.base_url cannot carry paths: {}", config.base_url);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            base,
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Base URL with `segments` appended, each percent-encoded on its own so
    /// an id containing `/` or `?` stays one path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url.path()))?;
        decode(url.path(), response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: Url, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url.path()))?;
        decode(url.path(), response).await
    }

    async fn delete(&self, url: Url) -> Result<()> {
        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", url.path()))?;
        check(url.path(), response).await?;
        Ok(())
    }
}

/// Pass a successful response through, or fail with the backend's message.
async fn check(path: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);
    bail!("{} returned {}: {}", path, status, message);
}

/// Turn a response into `T`, or an error carrying the backend's message.
async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
    check(path, response)
        .await?
        .json::<T>()
        .await
        .with_context(|| format!("Unexpected response body from {}", path))
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn embedding_status(&self, model_id: &str) -> Result<EmbeddingStatusReport> {
        self.get_json(self.endpoint(&["models", model_id, "embedding-status"])).await
    }
}

#[async_trait]
impl ModelApi for ApiClient {
    async fn list_models(&self, page: u32, limit: u32) -> Result<ModelPage> {
        let mut url = self.endpoint(&["models"]);
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    async fn get_model(&self, model_id: &str) -> Result<Model> {
        self.get_json(self.endpoint(&["models", model_id])).await
    }

    async fn create_model(&self, name: &str, description: &str) -> Result<Model> {
        let body = json!({ "name": name, "description": description });
        self.post_json(self.endpoint(&["models"]), &body).await
    }

    async fn delete_model(&self, model_id: &str) -> Result<()> {
        self.delete(self.endpoint(&["models", model_id])).await
    }

    async fn train_model(&self, model_id: &str) -> Result<Value> {
        self.post_json(self.endpoint(&["models", model_id, "train"]), &json!({})).await
    }

    async fn reembed_model(&self, model_id: &str) -> Result<Value> {
        self.post_json(self.endpoint(&["models", model_id, "reembed"]), &json!({})).await
    }
}
