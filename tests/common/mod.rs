//! In-process mock of the model admin backend: the REST routes under
//! `/api` and the status WebSocket at `/ws`, served by axum on an
//! ephemeral port.
#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct MockBackend {
    pub models: Mutex<Vec<Value>>,
    pub embedding: Mutex<HashMap<String, Value>>,
    pub train_error: Mutex<Option<String>>,
    /// One entry per accepted socket: frames to send, then close. Once
    /// empty, sockets stay open and record what the client sends.
    pub ws_scripts: Mutex<VecDeque<Vec<String>>>,
    pub ws_received: Mutex<Vec<String>>,
    pub ws_connections: AtomicUsize,
}

impl MockBackend {
    pub fn with_models(models: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            models: Mutex::new(models),
            ..Default::default()
        })
    }

    pub fn script_socket(&self, frames: &[&str]) {
        self.ws_scripts
            .lock()
            .unwrap()
            .push_back(frames.iter().map(|f| f.to_string()).collect());
    }

    pub fn connections(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }
}

pub struct Served {
    pub addr: SocketAddr,
}

impl Served {
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

pub async fn serve(backend: Arc<MockBackend>) -> Served {
    let app = Router::new()
        .route("/api/models", get(list_models).post(create_model))
        .route("/api/models/{id}", get(get_model).delete(delete_model))
        .route("/api/models/{id}/embedding-status", get(embedding_status))
        .route("/api/models/{id}/train", post(train))
        .route("/api/models/{id}/reembed", post(reembed))
        .route("/ws", get(status_socket))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Served { addr }
}

/// Poll `check` every 10ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Model not found" })),
    )
}

async fn list_models(
    State(backend): State<Arc<MockBackend>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let models = backend.models.lock().unwrap().clone();
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let limit: usize = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(10);
    let slice: Vec<Value> = models
        .iter()
        .skip((page.max(1) - 1) * limit)
        .take(limit)
        .cloned()
        .collect();
    Json(json!({ "models": slice, "total": models.len() }))
}

async fn get_model(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    backend
        .models
        .lock()
        .unwrap()
        .iter()
        .find(|m| m["id"] == id.as_str())
        .cloned()
        .map(Json)
        .ok_or_else(not_found)
}

async fn create_model(
    State(backend): State<Arc<MockBackend>>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let name = body["name"].as_str().unwrap_or_default();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Model name is required" })),
        ));
    }
    let mut models = backend.models.lock().unwrap();
    let model = json!({
        "id": format!("m{}", models.len() + 1),
        "name": name,
        "description": body["description"],
        "status": "pending",
        "dateCreated": "2024-03-01T10:00:00Z",
        "files": [],
        "embeddingStatus": "pending",
        "embeddingProgress": 0
    });
    models.push(model.clone());
    Ok((StatusCode::CREATED, Json(model)))
}

async fn delete_model(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let mut models = backend.models.lock().unwrap();
    let before = models.len();
    models.retain(|m| m["id"] != id.as_str());
    if models.len() == before {
        return Err(not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn embedding_status(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    backend
        .embedding
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(not_found)
}

async fn train(
    State(backend): State<Arc<MockBackend>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match backend.train_error.lock().unwrap().clone() {
        Some(message) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": message })),
        )),
        None => Ok(Json(json!({ "message": format!("Training started for {}", id) }))),
    }
}

async fn reembed(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "message": format!("Re-embedding started for {}", id) }))
}

async fn status_socket(
    ws: WebSocketUpgrade,
    State(backend): State<Arc<MockBackend>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, backend))
}

async fn handle_socket(mut socket: WebSocket, backend: Arc<MockBackend>) {
    backend.ws_connections.fetch_add(1, Ordering::SeqCst);
    let script = backend.ws_scripts.lock().unwrap().pop_front();

    match script {
        Some(frames) => {
            for frame in frames {
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            let _ = socket.send(Message::Close(None)).await;
        }
        None => {
            while let Some(Ok(message)) = socket.recv().await {
                if let Message::Text(text) = message {
                    backend.ws_received.lock().unwrap().push(text.to_string());
                }
            }
        }
    }
}
