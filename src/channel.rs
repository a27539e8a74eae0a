//! Reconnecting push channel for model status updates.
//!
//! [`ReconnectingChannel`] owns one WebSocket connection to the backend's
//! status endpoint and re-exposes inbound `ModelUpdate` frames as a
//! [`StatusStream`] of [`StatusEvent`]s.
//!
//! # Lifecycle
//!
//! ```text
//!  connect() ──▶ [connecting] ──ok──▶ [open] ──close/error──┐
//!                     ▲    │                                │
//!                     │    └──err──┐                        │
//!                     │            ▼                        ▼
//!                     └─────── [backoff sleep] ◀────────────┘
//!
//!  disconnect() at any point ──▶ [stopped]
//! ```
//!
//! - A dropped connection is never a stream error; the task sleeps for the
//!   backoff delay and dials again, forever.
//! - [`disconnect`](ReconnectingChannel::disconnect) is the only way to stop
//!   retrying. It is idempotent.
//! - Malformed frames are logged at `warn` and dropped. One bad frame does
//!   not end the stream.
//! - Frames the server sends while the channel is reconnecting are lost.
//!   Callers that need exact state reload it over REST.
//! - Outbound messages are never carried across sockets. Anything still
//!   queued when a new socket opens is discarded before it goes live.
//!
//! # Backoff
//!
//! - `fixed`: every retry waits `min_delay`.
//! - `exponential`: `min_delay × 2^(n-1)` for the n-th consecutive failure,
//!   capped at `max_delay`, reset after a successful open.

use futures_util::{SinkExt, Stream, StreamExt};
use rag_admin_core::models::{ModelUpdate, StatusEvent};
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::task::CancelToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delay policy between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { min: Duration, max: Duration },
}

impl Backoff {
    pub fn from_config(config: &ChannelConfig) -> Self {
        let min = Duration::from_millis(config.min_delay_ms.max(1));
        let max = Duration::from_millis(config.max_delay_ms).max(min);
        match config.backoff.as_str() {
            "fixed" => Backoff::Fixed(min),
            _ => Backoff::Exponential { min, max },
        }
    }

    /// Delay before the `failures`-th consecutive retry (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { min, max } => {
                let exp = failures.saturating_sub(1).min(16);
                min.saturating_mul(1 << exp).min(max)
            }
        }
    }
}

/// Inbound status events from one [`ReconnectingChannel::connect`] call.
///
/// The stream yields `None` only after the channel is disconnected or
/// reconnected with a new stream; transient network failures never end it.
pub struct StatusStream {
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl StatusStream {
    pub async fn next_event(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    /// An already-delivered event, without waiting.
    pub fn try_next_event(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for StatusStream {
    type Item = StatusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct ActiveConnection {
    cancel: CancelToken,
    outgoing: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Long-lived WebSocket client that reconnects until told to stop.
pub struct ReconnectingChannel {
    url: String,
    backoff: Backoff,
    active: Mutex<Option<ActiveConnection>>,
}

impl ReconnectingChannel {
    pub fn new(url: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            url: url.into(),
            backoff,
            active: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start (or restart) the connection task and return its event stream.
    ///
    /// Must be called inside a tokio runtime. A previous connection, if any,
    /// is disconnected first and its stream ends.
    pub fn connect(&self) -> StatusStream {
        self.disconnect();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        let connected = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_connection(
            self.url.clone(),
            self.backoff,
            cancel.clone(),
            events_tx,
            outgoing_rx,
            connected.clone(),
        ));

        *self.lock_active() = Some(ActiveConnection {
            cancel,
            outgoing: outgoing_tx,
            connected,
            task,
        });

        StatusStream { rx: events_rx }
    }

    /// Stop retrying and release the connection. Safe to call repeatedly.
    pub fn disconnect(&self) {
        if let Some(active) = self.lock_active().take() {
            active.cancel.cancel();
            active.connected.store(false, Ordering::SeqCst);
            debug!(url = %self.url, "status channel disconnect requested");
        }
    }

    /// Whether a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.lock_active()
            .as_ref()
            .map(|a| a.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Best-effort send. Dropped silently while no socket is open.
    pub fn send<T: Serialize>(&self, message: &T) {
        let guard = self.lock_active();
        let Some(active) = guard.as_ref() else {
            debug!("status channel not started; dropping outbound message");
            return;
        };
        if !active.connected.load(Ordering::SeqCst) {
            debug!("status channel disconnected; dropping outbound message");
            return;
        }
        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = active.outgoing.send(text);
            }
            Err(e) => warn!(error = %e, "could not encode outbound message"),
        }
    }

    /// Disconnect and wait for the background task to finish.
    pub async fn join(&self) {
        let task = self.lock_active().take().map(|a| {
            a.cancel.cancel();
            a.task
        });
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveConnection>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Why a single open connection ended.
enum SessionEnd {
    Cancelled,
    ConsumerGone,
    Closed(String),
}

async fn run_connection(
    url: String,
    backoff: Backoff,
    cancel: CancelToken,
    events: mpsc::UnboundedSender<StatusEvent>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    let mut failures: u32 = 0;

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        match attempt {
            Ok((socket, _response)) => {
                failures = 0;
                let stale = discard_stale(&mut outgoing);
                if stale > 0 {
                    debug!(stale, "dropped outbound messages queued for the previous socket");
                }
                connected.store(true, Ordering::SeqCst);
                info!(url = %url, "status channel connected");

                let end = pump(socket, &cancel, &events, &mut outgoing).await;
                connected.store(false, Ordering::SeqCst);

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::ConsumerGone => {
                        debug!("status stream dropped by consumer; stopping channel");
                        break;
                    }
                    SessionEnd::Closed(reason) => {
                        info!(url = %url, reason = %reason, "status channel disconnected");
                    }
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "status channel connect failed");
            }
        }

        if events.is_closed() {
            break;
        }

        failures = failures.saturating_add(1);
        let delay = backoff.delay(failures);
        debug!(delay_ms = delay.as_millis() as u64, failures, "scheduling reconnect");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    connected.store(false, Ordering::SeqCst);
    debug!(url = %url, "status channel stopped");
}

/// Empty `outgoing` of anything queued before the current socket opened.
/// `send` only queues while connected, so leftovers belong to a socket that
/// has since closed.
fn discard_stale(outgoing: &mut mpsc::UnboundedReceiver<String>) -> usize {
    let mut dropped = 0;
    while outgoing.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

async fn pump(
    socket: Socket,
    cancel: &CancelToken,
    events: &mpsc::UnboundedSender<StatusEvent>,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            Some(text) = outgoing.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    return SessionEnd::Closed(e.to_string());
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !forward(&text, events) {
                        return SessionEnd::ConsumerGone;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        if !forward(text, events) {
                            return SessionEnd::ConsumerGone;
                        }
                    }
                    Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "closed by peer".to_string());
                    return SessionEnd::Closed(reason);
                }
                // Ping/pong replies are handled by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
                None => return SessionEnd::Closed("stream ended".to_string()),
            }
        }
    }
}

/// Decode one frame and hand it to the consumer. Returns `false` once the
/// consumer has gone away.
fn forward(text: &str, events: &mpsc::UnboundedSender<StatusEvent>) -> bool {
    match decode_frame(text) {
        Ok(event) => events.send(event).is_ok(),
        Err(e) => {
            warn!(error = %e, "dropping malformed status frame");
            true
        }
    }
}

/// Parse a `ModelUpdate` JSON frame into a push event.
pub fn decode_frame(text: &str) -> Result<StatusEvent, serde_json::Error> {
    serde_json::from_str::<ModelUpdate>(text).map(ModelUpdate::into_event)
}
