//! # rag-admin
//!
//! Admin client for AI document-ingestion models, built around a model
//! status synchronization subsystem.
//!
//! A model's training and embedding status is reported by two independent
//! sources: a WebSocket push channel and an interval-polling fallback. Both
//! feed one event queue; a single [`session::SyncSession`] merges every event
//! into each view collection holding a copy of the model, and raises a
//! notification when a lifecycle reaches a terminal state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   push   ┌──────────────┐        ┌──────────────────┐
//! │  WebSocket   │────────▶│              │ merge  │ models           │
//! │  /ws         │          │ SyncSession  │──────▶│ filtered         │
//! └──────────────┘          │ (one queue)  │        │ detail           │
//! ┌──────────────┐   poll   │              │        └──────────────────┘
//! │  REST        │────────▶│              │──────▶ toasts / loading
//! │  /models/... │          └──────────────┘
//! └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag-admin models --status training      # list models
//! rag-admin status <model-id>             # one-shot embedding status
//! rag-admin watch                         # follow live status changes
//! rag-admin reembed <model-id> --watch    # restart embedding and follow it
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`api`] | REST client and the status-source trait |
//! | [`channel`] | Reconnecting WebSocket push channel |
//! | [`poller`] | Per-model embedding-status polling |
//! | [`loading`] | Keyed in-flight indicators |
//! | [`notify`] | Self-expiring notifications |
//! | [`session`] | Orchestration and collection ownership |
//! | [`task`] | Cooperative cancellation |
//!
//! Data types, view collections, and the merger live in `rag_admin_core`.

pub mod api;
pub mod channel;
pub mod config;
pub mod loading;
pub mod logging;
pub mod notify;
pub mod poller;
pub mod session;
pub mod task;

pub use rag_admin_core::{collection, merge, models};
