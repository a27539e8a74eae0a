//! # rag-admin core
//!
//! Runtime-free logic for rag-admin: model data types, view collections,
//! and the status merger that reconciles push and poll events into those
//! collections.
//!
//! This crate contains no tokio, no HTTP client, and no WebSocket code. The
//! async components that produce [`models::StatusEvent`]s live in the
//! `rag-admin` crate.

pub mod collection;
pub mod merge;
pub mod models;
