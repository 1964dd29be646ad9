//! Public API: HTTP surface over the Streaming Engine.
//!
//! `POST /v1/audio/speech` mirrors the OpenAI-shaped audio speech
//! contract; `GET /health`, `GET /status`, `GET /voices`, and
//! `GET /metrics` are introspection endpoints for operators.

pub mod handlers;
pub mod types;

use crate::service::TtsService;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Build the router for a wired [`TtsService`]. Shared state is the
/// `Arc<TtsService>` itself — every collaborator it owns is already
/// `Arc`-backed, so no extra wrapper struct is needed.
#[must_use]
pub fn router(state: Arc<TtsService>) -> Router {
    Router::new()
        .route("/v1/audio/speech", post(handlers::speech))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/voices", get(handlers::voices))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}
