//! Boundary surface for Murmur.
//!
//! This crate owns everything that faces the outside world:
//!
//! - the **message pipeline** the chat-platform adapter drives through
//!   [`MessagePipeline::handle`], with rate limiting, command short-circuits,
//!   per-request deadlines, and structured metrics;
//! - the **admin surface**: `GET /health`, `GET /stats`,
//!   `POST /approve/{id}`, `GET /memory/{user_id}/stats`, and a
//!   `POST /messages` debug entry point that runs the full pipeline;
//! - the **composition root** ([`AppState`]) that builds and tears down every
//!   singleton exactly once.

pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use pipeline::{CommandHandler, MessagePipeline, PipelineMetrics};
pub use rate_limit::{RateLimiter, RateLimiterSnapshot};
pub use routes::BufferedSink;
pub use state::AppState;

/// Build the admin router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats))
        .route("/approve/{id}", post(routes::approve))
        .route("/memory/{user_id}/stats", get(routes::memory_stats))
        .route("/messages", post(routes::send_message))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the admin surface until the listener fails or the task is aborted.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> murmur_common::Result<()> {
    let router = create_router(state);
    info!(%addr, "Starting admin surface");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
