//! Admin surface handlers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use murmur_common::{InboundEvent, ReplySink, Result};

use crate::state::AppState;

/// Buffers a reply so synchronous callers get it whole.
#[derive(Default)]
pub struct BufferedSink {
    chunks: tokio::sync::Mutex<Vec<String>>,
}

impl BufferedSink {
    pub async fn text(&self) -> String {
        self.chunks.lock().await.join("")
    }
}

#[async_trait]
impl ReplySink for BufferedSink {
    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        self.chunks.lock().await.push(chunk.to_string());
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.uptime_seconds(),
    }))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let orchestrator = state.orchestrator.stats().await;
    let offload = state.orchestrator.context_engine().offload_stats();
    let rate = state.pipeline.rate_limiter().snapshot(None);
    Json(json!({
        "orchestrator": orchestrator,
        "offload_cache": offload,
        "rate_limiter": rate,
        "background_tasks": state.tasks.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub approved: bool,
}

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub request_id: String,
    pub status: murmur_coordinator::ApprovalStatus,
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(body): Json<ApproveRequest>,
) -> std::result::Result<Json<ApproveResponse>, StatusCode> {
    let status = state
        .orchestrator
        .approve(&request_id, body.approved)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if status == murmur_coordinator::ApprovalStatus::NotFound {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(ApproveResponse { request_id, status }))
}

pub async fn memory_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
    let tiers = state
        .orchestrator
        .memory_stats(&user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "tiers": tiers })))
}

#[derive(Debug, Deserialize)]
pub struct InjectMessage {
    pub author_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub is_dm: bool,
    pub text: String,
}

/// Push a message through the full pipeline and return the buffered reply.
/// This is the admin/debug entry point, not the chat transport.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InjectMessage>,
) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
    let event = InboundEvent {
        author_id: body.author_id,
        channel_id: body.channel_id,
        is_dm: body.is_dm,
        text: body.text,
        is_bot: false,
    };

    let sink = BufferedSink::default();
    state
        .pipeline
        .handle(&event, &sink)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "reply": sink.text().await })))
}
