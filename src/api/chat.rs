//! Chat assistant endpoints and the unauthenticated service-status surface.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::assistant::chatbot::{ChatMessage, ChatReply};
use crate::AppState;

use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    pub user_id: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub reply: ChatReply,
    pub user_id: String,
    pub role: String,
    pub status: &'static str,
}

/// Main chat endpoint.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::validation_field("message", "Message is required"));
    }

    let reply = state
        .assistant
        .chat(message, &request.conversation_history)
        .await;

    Ok(Json(ChatResponse {
        reply,
        user_id: request.user_id.unwrap_or_else(|| "anonymous".to_string()),
        role: request.role.unwrap_or_else(|| "student".to_string()),
        status: "success",
    }))
}

/// Health check endpoint.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API status endpoint.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();

    Json(json!({
        "status": "operational",
        "api_configured": state.config.assistant.api_url.is_some(),
        "uptime_seconds": uptime_seconds,
        "timestamp": Utc::now().to_rfc3339(),
        "endpoints": {
            "chat": "/api/chat",
            "health": "/health",
            "status": "/api/status",
            "config": "/api/config",
        },
    }))
}

/// Non-sensitive assistant configuration echo.
pub async fn config(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "model": state.config.assistant.model,
        "max_message_length": state.config.assistant.max_message_length,
        "api_enabled": state.config.assistant.api_url.is_some(),
    }))
}
