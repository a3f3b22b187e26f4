//! HTTP Handlers

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use assistant_core::{
    AssistantError, ConversationView, Message, OpenPosition, Preferences, TurnOutcome,
    provider::TokenUsage, refresh::MarketSnapshot,
};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub llm_connected: bool,
    pub llm_provider: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    /// Text restored into the input, if anything was undone
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    /// Message appended by the confirmation, if any
    pub message: Option<Message>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreferencesUpdate {
    pub control_mode: Option<bool>,
    pub auto_refresh: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AiChatRequest {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct AiChatResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: &AssistantError) -> ApiError {
    let (status, code) = match err {
        AssistantError::EmptyQuery => (StatusCode::BAD_REQUEST, "EMPTY_QUERY"),
        AssistantError::Busy => (StatusCode::CONFLICT, "BUSY"),
        AssistantError::ProviderUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "LLM_UNAVAILABLE"),
        AssistantError::Provider(_) => (StatusCode::BAD_GATEWAY, "LLM_ERROR"),
        AssistantError::Broker(_) => (StatusCode::BAD_GATEWAY, "BROKER_ERROR"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Assistant conversation
        .route("/api/assistant", get(get_conversation))
        .route("/api/assistant/messages", post(submit_message))
        .route("/api/assistant/retry", post(retry_last))
        .route("/api/assistant/clear", post(clear_history))
        .route("/api/assistant/confirm", post(confirm_trade))
        .route("/api/preferences", get(get_preferences).put(update_preferences))
        // Stateless completion
        .route("/api/ai-chat", post(ai_chat))
        // Market & account
        .route("/api/market/snapshot", get(market_snapshot))
        .route("/api/positions", get(open_positions))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider = state.engine.invoker().provider();
    let llm_connected = provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        llm_connected,
        llm_provider: provider.name().to_string(),
    })
}

/// Current conversation, draft input, error and confirmation state
pub async fn get_conversation(State(state): State<AppState>) -> Json<ConversationView> {
    Json(state.engine.view().await)
}

/// Run one assistant turn
pub async fn submit_message(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    state
        .engine
        .submit(&payload.message)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!("Submit rejected: {}", e);
            api_error(&e)
        })
}

/// Undo the last exchange and restore its text
pub async fn retry_last(State(state): State<AppState>) -> Result<Json<RetryResponse>, ApiError> {
    let query = state
        .engine
        .retry_last_message()
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(RetryResponse { query }))
}

/// Start a new chat
pub async fn clear_history(State(state): State<AppState>) -> Result<Json<ConversationView>, ApiError> {
    state.engine.clear_history().await.map_err(|e| api_error(&e))?;
    Ok(Json(state.engine.view().await))
}

/// Confirm or reject the pending trade
pub async fn confirm_trade(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let message = state
        .engine
        .resolve_trade(payload.confirmed)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(ConfirmResponse { message }))
}

pub async fn get_preferences(State(state): State<AppState>) -> Json<Preferences> {
    Json(state.engine.preferences().await)
}

/// Toggle control mode and/or auto-refresh
pub async fn update_preferences(
    State(state): State<AppState>,
    Json(payload): Json<PreferencesUpdate>,
) -> Json<Preferences> {
    let mut preferences = state.engine.preferences().await;
    if let Some(control_mode) = payload.control_mode {
        preferences.control_mode = control_mode;
    }
    if let Some(auto_refresh) = payload.auto_refresh {
        preferences.auto_refresh = auto_refresh;
    }

    let preferences = state.engine.set_preferences(preferences).await;
    state.refresher.set_enabled(preferences.auto_refresh);
    tracing::info!(
        control_mode = preferences.control_mode,
        auto_refresh = preferences.auto_refresh,
        "Preferences updated"
    );
    Json(preferences)
}

/// Stateless completion with model fallback
pub async fn ai_chat(
    State(state): State<AppState>,
    Json(payload): Json<AiChatRequest>,
) -> Result<Json<AiChatResponse>, ApiError> {
    if payload.messages.is_empty() {
        return Err(api_error(&AssistantError::EmptyQuery));
    }

    let completion = state
        .engine
        .invoker()
        .invoke(&payload.messages)
        .await
        .map_err(|e| {
            tracing::error!("AI chat error: {}", e);
            api_error(&e)
        })?;

    Ok(Json(AiChatResponse {
        content: completion.content,
        model: completion.model,
        usage: completion.usage,
    }))
}

/// Latest background-refreshed prices
pub async fn market_snapshot(State(state): State<AppState>) -> Json<MarketSnapshot> {
    Json(state.refresher.snapshot().await)
}

pub async fn open_positions(State(state): State<AppState>) -> Result<Json<Vec<OpenPosition>>, ApiError> {
    state
        .broker
        .get_open_positions()
        .await
        .map(Json)
        .map_err(|e| api_error(&e))
}
