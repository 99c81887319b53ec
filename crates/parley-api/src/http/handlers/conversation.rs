//! Conversation lifecycle HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/chats                  - Create a conversation
//! - GET  /api/v1/chats/{id}             - Get a conversation
//! - POST /api/v1/chats/{id}/end         - End a conversation
//! - GET  /api/v1/users/{user_id}/chats  - List a user's conversations

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use parley_core::chat::service::ConversationServiceError;
use parley_types::chat::{ChatConfigInput, ConversationSnapshot, ConversationSummary};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for explicit conversation creation.
#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub user_id: String,
    /// Falls back to the server's `[defaults]` when absent.
    #[serde(default)]
    pub config: Option<ChatConfigInput>,
}

/// Query parameters for conversation listing.
#[derive(Debug, Deserialize)]
pub struct ChatListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}

fn chat_link(id: Uuid) -> String {
    format!("/api/v1/chats/{id}")
}

/// POST /api/v1/chats - Create a conversation.
pub async fn create_chat(
    State(state): State<AppState>,
    Json(body): Json<CreateChatRequest>,
) -> Result<Json<ApiResponse<ConversationSnapshot>>, AppError> {
    let start = Instant::now();

    let config = body
        .config
        .unwrap_or_else(|| state.config.defaults.clone());
    let conversation = state
        .conversation_service
        .create_conversation(&body.user_id, config)
        .await?;

    let resp = ApiResponse::success(conversation.snapshot(), start)
        .with_link("self", &chat_link(conversation.id()))
        .with_link("stream", "/api/v1/chat/stream");

    Ok(Json(resp))
}

/// GET /api/v1/chats/{id} - Get a conversation with its full history.
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ApiResponse<ConversationSnapshot>>, AppError> {
    let start = Instant::now();
    let id = parse_uuid(&chat_id)?;

    let conversation = state
        .conversation_service
        .get_conversation(&id)
        .await?
        .ok_or(ConversationServiceError::NotFound(id))?;

    let resp = ApiResponse::success(conversation.snapshot(), start)
        .with_link("self", &chat_link(id))
        .with_link("end", &format!("{}/end", chat_link(id)));

    Ok(Json(resp))
}

/// POST /api/v1/chats/{id}/end - End a conversation (idempotent).
pub async fn end_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ApiResponse<ConversationSnapshot>>, AppError> {
    let start = Instant::now();
    let id = parse_uuid(&chat_id)?;

    let conversation = state.conversation_service.end_conversation(&id).await?;

    let resp =
        ApiResponse::success(conversation.snapshot(), start).with_link("self", &chat_link(id));

    Ok(Json(resp))
}

/// GET /api/v1/users/{user_id}/chats - List a user's conversations.
pub async fn list_chats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<ApiResponse<Vec<ConversationSummary>>>, AppError> {
    let start = Instant::now();

    let chats = state
        .conversation_service
        .list_conversations(&user_id, Some(query.limit))
        .await?;

    let resp = ApiResponse::success(chats, start)
        .with_link("self", &format!("/api/v1/users/{user_id}/chats"));

    Ok(Json(resp))
}
