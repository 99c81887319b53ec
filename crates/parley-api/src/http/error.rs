//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use parley_core::chat::service::ConversationServiceError;
use parley_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Conversation lifecycle errors.
    Conversation(ConversationServiceError),
    /// Validation error.
    Validation(String),
    /// A required backend (e.g. the provider) is not configured.
    Unavailable(String),
}

impl From<ConversationServiceError> for AppError {
    fn from(e: ConversationServiceError) -> Self {
        AppError::Conversation(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Conversation(ConversationServiceError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "CONVERSATION_NOT_FOUND",
                format!("Conversation {id} not found"),
            ),
            AppError::Conversation(ConversationServiceError::Validation(e)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            AppError::Conversation(ConversationServiceError::Repository(
                RepositoryError::Conflict(msg),
            )) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Conversation(ConversationServiceError::Repository(
                RepositoryError::NotFound,
            )) => (
                StatusCode::NOT_FOUND,
                "CONVERSATION_NOT_FOUND",
                "Conversation not found".to_string(),
            ),
            AppError::Conversation(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", e.to_string())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
