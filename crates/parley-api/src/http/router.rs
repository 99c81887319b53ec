//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Chat streaming
        .route("/chat/stream", post(handlers::chat::stream_chat))
        // Conversations
        .route("/chats", post(handlers::conversation::create_chat))
        .route("/chats/{id}", get(handlers::conversation::get_chat))
        .route("/chats/{id}/end", post(handlers::conversation::end_chat))
        .route(
            "/users/{user_id}/chats",
            get(handlers::conversation::list_chats),
        )
        .route("/health", get(health_check));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/v1/health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
