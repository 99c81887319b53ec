//! SSE streaming chat endpoint.
//!
//! POST /api/v1/chat/stream
//!
//! Runs one conversation turn in a spawned task that publishes into a bounded
//! channel; this handler relays the channel as Server-Sent Events. Dropping
//! the response (client disconnect) cancels the turn.
//!
//! SSE event types:
//! - `chunk` - accumulated reply so far: `{ "chat_id", "user_id", "content" }`
//! - `done` - the final output, same shape as `chunk`
//! - `error` - turn failed: `{ "phase": "...", "message": "..." }`

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use parley_core::chat::completion::CompletionError;
use parley_types::chat::{ChatCompletionInput, ChatCompletionOutput};

use crate::http::error::AppError;
use crate::state::AppState;

fn output_event(name: &'static str, output: &ChatCompletionOutput) -> Event {
    let data = serde_json::to_string(output).unwrap_or_default();
    Event::default().event(name).data(data)
}

fn error_event(error: &CompletionError) -> Event {
    let data = json!({
        "phase": error.phase().to_string(),
        "message": error.to_string(),
    });
    Event::default().event("error").data(data.to_string())
}

/// POST /api/v1/chat/stream - SSE streaming chat turn.
///
/// A request without `config` that needs a new conversation gets the
/// server's `[defaults]` configuration.
pub async fn stream_chat(
    State(state): State<AppState>,
    Json(mut input): Json<ChatCompletionInput>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let service = state
        .completion()
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    if input.config.is_none() {
        input.config = Some(state.config.defaults.clone());
    }

    let (tx, mut rx) = mpsc::channel(state.config.stream.effective_capacity());
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let task = tokio::spawn(async move { service.execute(input, &tx, &cancel).await });

    let sse_stream = async_stream::stream! {
        // Lives as long as the response; dropped on disconnect.
        let _guard = guard;

        while let Some(record) = rx.recv().await {
            yield Ok::<_, Infallible>(output_event("chunk", &record));
        }

        match task.await {
            Ok(Ok(output)) => {
                yield Ok(output_event("done", &output));
            }
            Ok(Err(e)) => {
                tracing::warn!(phase = %e.phase(), "Chat turn failed: {e}");
                yield Ok(error_event(&e));
            }
            Err(e) => {
                tracing::error!("Chat turn task failed: {e}");
                let data = json!({ "phase": null, "message": "internal error" });
                yield Ok(Event::default().event("error").data(data.to_string()));
            }
        }
    };

    let keep_alive_secs = state.config.server.keep_alive_secs.max(1);
    let keep_alive = KeepAlive::new().interval(Duration::from_secs(keep_alive_secs));
    Ok(Sse::new(sse_stream).keep_alive(keep_alive))
}
