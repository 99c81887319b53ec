//! LlmProvider trait definition.
//!
//! This is the core abstraction that streaming model backends implement.
//! `stream` returns a boxed `Stream` so the trait stays object-safe and the
//! completion service can hold providers as `Arc<dyn LlmProvider>`.

use std::pin::Pin;

use futures_util::Stream;

use parley_types::llm::{CompletionRequest, LlmError, StreamEvent};

/// Boxed, ordered, finite stream of provider events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

/// Trait for LLM provider backends (OpenAI-compatible endpoints, test doubles).
///
/// Implementations live in parley-infra (e.g., `OpenAiCompatibleProvider`).
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a streaming completion request. Returns a stream of events.
    ///
    /// The stream is lazy: nothing is sent until it is first polled. It ends
    /// after `StreamEvent::Done` or after the first `Err` item.
    fn stream(&self, request: CompletionRequest) -> EventStream;
}
