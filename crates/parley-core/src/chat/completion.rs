//! Streaming chat completion use case.
//!
//! One call to [`ChatCompletionService::execute`] runs one conversation turn:
//!
//! 1. **Resolve** -- load the conversation, or create and persist it when the
//!    id is unknown.
//! 2. **Append** -- add the user message through the conversation window.
//! 3. **Generate** -- stream the reply from the provider, publishing the
//!    accumulated text to the output channel after every fragment.
//! 4. **Finalize** -- append the full reply as an assistant message.
//! 5. **Persist** -- save the conversation.
//!
//! Any failure stops the turn where it happened. A failed or cancelled
//! stream never leaves a partial assistant message behind: the reply is
//! committed whole or not at all.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use parley_observe::genai_attrs::{
    GEN_AI_CONVERSATION_ID, GEN_AI_OPERATION_NAME, GEN_AI_PROVIDER_NAME,
    GEN_AI_REQUEST_MAX_TOKENS, GEN_AI_REQUEST_MODEL, GEN_AI_REQUEST_TEMPERATURE,
    GEN_AI_RESPONSE_FINISH_REASONS, GEN_AI_USAGE_INPUT_TOKENS, GEN_AI_USAGE_OUTPUT_TOKENS,
    OP_CHAT,
};
use parley_types::chat::{ChatCompletionInput, ChatCompletionOutput, MessageRole};
use parley_types::error::{RepositoryError, ValidationError};
use parley_types::llm::{CompletionRequest, LlmError, StreamEvent};

use crate::llm::provider::LlmProvider;
use crate::llm::token_counter::TokenCounter;

use super::conversation::Conversation;
use super::repository::ConversationRepository;
use super::window::new_message;

/// Step of a completion turn, used to tell failures apart programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Append,
    Generate,
    Finalize,
    Persist,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Resolve => write!(f, "resolve"),
            Phase::Append => write!(f, "append"),
            Phase::Generate => write!(f, "generate"),
            Phase::Finalize => write!(f, "finalize"),
            Phase::Persist => write!(f, "persist"),
        }
    }
}

/// Why a completion turn failed.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("invalid request: {0}")]
    Validation(#[source] ValidationError),

    #[error("failed to look up conversation {chat_id}: {source}")]
    Lookup {
        chat_id: Uuid,
        #[source]
        source: RepositoryError,
    },

    #[error("failed to create conversation {chat_id}: {source}")]
    Create {
        chat_id: Uuid,
        #[source]
        source: RepositoryError,
    },

    #[error("conversation {chat_id} has ended")]
    Ended { phase: Phase, chat_id: Uuid },

    #[error("provider stream failed: {0}")]
    Stream(#[source] LlmError),

    #[error("output consumer disconnected")]
    OutputClosed,

    #[error("turn cancelled during {phase}")]
    Cancelled { phase: Phase },

    /// The reply was generated but could not be saved. The caller still
    /// receives it so it is not lost.
    #[error("reply generated but not saved: {source}")]
    Persistence {
        output: ChatCompletionOutput,
        #[source]
        source: RepositoryError,
    },
}

impl CompletionError {
    /// The step at which the turn stopped.
    pub fn phase(&self) -> Phase {
        match self {
            CompletionError::Validation(_)
            | CompletionError::Lookup { .. }
            | CompletionError::Create { .. } => Phase::Resolve,
            CompletionError::Ended { phase, .. } | CompletionError::Cancelled { phase } => *phase,
            CompletionError::Stream(_) | CompletionError::OutputClosed => Phase::Generate,
            CompletionError::Persistence { .. } => Phase::Persist,
        }
    }
}

/// Runs conversation turns against a repository and a streaming provider.
///
/// Generic over `ConversationRepository` so parley-core never depends on
/// parley-infra. Concurrent turns on different conversations are independent;
/// concurrent turns on the same conversation race at the store, which rejects
/// the loser's save with a version conflict.
pub struct ChatCompletionService<R: ConversationRepository> {
    repo: R,
    provider: Arc<dyn LlmProvider>,
    counter: Arc<dyn TokenCounter>,
}

impl<R: ConversationRepository> ChatCompletionService<R> {
    pub fn new(repo: R, provider: Arc<dyn LlmProvider>, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            repo,
            provider,
            counter,
        }
    }

    /// Access the conversation repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Run one turn, publishing every increment to `output`.
    ///
    /// Publication waits for channel capacity, so a slow consumer slows the
    /// provider read loop instead of growing a buffer. The last published
    /// record and the returned output carry identical content.
    ///
    /// `cancel` aborts the turn at its next suspension point. A turn
    /// cancelled before its final save persists no assistant message.
    pub async fn execute(
        &self,
        input: ChatCompletionInput,
        output: &mpsc::Sender<ChatCompletionOutput>,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionOutput, CompletionError> {
        if input.user_id.trim().is_empty() {
            return Err(CompletionError::Validation(ValidationError::EmptyUserId));
        }

        // Resolve
        let mut conversation = self.resolve(&input, cancel).await?;
        let chat_id = conversation.id();

        // Append
        let user_message = new_message(
            self.counter.as_ref(),
            &conversation.config().model,
            MessageRole::User,
            input.user_message,
        );
        let evicted = conversation
            .append(user_message)
            .map_err(|_| CompletionError::Ended {
                phase: Phase::Append,
                chat_id,
            })?;
        if evicted > 0 {
            debug!(chat_id = %chat_id, evicted, "Evicted messages to admit user message");
        }

        // Generate
        let request = conversation.build_request();
        let span = info_span!(
            "gen_ai.chat",
            { GEN_AI_OPERATION_NAME } = OP_CHAT,
            { GEN_AI_PROVIDER_NAME } = self.provider.name(),
            { GEN_AI_REQUEST_MODEL } = request.model.as_str(),
            { GEN_AI_REQUEST_MAX_TOKENS } = request.max_tokens,
            { GEN_AI_REQUEST_TEMPERATURE } = request.temperature,
            { GEN_AI_CONVERSATION_ID } = chat_id.to_string().as_str(),
        );
        let content = self
            .generate(request, chat_id, &input.user_id, output, cancel)
            .instrument(span)
            .await?;

        // Finalize
        let reply = new_message(
            self.counter.as_ref(),
            &conversation.config().model,
            MessageRole::Assistant,
            content.clone(),
        );
        let evicted = conversation
            .append(reply)
            .map_err(|_| CompletionError::Ended {
                phase: Phase::Finalize,
                chat_id,
            })?;
        if evicted > 0 {
            debug!(chat_id = %chat_id, evicted, "Evicted messages to admit assistant reply");
        }

        let result = ChatCompletionOutput {
            chat_id,
            user_id: input.user_id,
            content,
        };

        // Persist
        let version = cancellable(cancel, Phase::Persist, self.repo.save(&conversation))
            .await?
            .map_err(|source| {
                warn!(chat_id = %chat_id, error = %source, "Failed to save conversation");
                CompletionError::Persistence {
                    output: result.clone(),
                    source,
                }
            })?;
        conversation.record_saved(version);

        info!(
            chat_id = %chat_id,
            active = conversation.active_count(),
            erased = conversation.erased_messages().len(),
            token_usage = conversation.token_usage(),
            "Completion turn finished"
        );
        Ok(result)
    }

    /// Load the conversation, or build and persist a new one.
    async fn resolve(
        &self,
        input: &ChatCompletionInput,
        cancel: &CancellationToken,
    ) -> Result<Conversation, CompletionError> {
        let existing = match input.chat_id {
            Some(chat_id) => cancellable(cancel, Phase::Resolve, self.repo.find(&chat_id))
                .await?
                .map_err(|source| CompletionError::Lookup { chat_id, source })?,
            None => None,
        };
        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let chat_id = input.chat_id.unwrap_or_else(Uuid::now_v7);
        let (config, system_prompt) = input
            .config
            .clone()
            .ok_or(CompletionError::Validation(ValidationError::MissingConfig))?
            .into_parts();
        let conversation = Conversation::with_id(
            chat_id,
            input.user_id.clone(),
            system_prompt,
            config,
            self.counter.as_ref(),
        )
        .map_err(CompletionError::Validation)?;

        cancellable(cancel, Phase::Resolve, self.repo.create(&conversation))
            .await?
            .map_err(|source| CompletionError::Create { chat_id, source })?;

        info!(chat_id = %chat_id, user_id = %input.user_id, "Created conversation");
        Ok(conversation)
    }

    /// Drain the provider stream, publishing the accumulated reply after each fragment.
    async fn generate(
        &self,
        request: CompletionRequest,
        chat_id: Uuid,
        user_id: &str,
        output: &mpsc::Sender<ChatCompletionOutput>,
        cancel: &CancellationToken,
    ) -> Result<String, CompletionError> {
        let mut stream = self.provider.stream(request);
        let mut content = String::new();
        let mut fragments = 0usize;

        loop {
            let next = cancellable(cancel, Phase::Generate, stream.next()).await?;
            match next {
                None | Some(Ok(StreamEvent::Done)) => break,
                Some(Ok(StreamEvent::TextDelta { text })) => {
                    content.push_str(&text);
                    fragments += 1;
                    let record = ChatCompletionOutput {
                        chat_id,
                        user_id: user_id.to_string(),
                        content: content.clone(),
                    };
                    cancellable(cancel, Phase::Generate, output.send(record))
                        .await?
                        .map_err(|_| CompletionError::OutputClosed)?;
                }
                Some(Ok(StreamEvent::MessageDelta { stop_reason })) => {
                    debug!(
                        { GEN_AI_RESPONSE_FINISH_REASONS } = stop_reason.to_string().as_str(),
                        "Provider finished message"
                    );
                }
                Some(Ok(StreamEvent::Usage(usage))) => {
                    debug!(
                        { GEN_AI_USAGE_INPUT_TOKENS } = usage.input_tokens,
                        { GEN_AI_USAGE_OUTPUT_TOKENS } = usage.output_tokens,
                        "Provider usage"
                    );
                }
                Some(Ok(StreamEvent::Connected)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, fragments, "Provider stream failed, discarding partial reply");
                    return Err(CompletionError::Stream(e));
                }
            }
        }

        debug!(fragments, chars = content.len(), "Provider stream drained");
        Ok(content)
    }
}

/// Race `fut` against cancellation. Cancellation wins ties.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    phase: Phase,
    fut: F,
) -> Result<F::Output, CompletionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CompletionError::Cancelled { phase }),
        out = fut => Ok(out),
    }
}
