//! Explicit conversation lifecycle operations.
//!
//! ConversationService covers what a completion turn does not: creating a
//! conversation up front, reading it back, ending it, and listing a user's
//! conversations.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::chat::{ChatConfigInput, ConversationSummary};
use parley_types::error::{RepositoryError, ValidationError};

use crate::llm::token_counter::TokenCounter;

use super::conversation::Conversation;
use super::repository::ConversationRepository;

/// Errors from conversation lifecycle operations.
#[derive(Debug, Error)]
pub enum ConversationServiceError {
    #[error("invalid conversation: {0}")]
    Validation(#[from] ValidationError),

    #[error("conversation not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Orchestrates conversation creation, lookup, and termination.
///
/// Generic over `ConversationRepository` so parley-core never depends on
/// parley-infra.
pub struct ConversationService<R: ConversationRepository> {
    repo: R,
    counter: Arc<dyn TokenCounter>,
}

impl<R: ConversationRepository> ConversationService<R> {
    pub fn new(repo: R, counter: Arc<dyn TokenCounter>) -> Self {
        Self { repo, counter }
    }

    /// Access the conversation repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Create and persist a new conversation for `user_id`.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        config: ChatConfigInput,
    ) -> Result<Conversation, ConversationServiceError> {
        let (config, system_prompt) = config.into_parts();
        let conversation =
            Conversation::new(user_id, system_prompt, config, self.counter.as_ref())?;
        self.repo.create(&conversation).await?;
        info!(chat_id = %conversation.id(), user_id = %user_id, "Created conversation");
        Ok(conversation)
    }

    /// Get a conversation by ID.
    pub async fn get_conversation(
        &self,
        id: &Uuid,
    ) -> Result<Option<Conversation>, ConversationServiceError> {
        Ok(self.repo.find(id).await?)
    }

    /// End a conversation. Ending an already ended conversation is a no-op
    /// and does not touch the store.
    pub async fn end_conversation(
        &self,
        id: &Uuid,
    ) -> Result<Conversation, ConversationServiceError> {
        let Some(mut conversation) = self.repo.find(id).await? else {
            warn!(chat_id = %id, "Attempted to end non-existent conversation");
            return Err(ConversationServiceError::NotFound(*id));
        };
        if conversation.is_ended() {
            return Ok(conversation);
        }

        conversation.end();
        let version = self.repo.save(&conversation).await?;
        conversation.record_saved(version);
        info!(chat_id = %id, "Conversation ended");
        Ok(conversation)
    }

    /// List a user's conversations, most recently updated first.
    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ConversationSummary>, ConversationServiceError> {
        Ok(self.repo.list_by_user(user_id, limit).await?)
    }
}
