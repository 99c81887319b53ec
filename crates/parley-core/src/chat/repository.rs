//! ConversationRepository trait definition.
//!
//! The store is the synchronization boundary between concurrent turns:
//! each turn loads a conversation, mutates it in memory, and saves it back.
//! Uses native async fn in traits (RPITIT, Rust 2024 edition).

use parley_types::chat::ConversationSummary;
use parley_types::error::RepositoryError;
use uuid::Uuid;

use super::conversation::Conversation;

/// Repository trait for conversation persistence.
///
/// Implementations live in parley-infra (e.g., `SqliteConversationRepository`).
pub trait ConversationRepository: Send + Sync {
    /// Look up a conversation. An unknown id is `Ok(None)`, not an error.
    fn find(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Persist a brand new conversation.
    ///
    /// Fails with `RepositoryError::Conflict` if the id is already taken.
    fn create(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist the current state of an existing conversation.
    ///
    /// Fails with `RepositoryError::Conflict` when the stored version differs
    /// from `conversation.version()` (another turn saved first). On success
    /// returns the new version.
    fn save(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// List a user's conversations, most recently updated first.
    fn list_by_user(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Vec<ConversationSummary>, RepositoryError>> + Send;
}
