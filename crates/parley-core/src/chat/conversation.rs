//! The conversation aggregate.
//!
//! `Conversation` owns its message window, configuration, and lifecycle
//! status. All mutation goes through [`Conversation::append`] and
//! [`Conversation::end`]; stores exchange plain [`ConversationSnapshot`]s.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::chat::{
    ChatMessage, ConversationConfig, ConversationSnapshot, ConversationStatus, MessageRole,
};
use parley_types::error::{ConversationError, ValidationError};
use parley_types::llm::CompletionRequest;

use crate::llm::token_counter::TokenCounter;

use super::window::{ConversationWindow, new_message};

/// A token-budgeted conversation between one user and a model.
///
/// Not designed for concurrent mutation: each completion turn loads it,
/// mutates it, and saves it back through the repository.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: Uuid,
    user_id: String,
    status: ConversationStatus,
    window: ConversationWindow,
    config: ConversationConfig,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new active conversation with a generated identifier.
    pub fn new<C: TokenCounter + ?Sized>(
        user_id: impl Into<String>,
        system_prompt: impl Into<String>,
        config: ConversationConfig,
        counter: &C,
    ) -> Result<Self, ValidationError> {
        Self::with_id(Uuid::now_v7(), user_id, system_prompt, config, counter)
    }

    /// Create a new active conversation under a caller-chosen identifier.
    ///
    /// Validates the owner and configuration, and rejects a system prompt
    /// that alone exceeds the model budget.
    pub fn with_id<C: TokenCounter + ?Sized>(
        id: Uuid,
        user_id: impl Into<String>,
        system_prompt: impl Into<String>,
        config: ConversationConfig,
        counter: &C,
    ) -> Result<Self, ValidationError> {
        let user_id = user_id.into();
        validate_user_id(&user_id)?;
        config.validate()?;

        let system = new_message(counter, &config.model, MessageRole::System, system_prompt);
        if system.token_count() > config.model.max_tokens {
            return Err(ValidationError::SystemPromptExceedsBudget {
                tokens: system.token_count(),
                max: config.model.max_tokens,
            });
        }

        let now = Utc::now();
        Ok(Self {
            id,
            user_id,
            status: ConversationStatus::Active,
            window: ConversationWindow::new(config.model.max_tokens, system),
            config,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild a conversation from a stored snapshot.
    ///
    /// The recorded token usage must match the recomputed sum of the active
    /// messages; a mismatch means the stored data was tampered with or corrupted.
    pub fn restore(snapshot: ConversationSnapshot) -> Result<Self, ValidationError> {
        validate_user_id(&snapshot.user_id)?;
        snapshot.config.validate()?;

        let window = ConversationWindow::from_parts(
            snapshot.config.model.max_tokens,
            snapshot.system_message,
            snapshot.messages,
            snapshot.erased_messages,
        );
        if window.token_usage() != snapshot.token_usage {
            return Err(ValidationError::UsageMismatch {
                recorded: snapshot.token_usage,
                computed: window.token_usage(),
            });
        }

        Ok(Self {
            id: snapshot.id,
            user_id: snapshot.user_id,
            status: snapshot.status,
            window,
            config: snapshot.config,
            version: snapshot.version,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        })
    }

    /// Plain data copy for persistence and serialization.
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            status: self.status,
            system_message: self.window.pinned().clone(),
            messages: self.window.evictable().cloned().collect(),
            erased_messages: self.window.erased_messages().to_vec(),
            token_usage: self.window.token_usage(),
            config: self.config.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Append a message, evicting older ones to stay under the model budget.
    ///
    /// Fails without side effects once the conversation has ended.
    /// Returns the number of evicted messages.
    pub fn append(&mut self, message: ChatMessage) -> Result<usize, ConversationError> {
        if self.is_ended() {
            return Err(ConversationError::Ended);
        }
        let evicted = self.window.admit(message);
        self.updated_at = Utc::now();
        Ok(evicted)
    }

    /// Mark the conversation as ended. Idempotent.
    pub fn end(&mut self) {
        if !self.is_ended() {
            self.status = ConversationStatus::Ended;
            self.updated_at = Utc::now();
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status == ConversationStatus::Ended
    }

    /// Active messages in order, pinned system message first.
    pub fn active_messages(&self) -> impl Iterator<Item = &ChatMessage> + Clone + '_ {
        self.window.active_messages()
    }

    pub fn active_count(&self) -> usize {
        self.window.active_count()
    }

    pub fn erased_messages(&self) -> &[ChatMessage] {
        self.window.erased_messages()
    }

    /// Sum of the active messages' token counts.
    pub fn token_usage(&self) -> u32 {
        self.window.token_usage()
    }

    /// Streaming request for the current active window and configuration.
    pub fn build_request(&self) -> CompletionRequest {
        CompletionRequest {
            model: self.config.model.name.clone(),
            messages: self.active_messages().map(ChatMessage::to_llm_message).collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            n: self.config.n,
            stop_sequences: self.config.stop.clone(),
            presence_penalty: self.config.presence_penalty,
            frequency_penalty: self.config.frequency_penalty,
            stream: true,
        }
    }

    /// Record the version the store assigned on a successful save.
    pub fn record_saved(&mut self, version: u64) {
        self.version = version;
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.trim().is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::chat::ModelProfile;

    /// One token per byte keeps budgets easy to reason about.
    struct ByteCounter;

    impl TokenCounter for ByteCounter {
        fn count(&self, _model: &str, text: &str) -> u32 {
            text.len() as u32
        }
    }

    fn config(max_tokens: u32) -> ConversationConfig {
        ConversationConfig {
            model: ModelProfile::new("gpt-4o-mini", max_tokens),
            temperature: 0.3,
            top_p: 0.9,
            n: 1,
            stop: vec!["\n\n".to_string()],
            max_tokens: 64,
            presence_penalty: 0.5,
            frequency_penalty: -0.5,
        }
    }

    fn conversation(max_tokens: u32) -> Conversation {
        Conversation::new("user-1", "sys", config(max_tokens), &ByteCounter).unwrap()
    }

    fn user(content: &str) -> ChatMessage {
        new_message(&ByteCounter, &config(0).model, MessageRole::User, content)
    }

    #[test]
    fn test_new_conversation_starts_with_system_message() {
        let conv = conversation(100);
        assert_eq!(conv.status(), ConversationStatus::Active);
        assert_eq!(conv.active_count(), 1);
        assert_eq!(conv.token_usage(), 3);
        let first = conv.active_messages().next().unwrap();
        assert_eq!(first.role(), MessageRole::System);
        assert_eq!(first.content(), "sys");
    }

    #[test]
    fn test_new_rejects_empty_user() {
        let err = Conversation::new(" ", "sys", config(100), &ByteCounter).unwrap_err();
        assert_eq!(err, ValidationError::EmptyUserId);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut bad = config(100);
        bad.temperature = 3.0;
        let err = Conversation::new("user-1", "sys", bad, &ByteCounter).unwrap_err();
        assert_eq!(err, ValidationError::Temperature(3.0));
    }

    #[test]
    fn test_new_rejects_oversized_system_prompt() {
        let err = Conversation::new("user-1", "x".repeat(11), config(10), &ByteCounter).unwrap_err();
        assert_eq!(
            err,
            ValidationError::SystemPromptExceedsBudget { tokens: 11, max: 10 }
        );
    }

    #[test]
    fn test_append_after_end_fails_without_side_effects() {
        let mut conv = conversation(100);
        conv.append(user("hello")).unwrap();
        conv.end();
        let before = conv.snapshot();

        let err = conv.append(user("again")).unwrap_err();

        assert_eq!(err, ConversationError::Ended);
        assert_eq!(conv.snapshot(), before);
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut conv = conversation(100);
        conv.end();
        let first = conv.updated_at();
        conv.end();
        assert!(conv.is_ended());
        assert_eq!(conv.updated_at(), first);
    }

    #[test]
    fn test_append_evicts_oldest_but_keeps_system() {
        let mut conv = conversation(20);
        conv.append(user("aaaaaaaa")).unwrap(); // 3 + 8 = 11
        conv.append(user("bbbbbbbb")).unwrap(); // 19
        let evicted = conv.append(user("cccccccc")).unwrap();

        assert_eq!(evicted, 1);
        assert_eq!(conv.erased_messages()[0].content(), "aaaaaaaa");
        let active: Vec<_> = conv.active_messages().map(|m| m.content()).collect();
        assert_eq!(active, vec!["sys", "bbbbbbbb", "cccccccc"]);
        assert_eq!(conv.token_usage(), 19);
    }

    #[test]
    fn test_build_request_carries_window_and_config() {
        let mut conv = conversation(100);
        conv.append(user("hi")).unwrap();
        let request = conv.build_request();

        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert_eq!(request.messages[1].content, "hi");
        assert_eq!(request.max_tokens, 64);
        assert_eq!(request.top_p, 0.9);
        assert_eq!(request.stop_sequences, vec!["\n\n".to_string()]);
        assert_eq!(request.presence_penalty, 0.5);
        assert_eq!(request.frequency_penalty, -0.5);
        assert!(request.stream);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut conv = conversation(20);
        for text in ["aaaaaaaa", "bbbbbbbb", "cccccccc"] {
            conv.append(user(text)).unwrap();
        }
        conv.record_saved(4);

        let restored = Conversation::restore(conv.snapshot()).unwrap();

        assert_eq!(restored.snapshot(), conv.snapshot());
        assert_eq!(restored.version(), 4);
        assert_eq!(restored.erased_messages().len(), 1);
    }

    #[test]
    fn test_restore_rejects_usage_mismatch() {
        let mut snapshot = conversation(100).snapshot();
        snapshot.token_usage = 99;
        let err = Conversation::restore(snapshot).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UsageMismatch {
                recorded: 99,
                computed: 3
            }
        );
    }
}
