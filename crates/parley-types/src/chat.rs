//! Conversation, message, and chat completion types for Parley.
//!
//! These types model a token-budgeted conversation between a user and a
//! remote model: immutable messages, the model profile and sampling
//! configuration, the persisted snapshot of a conversation, and the DTOs
//! exchanged with the chat completion use case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

// Re-export MessageRole from llm module (it's used in both chat and llm contexts).
pub use crate::llm::MessageRole;

/// Lifecycle status of a conversation.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('active', 'ended'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Ended,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Ended => write!(f, "ended"),
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ConversationStatus::Active),
            "ended" => Ok(ConversationStatus::Ended),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

/// A single message within a conversation.
///
/// The token count is computed once when the message is created and can
/// never change afterwards: there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    id: Uuid,
    role: MessageRole,
    content: String,
    token_count: u32,
    created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new message with a freshly computed token count.
    pub fn new(role: MessageRole, content: impl Into<String>, token_count: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            token_count,
            created_at: Utc::now(),
        }
    }

    /// Rebuild a message from stored parts.
    pub fn from_parts(
        id: Uuid,
        role: MessageRole,
        content: String,
        token_count: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            role,
            content,
            token_count,
            created_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn token_count(&self) -> u32 {
        self.token_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The provider-facing view of this message.
    pub fn to_llm_message(&self) -> crate::llm::Message {
        crate::llm::Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A model identifier and its context window ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    pub max_tokens: u32,
}

impl ModelProfile {
    pub fn new(name: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            name: name.into(),
            max_tokens,
        }
    }
}

/// Sampling and budget configuration, fixed for the lifetime of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub model: ModelProfile,
    /// 0.0 to 1.0
    pub temperature: f32,
    /// Nucleus sampling threshold, 0.0 to 1.0.
    pub top_p: f32,
    /// Number of candidate completions. Only 1 is supported.
    pub n: u32,
    pub stop: Vec<String>,
    /// Maximum number of tokens to generate per reply.
    pub max_tokens: u32,
    /// -2.0 to 2.0
    pub presence_penalty: f32,
    /// -2.0 to 2.0
    pub frequency_penalty: f32,
}

impl ConversationConfig {
    /// Check every field against its allowed range.
    ///
    /// NaN values fail the range checks and are rejected.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model.name.trim().is_empty() {
            return Err(ValidationError::EmptyModel);
        }
        if self.model.max_tokens == 0 {
            return Err(ValidationError::ZeroModelBudget);
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ValidationError::Temperature(self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ValidationError::TopP(self.top_p));
        }
        if self.n != 1 {
            return Err(ValidationError::UnsupportedCandidateCount(self.n));
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::ZeroMaxOutputTokens);
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(ValidationError::PresencePenalty(self.presence_penalty));
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(ValidationError::FrequencyPenalty(self.frequency_penalty));
        }
        Ok(())
    }
}

/// Flat wire form of a new conversation's configuration.
///
/// Accepted by the HTTP surface and used for the `[defaults]` section of
/// `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfigInput {
    pub model: String,
    pub model_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub initial_system_msg: String,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    1.0
}

fn default_n() -> u32 {
    1
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for ChatConfigInput {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            model_max_tokens: 128_000,
            temperature: default_temperature(),
            top_p: default_top_p(),
            n: default_n(),
            stop: Vec::new(),
            max_tokens: default_max_tokens(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            initial_system_msg: "You are a helpful assistant.".to_string(),
        }
    }
}

impl ChatConfigInput {
    /// Split into the conversation configuration and the initial system prompt.
    pub fn into_parts(self) -> (ConversationConfig, String) {
        let config = ConversationConfig {
            model: ModelProfile::new(self.model, self.model_max_tokens),
            temperature: self.temperature,
            top_p: self.top_p,
            n: self.n,
            stop: self.stop,
            max_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
        };
        (config, self.initial_system_msg)
    }
}

/// Plain data form of a conversation, used for persistence and JSON output.
///
/// The `Conversation` aggregate in parley-core is the only place that mutates
/// this data; stores hand snapshots back to `Conversation::restore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: Uuid,
    pub user_id: String,
    pub status: ConversationStatus,
    /// Pinned system message, always first in the active window.
    pub system_message: ChatMessage,
    /// Evictable active messages, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Messages evicted for budget reasons, in eviction order.
    pub erased_messages: Vec<ChatMessage>,
    pub token_usage: u32,
    pub config: ConversationConfig,
    /// Optimistic concurrency counter, bumped by the store on every save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lightweight listing row for a user's conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub user_id: String,
    pub status: ConversationStatus,
    pub model: String,
    pub token_usage: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input of one conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionInput {
    /// Existing conversation to continue; unknown or absent creates one.
    #[serde(default)]
    pub chat_id: Option<Uuid>,
    pub user_id: String,
    pub user_message: String,
    /// Only consulted when a new conversation has to be created.
    #[serde(default)]
    pub config: Option<ChatConfigInput>,
}

/// One published increment, and the shape of the final result.
///
/// `content` is always the accumulated reply so far, never a lone fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionOutput {
    pub chat_id: Uuid,
    pub user_id: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ConversationConfig {
        ChatConfigInput::default().into_parts().0
    }

    #[test]
    fn test_conversation_status_roundtrip() {
        for status in [ConversationStatus::Active, ConversationStatus::Ended] {
            let parsed: ConversationStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_conversation_status_rejects_unknown() {
        let err = "paused".parse::<ConversationStatus>().unwrap_err();
        assert_eq!(err, ValidationError::InvalidStatus("paused".to_string()));
    }

    #[test]
    fn test_message_role_reexport() {
        let role = MessageRole::User;
        assert_eq!(role.to_string(), "user");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_temperature_range() {
        let mut config = valid_config();
        config.temperature = 1.1;
        assert_eq!(config.validate(), Err(ValidationError::Temperature(1.1)));

        config.temperature = f32::NAN;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Temperature(_))
        ));
    }

    #[test]
    fn test_validate_top_p_and_penalties() {
        let mut config = valid_config();
        config.top_p = -0.1;
        assert_eq!(config.validate(), Err(ValidationError::TopP(-0.1)));

        let mut config = valid_config();
        config.presence_penalty = 2.5;
        assert_eq!(config.validate(), Err(ValidationError::PresencePenalty(2.5)));

        let mut config = valid_config();
        config.frequency_penalty = -2.0;
        assert!(config.validate().is_ok());
        config.frequency_penalty = -2.01;
        assert_eq!(
            config.validate(),
            Err(ValidationError::FrequencyPenalty(-2.01))
        );
    }

    #[test]
    fn test_validate_rejects_multiple_candidates() {
        let mut config = valid_config();
        config.n = 2;
        assert_eq!(
            config.validate(),
            Err(ValidationError::UnsupportedCandidateCount(2))
        );
    }

    #[test]
    fn test_validate_model_profile() {
        let mut config = valid_config();
        config.model.max_tokens = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroModelBudget));

        let mut config = valid_config();
        config.model.name = "  ".to_string();
        assert_eq!(config.validate(), Err(ValidationError::EmptyModel));
    }

    #[test]
    fn test_config_input_defaults_from_json() {
        let json = r#"{"model":"gpt-4o","model_max_tokens":4096,"initial_system_msg":"Be brief."}"#;
        let input: ChatConfigInput = serde_json::from_str(json).unwrap();
        let (config, system) = input.into_parts();
        assert_eq!(config.model, ModelProfile::new("gpt-4o", 4096));
        assert_eq!(config.n, 1);
        assert_eq!(config.top_p, 1.0);
        assert!(config.stop.is_empty());
        assert_eq!(system, "Be brief.");
    }

    #[test]
    fn test_completion_input_without_chat_id() {
        let json = r#"{"user_id":"u-1","user_message":"hi"}"#;
        let input: ChatCompletionInput = serde_json::from_str(json).unwrap();
        assert!(input.chat_id.is_none());
        assert!(input.config.is_none());
    }

    #[test]
    fn test_chat_message_serde_keeps_token_count() {
        let msg = ChatMessage::new(MessageRole::User, "hello", 7);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.token_count(), 7);
        assert_eq!(parsed, msg);
    }
}
