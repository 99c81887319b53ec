use thiserror::Error;

/// Errors from validating a conversation or its configuration.
///
/// Raised before any provider call is made; never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("user_id is empty")]
    EmptyUserId,

    #[error("model name is empty")]
    EmptyModel,

    #[error("model max tokens must be greater than zero")]
    ZeroModelBudget,

    #[error("max output tokens must be greater than zero")]
    ZeroMaxOutputTokens,

    #[error("invalid temperature {0}: expected 0.0..=1.0")]
    Temperature(f32),

    #[error("invalid top_p {0}: expected 0.0..=1.0")]
    TopP(f32),

    #[error("invalid presence penalty {0}: expected -2.0..=2.0")]
    PresencePenalty(f32),

    #[error("invalid frequency penalty {0}: expected -2.0..=2.0")]
    FrequencyPenalty(f32),

    #[error("unsupported candidate count {0}: streaming supports n = 1 only")]
    UnsupportedCandidateCount(u32),

    #[error("system prompt uses {tokens} tokens but the model budget is {max}")]
    SystemPromptExceedsBudget { tokens: u32, max: u32 },

    #[error("a configuration is required to create a new conversation")]
    MissingConfig,

    #[error("invalid conversation status: '{0}'")]
    InvalidStatus(String),

    #[error("token usage {recorded} does not match active messages ({computed})")]
    UsageMismatch { recorded: u32, computed: u32 },
}

/// Errors from mutating a conversation aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("conversation has ended")]
    Ended,
}

/// Errors from repository operations (used by trait definitions in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::Temperature(1.5);
        assert_eq!(err.to_string(), "invalid temperature 1.5: expected 0.0..=1.0");
    }

    #[test]
    fn test_budget_error_display() {
        let err = ValidationError::SystemPromptExceedsBudget {
            tokens: 120,
            max: 100,
        };
        assert!(err.to_string().contains("120"));
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
