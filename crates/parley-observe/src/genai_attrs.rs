//! OpenTelemetry GenAI Semantic Convention attribute constants.
//!
//! These follow the OTel GenAI Semantic Conventions for consistent LLM call
//! instrumentation. Use them as constant field names in tracing macros:
//! `info_span!("gen_ai.chat", { GEN_AI_REQUEST_MODEL } = model)`.

// --- Required attributes ---

/// The name of the operation being performed (e.g., "chat").
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// The name of the GenAI provider (e.g., "openai").
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";

// --- Recommended attributes ---

/// The model ID requested (e.g., "gpt-4o-mini").
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

/// The sampling temperature for the request.
pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";

/// The maximum number of output tokens requested.
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// The number of input tokens consumed.
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

/// The number of output tokens generated.
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

/// The finish reason reported by the provider.
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

/// The conversation the call belongs to.
pub const GEN_AI_CONVERSATION_ID: &str = "gen_ai.conversation.id";

// --- Operation name values ---

/// Standard chat completion operation.
pub const OP_CHAT: &str = "chat";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_names_are_namespaced() {
        for name in [
            GEN_AI_OPERATION_NAME,
            GEN_AI_PROVIDER_NAME,
            GEN_AI_REQUEST_MODEL,
            GEN_AI_REQUEST_TEMPERATURE,
            GEN_AI_REQUEST_MAX_TOKENS,
            GEN_AI_USAGE_INPUT_TOKENS,
            GEN_AI_USAGE_OUTPUT_TOKENS,
            GEN_AI_RESPONSE_FINISH_REASONS,
            GEN_AI_CONVERSATION_ID,
        ] {
            assert!(name.starts_with("gen_ai."), "{name}");
        }
    }
}
