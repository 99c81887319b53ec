//! LLM provider implementations.
//!
//! Contains the OpenAI-compatible implementation of the [`LlmProvider`]
//! trait defined in `parley-core`, and a factory ([`create_provider`]) that
//! builds it from the `[provider]` section of `config.toml`.

pub mod openai_compat;

use std::sync::Arc;

use secrecy::SecretString;

use parley_core::llm::provider::LlmProvider;
use parley_types::config::ProviderSettings;
use parley_types::llm::LlmError;

use self::openai_compat::OpenAiCompatibleProvider;

/// Read the API key from the environment variable named in `settings`.
///
/// A missing or empty variable is an authentication failure.
pub fn resolve_api_key(settings: &ProviderSettings) -> Result<SecretString, LlmError> {
    match std::env::var(&settings.api_key_env) {
        Ok(key) if !key.trim().is_empty() => Ok(SecretString::from(key)),
        _ => {
            tracing::warn!(env = %settings.api_key_env, "Provider API key not set");
            Err(LlmError::AuthenticationFailed)
        }
    }
}

/// Create a shared provider from the `[provider]` settings.
///
/// `default_model` is only used when a request arrives without a model name.
pub fn create_provider(
    settings: &ProviderSettings,
    api_key: SecretString,
    default_model: &str,
) -> Arc<dyn LlmProvider> {
    let config = openai_compat::config::from_settings(settings, api_key, default_model);
    Arc::new(OpenAiCompatibleProvider::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(env: &str) -> ProviderSettings {
        ProviderSettings {
            name: "custom-provider".to_string(),
            base_url: "https://custom.api.example.com/v1".to_string(),
            api_key_env: env.to_string(),
        }
    }

    #[test]
    fn test_create_provider_uses_settings_name() {
        let provider = create_provider(
            &settings("UNUSED"),
            SecretString::from("custom-key".to_string()),
            "custom-model",
        );
        assert_eq!(provider.name(), "custom-provider");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        let result = resolve_api_key(&settings("PARLEY_TEST_KEY_THAT_IS_NEVER_SET"));
        assert!(matches!(result, Err(LlmError::AuthenticationFailed)));
    }
}
