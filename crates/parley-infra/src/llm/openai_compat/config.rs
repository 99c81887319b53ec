//! Configuration for OpenAI-compatible providers.
//!
//! Any endpoint that speaks the OpenAI chat completions protocol can be used
//! by pointing [`OpenAiCompatConfig::base_url`] at it.

use secrecy::SecretString;

use parley_types::config::ProviderSettings;

/// Configuration for an OpenAI-compatible LLM provider.
///
/// Used to construct an [`super::OpenAiCompatibleProvider`].
pub struct OpenAiCompatConfig {
    /// Human-readable provider name (e.g., "openai").
    pub provider_name: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    pub base_url: String,
    /// API key for authentication.
    pub api_key: SecretString,
    /// Model used when a request does not name one.
    pub model: String,
}

/// OpenAI default configuration.
///
/// Base URL: `https://api.openai.com/v1`
pub fn openai_defaults(api_key: &str, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "openai".into(),
        base_url: "https://api.openai.com/v1".into(),
        api_key: SecretString::from(api_key.to_string()),
        model: model.into(),
    }
}

/// Configuration from the `[provider]` section of `config.toml`.
pub fn from_settings(
    settings: &ProviderSettings,
    api_key: SecretString,
    model: &str,
) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: settings.name.clone(),
        base_url: settings.base_url.clone(),
        api_key,
        model: model.into(),
    }
}
