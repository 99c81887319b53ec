//! Global configuration types for Parley.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! HTTP server, output stream sizing, the provider endpoint, and the default
//! configuration for newly created conversations.

use serde::{Deserialize, Serialize};

use crate::chat::ChatConfigInput;

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub provider: ProviderSettings,

    /// Used when a request must create a conversation but carries no config.
    #[serde(default)]
    pub defaults: ChatConfigInput,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSE keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_keep_alive_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Output stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the bounded channel between a completion turn and its consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    16
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    /// Channel capacity with a floor of 1 (a zero-capacity channel cannot be built).
    pub fn effective_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

/// Connection settings for the OpenAI-compatible provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Human-readable provider name used in logs and spans.
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}
