//! Global configuration loader for Parley.
//!
//! Reads `config.toml` from the data directory (`~/.parley/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to sensible defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use parley_types::config::GlobalConfig;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `PARLEY_DATA_DIR` environment variable
/// 2. `~/.parley`
/// 3. `./.parley`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PARLEY_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".parley");
    }

    PathBuf::from(".parley")
}

/// SQLite URL for the database inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("parley.db").display())
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.stream.channel_capacity, 16);
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(
            &config_path,
            r#"
[server]
host = "0.0.0.0"
port = 3000

[provider]
name = "local"
base_url = "http://localhost:11434/v1"
api_key_env = "LOCAL_API_KEY"

[defaults]
model = "llama3"
model_max_tokens = 8192
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.provider.name, "local");
        assert_eq!(config.provider.api_key_env, "LOCAL_API_KEY");
        assert_eq!(config.defaults.model, "llama3");
        assert_eq!(config.defaults.temperature, 0.7);
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(&config_path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.provider.name, "openai");
    }

    #[test]
    fn test_database_url() {
        let url = database_url(Path::new("/tmp/parley-data"));
        assert_eq!(url, "sqlite:///tmp/parley-data/parley.db?mode=rwc");
    }

    #[test]
    fn test_resolve_data_dir_from_env() {
        // SAFETY: This test is single-threaded and restores the env var immediately.
        unsafe {
            std::env::set_var("PARLEY_DATA_DIR", "/tmp/test-parley");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-parley"));
        unsafe {
            std::env::remove_var("PARLEY_DATA_DIR");
        }
    }
}
