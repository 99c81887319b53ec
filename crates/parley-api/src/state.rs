//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! Services are generic over the repository trait, but AppState pins them to
//! the SQLite implementation.

use std::path::PathBuf;
use std::sync::Arc;

use parley_core::chat::completion::ChatCompletionService;
use parley_core::chat::service::ConversationService;
use parley_core::llm::token_counter::{HeuristicTokenCounter, TokenCounter};
use parley_infra::config::{load_global_config, resolve_data_dir};
use parley_infra::llm::{create_provider, resolve_api_key};
use parley_infra::sqlite::conversation::SqliteConversationRepository;
use parley_infra::sqlite::pool::DatabasePool;
use parley_types::config::GlobalConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteCompletionService = ChatCompletionService<SqliteConversationRepository>;

pub type ConcreteConversationService = ConversationService<SqliteConversationRepository>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    /// `None` when the provider API key is not configured; lifecycle
    /// operations still work without it.
    pub completion_service: Option<Arc<ConcreteCompletionService>>,
    pub conversation_service: Arc<ConcreteConversationService>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let config = load_global_config(&data_dir).await;

        let db_pool = DatabasePool::open(&data_dir).await?;
        let counter: Arc<dyn TokenCounter> = Arc::new(HeuristicTokenCounter::new());

        let conversation_service = ConversationService::new(
            SqliteConversationRepository::new(db_pool.clone()),
            counter.clone(),
        );

        let completion_service = match resolve_api_key(&config.provider) {
            Ok(api_key) => {
                let provider = create_provider(&config.provider, api_key, &config.defaults.model);
                tracing::debug!(provider = provider.name(), "Provider configured");
                Some(Arc::new(ChatCompletionService::new(
                    SqliteConversationRepository::new(db_pool),
                    provider,
                    counter,
                )))
            }
            Err(_) => None,
        };

        Ok(Self {
            completion_service,
            conversation_service: Arc::new(conversation_service),
            config: Arc::new(config),
            data_dir,
        })
    }

    /// The completion service, or an error naming the missing key variable.
    pub fn completion(&self) -> anyhow::Result<Arc<ConcreteCompletionService>> {
        self.completion_service.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "provider API key not configured: set {}",
                self.config.provider.api_key_env
            )
        })
    }
}
