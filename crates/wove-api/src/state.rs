//! Application state shared by the CLI commands and the HTTP handlers.
//!
//! AppState pins the engine's ports to the concrete infra implementations:
//! the SQLite chat repository and, for the `/api/chat` proxy route, the
//! OpenAI-compatible upstream backend.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;
use wove_core::llm::BoxGenerationBackend;
use wove_infra::config::load_global_config;
use wove_infra::filesystem::{ensure_data_dir, resolve_data_dir};
use wove_infra::llm::api_key_from_env;
use wove_infra::llm::openai_compat::OpenAiCompatibleBackend;
use wove_infra::sqlite::chat::SqliteChatRepository;
use wove_infra::sqlite::pool::{DatabasePool, database_url};
use wove_types::chat::OwnerId;
use wove_types::config::GlobalConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: Arc<GlobalConfig>,
    pub db_pool: DatabasePool,
    pub chat_repo: Arc<SqliteChatRepository>,
    /// Owner used by the CLI; HTTP requests carry their own.
    pub owner: OwnerId,
    /// Upstream for the generation proxy route. `None` when no API key is
    /// configured.
    pub upstream: Option<Arc<BoxGenerationBackend>>,
}

impl AppState {
    /// Resolve the data directory, load config, and open the database.
    ///
    /// `owner` overrides `[chat].owner_id` from the config file.
    pub async fn init(owner: Option<String>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        ensure_data_dir(&data_dir).await?;

        let mut config = load_global_config(&data_dir).await;
        if let Some(owner) = owner {
            config.chat.owner_id = owner;
        }

        Self::open(data_dir, config).await
    }

    /// Open the database in `data_dir` with an already loaded config.
    pub async fn open(data_dir: PathBuf, config: GlobalConfig) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let chat_repo = Arc::new(SqliteChatRepository::new(db_pool.clone()));
        let owner = OwnerId::new(config.chat.owner_id.clone());

        Ok(Self {
            data_dir,
            config: Arc::new(config),
            db_pool,
            chat_repo,
            owner,
            upstream: None,
        })
    }

    /// Build the upstream backend for the proxy route from `[generation]`.
    ///
    /// A missing API key is not fatal: the server still serves the session
    /// API and the proxy route answers with an error.
    pub fn with_default_upstream(mut self) -> Self {
        let generation = &self.config.generation;
        match api_key_from_env(generation) {
            Ok(key) => {
                let backend = OpenAiCompatibleBackend::from_config(generation, key);
                self.upstream = Some(Arc::new(BoxGenerationBackend::new(backend)));
            }
            Err(_) => {
                warn!(
                    variable = %generation.api_key_env,
                    "No API key set, /api/chat is disabled"
                );
            }
        }
        self
    }

    pub fn with_upstream(mut self, upstream: BoxGenerationBackend) -> Self {
        self.upstream = Some(Arc::new(upstream));
        self
    }
}
