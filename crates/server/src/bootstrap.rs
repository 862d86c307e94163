use std::sync::Arc;
use std::time::Duration;

use perch_agent::fetch::MAX_DOCUMENT_CHARS;
use perch_agent::{
    install, Bot, BotError, BotSettings, ChatBot, ChromaIndex, FetchError, HttpDocumentFetcher, LlmError,
    ModelFactory, OllamaEmbedder, PluginDeps,
};
use perch_chat::{ConsoleTransport, EventRouter, ReconnectPolicy, TransportClient};
use perch_core::config::{AppConfig, ConfigError};
use perch_core::domain::entity::NewServer;
use perch_core::retrieval::{RetrievalAdapter, RetrievalError};
use perch_core::{EventLock, SerializedDispatcher};
use perch_db::{connect_with_settings, migrations, DbPool, Store};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub bot: ChatBot,
    pub client: Arc<TransportClient>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model setup failed: {0}")]
    Model(#[from] LlmError),
    #[error("retrieval setup failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("document fetcher setup failed: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Bot(#[from] BotError),
}

/// Connects storage, provisions the bot over a console transport and
/// installs the configured plugins. The bot is not started.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let store = Store::sql(db_pool.clone());
    let dispatcher = SerializedDispatcher::new(EventLock::new());
    let router = Arc::new(EventRouter::new(dispatcher.clone()));
    let transport = Arc::new(ConsoleTransport::stdio(&config.user.channel, &config.user.nick));
    let client = Arc::new(TransportClient::new(transport, router, ReconnectPolicy::default()));

    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let model = ModelFactory::create_all(&config.llm.models, timeout)?;
    let retrieval = RetrievalAdapter::new(
        Arc::new(OllamaEmbedder::new(&config.memory.embedding_url, &config.memory.embedding_model, timeout)?),
        Arc::new(ChromaIndex::new(&config.memory.vector_url, timeout)?),
    );
    let fetcher = HttpDocumentFetcher::new(timeout, MAX_DOCUMENT_CHARS)?;

    let mut bot = ChatBot::provision(
        BotSettings::from_config(&config),
        NewServer::new(&config.server.host, config.server.port, config.server.secure),
        store,
        client.clone(),
        dispatcher,
        model,
    )
    .await?;
    let deps = PluginDeps {
        memory: config.memory.clone(),
        retrieval: Arc::new(retrieval),
        fetcher: Arc::new(fetcher),
    };
    install(&mut bot, &config.plugins.enabled, &deps)?;
    info!(
        event_name = "system.bootstrap.plugins_installed",
        plugins = ?bot.plugin_names(),
        "plugins installed"
    );

    Ok(Application { config, db_pool, bot, client })
}

impl Application {
    /// Stops the bot (client, then a bounded queue drain) and closes the pool.
    pub async fn shutdown(self) {
        if let Err(error) = self.bot.stop().await {
            warn!(event_name = "system.shutdown.bot_stop_failed", error = %error, "bot did not stop cleanly");
        }
        self.db_pool.close().await;
        info!(event_name = "system.shutdown.complete", "shutdown complete");
    }
}
