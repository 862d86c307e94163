pub mod config;
pub mod import_log;
pub mod index;
pub mod migrate;
pub mod query;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use perch_agent::{ChromaIndex, OllamaEmbedder};
use perch_core::config::{AppConfig, LoadOptions};
use perch_core::retrieval::RetrievalAdapter;
use perch_db::{connect_with_settings, migrations, DbPool, Store};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// A failure class, its message and the process exit code it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandError {
    pub fn config(error: impl std::fmt::Display) -> Self {
        Self::new("config_validation", format!("configuration issue: {error}"), 2)
    }

    pub fn runtime(error: impl std::fmt::Display) -> Self {
        Self::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
    }

    pub fn database(error: impl std::fmt::Display) -> Self {
        Self::new("db_connectivity", error.to_string(), 4)
    }

    pub fn migration(error: impl std::fmt::Display) -> Self {
        Self::new("migration", error.to_string(), 5)
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new("invalid_input", message, 6)
    }

    pub fn retrieval(error: impl std::fmt::Display) -> Self {
        Self::new("retrieval", error.to_string(), 7)
    }

    pub fn persistence(error: impl std::fmt::Display) -> Self {
        Self::new("persistence", error.to_string(), 8)
    }

    fn new(class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class, message: message.into(), exit_code }
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.class, self.message, self.exit_code)
    }
}

pub(crate) fn load_config(options: &LoadOptions) -> Result<AppConfig, CommandError> {
    AppConfig::load(options.clone()).map_err(CommandError::config)
}

/// Builds a single-threaded runtime and drives `task` on it.
pub(crate) fn block_on<F, T>(task: F) -> Result<T, CommandError>
where
    F: std::future::Future<Output = Result<T, CommandError>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CommandError::runtime)?;
    runtime.block_on(task)
}

/// Connects and applies pending migrations.
pub(crate) async fn open_store(config: &AppConfig) -> Result<(DbPool, Store), CommandError> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(CommandError::database)?;
    migrations::run_pending(&pool).await.map_err(CommandError::migration)?;
    Ok((pool.clone(), Store::sql(pool)))
}

pub(crate) fn retrieval(config: &AppConfig) -> Result<RetrievalAdapter, CommandError> {
    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let embedder =
        OllamaEmbedder::new(&config.memory.embedding_url, &config.memory.embedding_model, timeout)
            .map_err(CommandError::retrieval)?;
    let index = ChromaIndex::new(&config.memory.vector_url, timeout).map_err(CommandError::retrieval)?;
    Ok(RetrievalAdapter::new(Arc::new(embedder), Arc::new(index)))
}
