use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::windowing::validate_window;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub user: UserConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub queue: QueueConfig,
    pub plugins: PluginsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct UserConfig {
    pub nick: String,
    pub name: String,
    pub channel: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub password: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub models: Vec<ModelUri>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub vector_url: String,
    pub embedding_url: String,
    pub embedding_model: String,
    pub window_size: usize,
    pub overlap_size: usize,
    pub index_threshold: usize,
    pub context_size: usize,
    pub retrieval_k: usize,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub task_timeout_secs: u64,
    pub shutdown_drain_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PluginsConfig {
    pub enabled: Vec<PluginName>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Built-in plugins, in the order they may be registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginName {
    Personality,
    Mention,
    Idle,
    Read,
    Embed,
    Summarize,
}

impl PluginName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personality => "personality",
            Self::Mention => "mention",
            Self::Idle => "idle",
            Self::Read => "read",
            Self::Embed => "embed",
            Self::Summarize => "summarize",
        }
    }
}

impl std::str::FromStr for PluginName {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "personality" => Ok(Self::Personality),
            "mention" => Ok(Self::Mention),
            "idle" => Ok(Self::Idle),
            "read" => Ok(Self::Read),
            "embed" => Ok(Self::Embed),
            "summarize" => Ok(Self::Summarize),
            other => Err(ConfigError::Validation(format!(
                "unknown plugin `{other}` (expected personality|mention|idle|read|embed|summarize)"
            ))),
        }
    }
}

/// A model connection string such as `ollama://localhost:11434/llama3`
/// or `groq://<api key>/llama-3.1-8b-instant`.
#[derive(Clone, Debug)]
pub enum ModelUri {
    Ollama { base_url: String, model: String },
    Groq { api_key: SecretString, model: String },
}

impl ModelUri {
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Ollama { .. } => "ollama",
            Self::Groq { .. } => "groq",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Ollama { model, .. } | Self::Groq { model, .. } => model,
        }
    }

    /// Connection string with credentials masked.
    pub fn redacted(&self) -> String {
        match self {
            Self::Ollama { base_url, model } => {
                format!("ollama://{}/{model}", base_url.trim_start_matches("http://"))
            }
            Self::Groq { model, .. } => format!("groq://***/{model}"),
        }
    }
}

impl std::str::FromStr for ModelUri {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedModelUri(value.to_string());
        let (scheme, rest) = value.trim().split_once("://").ok_or_else(malformed)?;
        let (authority, model) = rest.split_once('/').ok_or_else(malformed)?;
        if authority.is_empty() || model.trim().is_empty() {
            return Err(malformed());
        }

        match scheme.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama {
                base_url: format!("http://{authority}"),
                model: model.to_string(),
            }),
            "groq" => Ok(Self::Groq {
                api_key: secret_value(authority.to_string()),
                model: model.to_string(),
            }),
            _ => Err(ConfigError::UnsupportedModelProvider(scheme.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub nick: Option<String>,
    pub channel: Option<String>,
    pub models: Option<Vec<String>>,
    pub vector_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("malformed model connection string `{0}` (expected <provider>://<params>/<model>)")]
    MalformedModelUri(String),
    #[error("unsupported model provider `{0}` (expected ollama|groq)")]
    UnsupportedModelProvider(String),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://perch.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            user: UserConfig {
                nick: "perch".to_string(),
                name: "perch".to_string(),
                channel: "#perch".to_string(),
            },
            server: ServerConfig {
                host: "irc.libera.chat".to_string(),
                port: 6697,
                secure: true,
                password: None,
            },
            llm: LlmConfig {
                models: vec![ModelUri::Ollama {
                    base_url: "http://localhost:11434".to_string(),
                    model: "llama3.1".to_string(),
                }],
                timeout_secs: 60,
            },
            memory: MemoryConfig {
                vector_url: "http://localhost:8000".to_string(),
                embedding_url: "http://localhost:11434".to_string(),
                embedding_model: "nomic-embed-text".to_string(),
                window_size: 12,
                overlap_size: 3,
                index_threshold: 72,
                context_size: 16,
                retrieval_k: 3,
            },
            queue: QueueConfig { task_timeout_secs: 120, shutdown_drain_secs: 10 },
            plugins: PluginsConfig {
                enabled: vec![
                    PluginName::Personality,
                    PluginName::Read,
                    PluginName::Mention,
                    PluginName::Embed,
                    PluginName::Summarize,
                    PluginName::Idle,
                ],
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("perch.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(user) = patch.user {
            if let Some(nick) = user.nick {
                self.user.nick = nick;
            }
            if let Some(name) = user.name {
                self.user.name = name;
            }
            if let Some(channel) = user.channel {
                self.user.channel = channel;
            }
        }

        if let Some(server) = patch.server {
            if let Some(host) = server.host {
                self.server.host = host;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(secure) = server.secure {
                self.server.secure = secure;
            }
            if let Some(password) = server.password {
                self.server.password = Some(secret_value(password));
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(models) = llm.models {
                self.llm.models = parse_models(&models)?;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(vector_url) = memory.vector_url {
                self.memory.vector_url = vector_url;
            }
            if let Some(embedding_url) = memory.embedding_url {
                self.memory.embedding_url = embedding_url;
            }
            if let Some(embedding_model) = memory.embedding_model {
                self.memory.embedding_model = embedding_model;
            }
            if let Some(window_size) = memory.window_size {
                self.memory.window_size = window_size;
            }
            if let Some(overlap_size) = memory.overlap_size {
                self.memory.overlap_size = overlap_size;
            }
            if let Some(index_threshold) = memory.index_threshold {
                self.memory.index_threshold = index_threshold;
            }
            if let Some(context_size) = memory.context_size {
                self.memory.context_size = context_size;
            }
            if let Some(retrieval_k) = memory.retrieval_k {
                self.memory.retrieval_k = retrieval_k;
            }
        }

        if let Some(queue) = patch.queue {
            if let Some(task_timeout_secs) = queue.task_timeout_secs {
                self.queue.task_timeout_secs = task_timeout_secs;
            }
            if let Some(shutdown_drain_secs) = queue.shutdown_drain_secs {
                self.queue.shutdown_drain_secs = shutdown_drain_secs;
            }
        }

        if let Some(plugins) = patch.plugins {
            if let Some(enabled) = plugins.enabled {
                self.plugins.enabled = parse_plugins(&enabled)?;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PERCH_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PERCH_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PERCH_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PERCH_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PERCH_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PERCH_USER_NICK") {
            self.user.nick = value;
        }
        if let Some(value) = read_env("PERCH_USER_NAME") {
            self.user.name = value;
        }
        if let Some(value) = read_env("PERCH_USER_CHANNEL") {
            self.user.channel = value;
        }

        if let Some(value) = read_env("PERCH_SERVER_HOST") {
            self.server.host = value;
        }
        if let Some(value) = read_env("PERCH_SERVER_PORT") {
            self.server.port = parse_u16("PERCH_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PERCH_SERVER_SECURE") {
            self.server.secure = parse_bool("PERCH_SERVER_SECURE", &value)?;
        }
        if let Some(value) = read_env("PERCH_SERVER_PASSWORD") {
            self.server.password = Some(secret_value(value));
        }

        if let Some(value) = read_env("PERCH_LLM_MODELS") {
            let models: Vec<String> = value.split(',').map(|uri| uri.trim().to_string()).collect();
            self.llm.models = parse_models(&models)?;
        }
        if let Some(value) = read_env("PERCH_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PERCH_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PERCH_MEMORY_VECTOR_URL") {
            self.memory.vector_url = value;
        }
        if let Some(value) = read_env("PERCH_MEMORY_EMBEDDING_URL") {
            self.memory.embedding_url = value;
        }
        if let Some(value) = read_env("PERCH_MEMORY_EMBEDDING_MODEL") {
            self.memory.embedding_model = value;
        }
        if let Some(value) = read_env("PERCH_MEMORY_WINDOW_SIZE") {
            self.memory.window_size = parse_usize("PERCH_MEMORY_WINDOW_SIZE", &value)?;
        }
        if let Some(value) = read_env("PERCH_MEMORY_OVERLAP_SIZE") {
            self.memory.overlap_size = parse_usize("PERCH_MEMORY_OVERLAP_SIZE", &value)?;
        }

        if let Some(value) = read_env("PERCH_QUEUE_TASK_TIMEOUT_SECS") {
            self.queue.task_timeout_secs = parse_u64("PERCH_QUEUE_TASK_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PERCH_QUEUE_SHUTDOWN_DRAIN_SECS") {
            self.queue.shutdown_drain_secs = parse_u64("PERCH_QUEUE_SHUTDOWN_DRAIN_SECS", &value)?;
        }

        if let Some(value) = read_env("PERCH_PLUGINS_ENABLED") {
            let names: Vec<String> = value.split(',').map(|name| name.trim().to_string()).collect();
            self.plugins.enabled = parse_plugins(&names)?;
        }

        let log_level = read_env("PERCH_LOGGING_LEVEL").or_else(|| read_env("PERCH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("PERCH_LOGGING_FORMAT").or_else(|| read_env("PERCH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(nick) = overrides.nick {
            self.user.nick = nick;
        }
        if let Some(channel) = overrides.channel {
            self.user.channel = channel;
        }
        if let Some(models) = overrides.models {
            self.llm.models = parse_models(&models)?;
        }
        if let Some(vector_url) = overrides.vector_url {
            self.memory.vector_url = vector_url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_user(&self.user)?;
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_memory(&self.memory)?;
        validate_queue(&self.queue)?;
        validate_plugins(&self.plugins)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// Effective configuration as JSON with every secret masked.
    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "database": {
                "url": self.database.url,
                "max_connections": self.database.max_connections,
                "timeout_secs": self.database.timeout_secs,
            },
            "user": {
                "nick": self.user.nick,
                "name": self.user.name,
                "channel": self.user.channel,
            },
            "server": {
                "host": self.server.host,
                "port": self.server.port,
                "secure": self.server.secure,
                "password": self.server.password.as_ref().map(|_| "***"),
            },
            "llm": {
                "models": self.llm.models.iter().map(ModelUri::redacted).collect::<Vec<_>>(),
                "timeout_secs": self.llm.timeout_secs,
            },
            "memory": {
                "vector_url": self.memory.vector_url,
                "embedding_url": self.memory.embedding_url,
                "embedding_model": self.memory.embedding_model,
                "window_size": self.memory.window_size,
                "overlap_size": self.memory.overlap_size,
                "index_threshold": self.memory.index_threshold,
                "context_size": self.memory.context_size,
                "retrieval_k": self.memory.retrieval_k,
            },
            "queue": {
                "task_timeout_secs": self.queue.task_timeout_secs,
                "shutdown_drain_secs": self.queue.shutdown_drain_secs,
            },
            "plugins": {
                "enabled": self.plugins.enabled.iter().map(PluginName::as_str).collect::<Vec<_>>(),
            },
            "logging": {
                "level": self.logging.level,
                "format": self.logging.format,
            },
        })
    }
}

/// The config file `load` would read: the explicit path if it exists, else
/// `perch.toml` or `config/perch.toml` in the working directory.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("perch.toml"), PathBuf::from("config/perch.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn parse_models(raw: &[String]) -> Result<Vec<ModelUri>, ConfigError> {
    raw.iter().filter(|uri| !uri.trim().is_empty()).map(|uri| uri.parse()).collect()
}

fn parse_plugins(raw: &[String]) -> Result<Vec<PluginName>, ConfigError> {
    raw.iter().filter(|name| !name.trim().is_empty()).map(|name| name.parse()).collect()
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_user(user: &UserConfig) -> Result<(), ConfigError> {
    if user.nick.trim().is_empty() || user.nick.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(
            "user.nick is required and must not contain whitespace".to_string(),
        ));
    }
    if user.name.trim().is_empty() {
        return Err(ConfigError::Validation("user.name is required".to_string()));
    }
    if !user.channel.starts_with('#') || user.channel.len() < 2 {
        return Err(ConfigError::Validation(
            "user.channel must be a channel name starting with `#`".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.host.trim().is_empty() {
        return Err(ConfigError::Validation("server.host is required".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }
    if let Some(password) = &server.password {
        if password.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.password must not be blank when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.models.is_empty() {
        return Err(ConfigError::Validation(
            "llm.models must list at least one model connection string".to_string(),
        ));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    for model in &llm.models {
        if let ModelUri::Groq { api_key, .. } = model {
            if api_key.expose_secret().trim().is_empty() {
                return Err(ConfigError::Validation(
                    "groq model connection strings require an api key".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    validate_window(memory.window_size, memory.overlap_size)
        .map_err(|error| ConfigError::Validation(format!("memory: {error}")))?;

    for (key, url) in [("vector_url", &memory.vector_url), ("embedding_url", &memory.embedding_url)]
    {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "memory.{key} must start with http:// or https://"
            )));
        }
    }

    if memory.embedding_model.trim().is_empty() {
        return Err(ConfigError::Validation("memory.embedding_model is required".to_string()));
    }

    let positive = [
        ("index_threshold", memory.index_threshold),
        ("context_size", memory.context_size),
        ("retrieval_k", memory.retrieval_k),
    ];
    if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::Validation(format!("memory.{key} must be greater than zero")));
    }

    Ok(())
}

fn validate_queue(queue: &QueueConfig) -> Result<(), ConfigError> {
    if queue.task_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "queue.task_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_plugins(plugins: &PluginsConfig) -> Result<(), ConfigError> {
    for (index, name) in plugins.enabled.iter().enumerate() {
        if plugins.enabled[..index].contains(name) {
            return Err(ConfigError::Validation(format!(
                "plugins.enabled lists `{}` more than once",
                name.as_str()
            )));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    user: Option<UserPatch>,
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    memory: Option<MemoryPatch>,
    queue: Option<QueuePatch>,
    plugins: Option<PluginsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct UserPatch {
    nick: Option<String>,
    name: Option<String>,
    channel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    host: Option<String>,
    port: Option<u16>,
    secure: Option<bool>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    models: Option<Vec<String>>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    vector_url: Option<String>,
    embedding_url: Option<String>,
    embedding_model: Option<String>,
    window_size: Option<usize>,
    overlap_size: Option<usize>,
    index_threshold: Option<usize>,
    context_size: Option<usize>,
    retrieval_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct QueuePatch {
    task_timeout_secs: Option<u64>,
    shutdown_drain_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PluginsPatch {
    enabled: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
