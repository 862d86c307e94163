use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use perch_core::config::ModelUri;
use perch_core::errors::ApplicationError;

const OLLAMA_TEMPERATURE: f32 = 0.7;
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model invocation failed ({provider}): {message}")]
    Invocation { provider: &'static str, message: String },
    #[error("could not build model client: {0}")]
    Client(String),
    #[error("no language models configured")]
    NoModels,
}

impl LlmError {
    fn invocation(provider: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Invocation { provider, message: error.to_string() }
    }
}

impl From<LlmError> for ApplicationError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::Invocation { .. } => ApplicationError::ModelInvocation(error.to_string()),
            LlmError::Client(_) | LlmError::NoModels => {
                ApplicationError::Configuration(error.to_string())
            }
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn describe(&self) -> String;
    async fn invoke(&self, prompt: &str) -> Result<String, LlmError>;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder().timeout(timeout).build().map_err(|e| LlmError::Client(e.to_string()))
}

/// Local inference through the Ollama chat API.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: OLLAMA_TEMPERATURE,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn describe(&self) -> String {
        format!("ollama/{}", self.model)
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::invocation("ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::invocation("ollama", format!("HTTP {status}: {text}")));
        }

        let parsed: OllamaChatResponse =
            response.json().await.map_err(|e| LlmError::invocation("ollama", e))?;
        Ok(parsed.message.content)
    }
}

/// Hosted inference through Groq's OpenAI-compatible chat completions API.
pub struct GroqClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: OllamaMessage,
}

impl GroqClient {
    pub fn new(api_key: SecretString, model: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: GROQ_BASE_URL.to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LlmClient for GroqClient {
    fn describe(&self) -> String {
        format!("groq/{}", self.model)
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::invocation("groq", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::invocation("groq", format!("HTTP {status}: {text}")));
        }

        let parsed: CompletionResponse =
            response.json().await.map_err(|e| LlmError::invocation("groq", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::invocation("groq", "response contained no choices"))
    }
}

/// Tries each configured model in order and returns the first completion.
pub struct FallbackModel {
    models: Vec<Arc<dyn LlmClient>>,
}

impl FallbackModel {
    pub fn new(models: Vec<Arc<dyn LlmClient>>) -> Result<Self, LlmError> {
        if models.is_empty() {
            return Err(LlmError::NoModels);
        }
        Ok(Self { models })
    }
}

#[async_trait]
impl LlmClient for FallbackModel {
    fn describe(&self) -> String {
        self.models.iter().map(|model| model.describe()).collect::<Vec<_>>().join(" -> ")
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let mut last_error = LlmError::NoModels;
        for model in &self.models {
            match model.invoke(prompt).await {
                Ok(text) => return Ok(text),
                Err(error) => {
                    warn!(
                        event_name = "llm.model.failed",
                        model = %model.describe(),
                        error = %error,
                        "model invocation failed; trying next model"
                    );
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}

pub struct ModelFactory;

impl ModelFactory {
    pub fn create(uri: &ModelUri, timeout: Duration) -> Result<Arc<dyn LlmClient>, LlmError> {
        debug!(event_name = "llm.model.created", model = %uri.redacted(), "creating model client");
        match uri {
            ModelUri::Ollama { base_url, model } => {
                Ok(Arc::new(OllamaClient::new(base_url.clone(), model.clone(), timeout)?))
            }
            ModelUri::Groq { api_key, model } => {
                Ok(Arc::new(GroqClient::new(api_key.clone(), model.clone(), timeout)?))
            }
        }
    }

    /// A single client for the configured list: the model itself when there
    /// is one, otherwise a [`FallbackModel`] in configuration order.
    pub fn create_all(uris: &[ModelUri], timeout: Duration) -> Result<Arc<dyn LlmClient>, LlmError> {
        let mut models = uris
            .iter()
            .map(|uri| Self::create(uri, timeout))
            .collect::<Result<Vec<_>, _>>()?;
        match models.len() {
            0 => Err(LlmError::NoModels),
            1 => Ok(models.remove(0)),
            _ => Ok(Arc::new(FallbackModel::new(models)?)),
        }
    }
}
