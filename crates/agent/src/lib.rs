//! Agent runtime for perch: the models, the memory backends and the bot
//! that ties them to a chat client.
//!
//! - **Models** (`llm`) - Ollama and Groq clients, an ordered fallback chain and the model-URI factory
//! - **Agent** (`agent`) - personalities and the prompt-lines query surface plugins use
//! - **Memory** (`embeddings`, `chroma`) - the Ollama embedder and the Chroma vector index client
//! - **Documents** (`fetch`) - URL safety checks, page fetching and text extraction
//! - **Bot** (`bot`) - provisioning, the message intake, the processing queue and outbound sends
//! - **Plugins** (`plugins`) - the built-in middleware registered from configuration
//!
//! # Architecture
//!
//! ```text
//! EntityRecorder → intake → ProcessingQueue → PluginChain → plugins
//!                                                              ↓
//!                                   BotHandle::send → dispatcher → Store → Client
//! ```
//!
//! The model only writes text. What gets stored, when a reply is sent and
//! which messages are indexed is decided by the bot and its plugins.

pub mod agent;
pub mod bot;
pub mod chroma;
pub mod embeddings;
pub mod fetch;
pub mod llm;
pub mod plugins;

#[cfg(test)]
mod testing;

pub use agent::{LlmAgent, Personality};
pub use bot::{Bot, BotError, BotHandle, BotSettings, ChatBot};
pub use chroma::ChromaIndex;
pub use embeddings::OllamaEmbedder;
pub use fetch::{Document, DocumentFetcher, FetchError, HttpDocumentFetcher};
pub use llm::{FallbackModel, GroqClient, LlmClient, LlmError, ModelFactory, OllamaClient};
pub use plugins::{install, PluginDeps};
