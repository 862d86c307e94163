use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use perch_core::domain::event::ChatEvent;
use perch_core::domain::message::MessageKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error("client is {0}")]
    State(&'static str),
    #[error("transport gave up after {retries} reconnect attempts: {last}")]
    RetriesExhausted { retries: u32, last: String },
    #[error("event pump ended abnormally: {0}")]
    PumpFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    pub target: String,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(kind: MessageKind, target: impl Into<String>, content: impl Into<String>) -> Self {
        Self { kind, target: target.into(), content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// The wire-level chat network. Implementations own framing and
/// authentication; perch only consumes decoded events and emits sends.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// Next decoded event, or `None` once the stream has ended.
    async fn next_event(&self) -> Result<Option<ChatEvent>, TransportError>;
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}
