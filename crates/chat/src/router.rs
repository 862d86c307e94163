use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use perch_core::domain::event::{ChatEvent, ChatEventKind};
use perch_core::errors::ApplicationError;
use perch_core::SerializedDispatcher;
use perch_db::RepositoryError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl EventContext {
    pub fn generate() -> Self {
        Self { correlation_id: Uuid::new_v4().to_string() }
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error("{entity} `{key}` was not found")]
    NotFound { entity: &'static str, key: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EventHandlerError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound { entity, key: key.into() }
    }
}

impl From<EventHandlerError> for ApplicationError {
    fn from(error: EventHandlerError) -> Self {
        match error {
            EventHandlerError::NotFound { entity, key } => ApplicationError::not_found(entity, key),
            EventHandlerError::Repository(error) => ApplicationError::Persistence(error.to_string()),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ChatEvent, ctx: &EventContext) -> Result<(), EventHandlerError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub handled: usize,
    pub failed: usize,
}

/// Fans transport events out to their subscribers. Every subscriber call
/// runs inside the dispatcher, so subscriptions never interleave.
pub struct EventRouter {
    dispatcher: SerializedDispatcher,
    handlers: RwLock<HashMap<ChatEventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl EventRouter {
    pub fn new(dispatcher: SerializedDispatcher) -> Self {
        Self { dispatcher, handlers: RwLock::new(HashMap::new()) }
    }

    pub fn dispatcher(&self) -> &SerializedDispatcher {
        &self.dispatcher
    }

    pub fn subscribe(&self, kind: ChatEventKind, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.entry(kind).or_default().push(handler);
    }

    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        for kind in ChatEventKind::ALL {
            self.subscribe(kind, Arc::clone(&handler));
        }
    }

    pub fn handler_count(&self, kind: ChatEventKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to each subscriber in subscription order. Failures
    /// are logged by the dispatcher and counted; they never stop delivery.
    pub async fn route(&self, event: ChatEvent) -> RouteReport {
        let kind = event.kind();
        let ctx = EventContext::generate();
        let subscribers = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            handlers.get(&kind).cloned().unwrap_or_default()
        };

        info!(
            event_name = "ingress.chat.event_received",
            event_type = kind.as_str(),
            correlation_id = %ctx.correlation_id,
            subscribers = subscribers.len(),
            "received chat event"
        );

        let mut report = RouteReport::default();
        for handler in subscribers {
            let outcome =
                self.dispatcher.dispatch(kind.as_str(), || handler.handle(&event, &ctx)).await;
            match outcome {
                Ok(()) => report.handled += 1,
                Err(error) => {
                    report.failed += 1;
                    debug!(
                        event_name = "ingress.chat.handler_failed",
                        event_type = kind.as_str(),
                        correlation_id = %ctx.correlation_id,
                        error_class = ApplicationError::from(error).class(),
                        "subscriber failed"
                    );
                }
            }
        }

        debug!(
            event_name = "ingress.chat.event_routed",
            event_type = kind.as_str(),
            correlation_id = %ctx.correlation_id,
            handled = report.handled,
            failed = report.failed,
            "chat event routed"
        );
        report
    }
}
