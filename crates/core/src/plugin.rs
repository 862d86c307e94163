//! Ordered middleware chain for processed messages.
//!
//! Plugins run in registration order. Each receives the shared
//! [`PluginContext`] and a [`Next`] continuation; calling `next.run(ctx)`
//! hands control to the following plugin and returns once the rest of the
//! chain has finished. Work done before that call is visible to later
//! plugins, work done after it is not. A plugin that never calls `next`
//! ends the chain for the current message.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::domain::message::GenericMessage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginContext {
    pub message: GenericMessage,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin `{plugin}` failed: {message}")]
    Failed { plugin: &'static str, message: String },
}

impl PluginError {
    pub fn failed(plugin: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Failed { plugin, message: error.to_string() }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError>;
}

/// Continuation into the remainder of a chain.
pub struct Next<'a> {
    plugins: &'a [Arc<dyn Plugin>],
    index: usize,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &PluginContext) -> Result<(), PluginError> {
        let Some(plugin) = self.plugins.get(self.index) else {
            return Ok(());
        };

        debug!(
            event_name = "plugin.chain.step",
            plugin = plugin.name(),
            position = self.index,
            message_id = ctx.message.id.0,
            "running plugin"
        );
        plugin.process(ctx, Next { plugins: self.plugins, index: self.index + 1 }).await
    }
}

#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.push(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    pub async fn run(&self, ctx: &PluginContext) -> Result<(), PluginError> {
        Next { plugins: &self.plugins, index: 0 }.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::domain::message::{GenericMessage, MessageId};

    use super::{Next, Plugin, PluginChain, PluginContext, PluginError};

    type Journal = Arc<Mutex<Vec<String>>>;

    enum Behaviour {
        Continue,
        Stop,
        Wrap,
        Fail,
    }

    struct Recording {
        name: &'static str,
        behaviour: Behaviour,
        journal: Journal,
    }

    #[async_trait]
    impl Plugin for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError> {
            match self.behaviour {
                Behaviour::Continue => {
                    self.journal.lock().await.push(self.name.to_string());
                    next.run(ctx).await
                }
                Behaviour::Stop => {
                    self.journal.lock().await.push(self.name.to_string());
                    Ok(())
                }
                Behaviour::Wrap => {
                    self.journal.lock().await.push(format!("{}:before", self.name));
                    next.run(ctx).await?;
                    self.journal.lock().await.push(format!("{}:after", self.name));
                    Ok(())
                }
                Behaviour::Fail => Err(PluginError::failed(self.name, "model unavailable")),
            }
        }
    }

    fn chain(journal: &Journal, plugins: Vec<(&'static str, Behaviour)>) -> PluginChain {
        let mut chain = PluginChain::new();
        for (name, behaviour) in plugins {
            chain.register(Arc::new(Recording { name, behaviour, journal: journal.clone() }));
        }
        chain
    }

    fn context() -> PluginContext {
        PluginContext {
            message: GenericMessage {
                id: MessageId(1),
                sender: "alice".to_string(),
                channel: "#perch".to_string(),
                content: "hello".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn all_plugins_run_in_registration_order() {
        let journal = Journal::default();
        let chain = chain(
            &journal,
            vec![("a", Behaviour::Continue), ("b", Behaviour::Continue), ("c", Behaviour::Continue)],
        );

        assert_eq!(chain.run(&context()).await, Ok(()));
        assert_eq!(*journal.lock().await, vec!["a", "b", "c"]);
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn plugin_that_skips_next_short_circuits_the_rest() {
        let journal = Journal::default();
        let chain = chain(
            &journal,
            vec![("a", Behaviour::Continue), ("b", Behaviour::Stop), ("c", Behaviour::Continue)],
        );

        assert_eq!(chain.run(&context()).await, Ok(()));
        assert_eq!(*journal.lock().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn work_after_next_sees_later_plugins_finished() {
        let journal = Journal::default();
        let chain = chain(&journal, vec![("outer", Behaviour::Wrap), ("inner", Behaviour::Continue)]);

        assert_eq!(chain.run(&context()).await, Ok(()));
        assert_eq!(*journal.lock().await, vec!["outer:before", "inner", "outer:after"]);
    }

    #[tokio::test]
    async fn empty_chain_is_a_no_op() {
        let chain = PluginChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.run(&context()).await, Ok(()));
    }

    #[tokio::test]
    async fn failure_ends_the_current_run_but_not_the_next_one() {
        let journal = Journal::default();
        let chain = chain(&journal, vec![("a", Behaviour::Continue), ("broken", Behaviour::Fail)]);

        let first = chain.run(&context()).await;
        assert_eq!(
            first,
            Err(PluginError::Failed { plugin: "broken", message: "model unavailable".to_string() })
        );

        assert!(chain.run(&context()).await.is_err());
        assert_eq!(*journal.lock().await, vec!["a", "a"]);
    }
}
