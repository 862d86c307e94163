//! The bot runtime.
//!
//! Stored public messages arrive on the intake channel, each one becomes a
//! task on the [`ProcessingQueue`], and each task runs the plugin chain once.
//! Plugins act through a [`BotHandle`]: replies are persisted under the same
//! [`SerializedDispatcher`] the transport events use, then sent, then fed
//! back to the intake like any other channel message.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use perch_chat::{Client, EntityRecorder, EventHandlerError, TransportError};
use perch_core::config::AppConfig;
use perch_core::domain::entity::NewServer;
use perch_core::domain::event::ChatEventKind;
use perch_core::domain::message::{GenericMessage, MessageKind};
use perch_core::errors::ApplicationError;
use perch_core::plugin::{Plugin, PluginChain, PluginContext};
use perch_core::queue::{ProcessingQueue, QueueError, TaskHandle};
use perch_core::SerializedDispatcher;
use perch_db::{RepositoryError, Store};

use crate::agent::{LlmAgent, Personality};
use crate::llm::LlmClient;

const NICKSERV: &str = "NickServ";

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Application(#[from] ApplicationError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("repository failure: {0}")]
    Repository(#[from] RepositoryError),
    #[error("bot is already running")]
    AlreadyStarted,
}

impl From<EventHandlerError> for BotError {
    fn from(error: EventHandlerError) -> Self {
        Self::Application(error.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotSettings {
    pub nick: String,
    pub channel: String,
    pub task_timeout: Duration,
    pub shutdown_drain: Duration,
}

impl BotSettings {
    pub fn new(nick: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            channel: channel.into(),
            task_timeout: Duration::from_secs(120),
            shutdown_drain: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            nick: config.user.nick.clone(),
            channel: config.user.channel.clone(),
            task_timeout: Duration::from_secs(config.queue.task_timeout_secs),
            shutdown_drain: Duration::from_secs(config.queue.shutdown_drain_secs),
        }
    }
}

/// The capability set every bot exposes to its host process.
#[async_trait]
pub trait Bot: Send + Sync {
    async fn start(&self) -> Result<(), BotError>;
    async fn stop(&self) -> Result<(), BotError>;
    async fn send(&self, kind: MessageKind, target: &str, content: &str) -> Result<(), BotError>;
}

/// What plugins see of the bot.
#[derive(Clone)]
pub struct BotHandle {
    settings: Arc<BotSettings>,
    personality: Arc<RwLock<Personality>>,
    model: Arc<dyn LlmClient>,
    store: Store,
    client: Arc<dyn Client>,
    dispatcher: SerializedDispatcher,
    recorder: Arc<EntityRecorder>,
    queue: Arc<ProcessingQueue>,
}

impl BotHandle {
    pub fn nick(&self) -> &str {
        &self.settings.nick
    }

    pub fn channel(&self) -> &str {
        &self.settings.channel
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn personality(&self) -> Personality {
        self.personality.read().await.clone()
    }

    pub async fn update_personality(&self, update: impl FnOnce(&mut Personality) + Send) {
        let mut personality = self.personality.write().await;
        update(&mut personality);
    }

    /// The bare model; callers place the personality in the prompt themselves.
    pub fn agent(&self) -> LlmAgent {
        LlmAgent::new(self.model.clone())
    }

    pub fn agent_with(&self, personality: Personality) -> LlmAgent {
        LlmAgent::new(self.model.clone()).with_personality(personality)
    }

    /// Persists the bot's own message, delivers it, and feeds public
    /// messages back through the intake.
    ///
    /// A public message to a channel the store does not know fails with
    /// [`ApplicationError::EntityNotFound`] before anything is written or
    /// sent. A delivery failure leaves the stored row in place and the
    /// message is not fed back.
    pub async fn send(&self, kind: MessageKind, target: &str, content: &str) -> Result<(), BotError> {
        let recorder = self.recorder.as_ref();
        let nick = self.nick();
        let recorded = self
            .dispatcher
            .dispatch("bot.send", move || async move {
                match kind {
                    MessageKind::Public => {
                        recorder.record_public(nick, target, content, false).await.map(Some)
                    }
                    MessageKind::Private => {
                        recorder.record_private(nick, target, content).await.map(|()| None)
                    }
                }
            })
            .await?;

        if let Err(error) = self.client.send(kind, target, content).await {
            warn!(
                event_name = "bot.message.undelivered",
                kind = kind.as_str(),
                target,
                message_id = recorded.as_ref().map(|message| message.id.0),
                error = %error,
                "stored bot message was not delivered"
            );
            return Err(error.into());
        }
        debug!(
            event_name = "bot.message.sent",
            kind = kind.as_str(),
            target,
            chars = content.len(),
            "bot message sent"
        );

        if let Some(message) = recorded {
            self.recorder.forward(message);
        }
        Ok(())
    }

    /// Queues work behind every plugin run submitted so far.
    pub fn enqueue<F, E>(&self, label: impl Into<String>, task: F) -> Result<TaskHandle, QueueError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.queue.enqueue(label, task)
    }
}

/// The concrete bot: one client, one dispatcher, one queue, one chain.
pub struct ChatBot {
    handle: BotHandle,
    chain: PluginChain,
    intake: Mutex<Option<mpsc::UnboundedReceiver<GenericMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatBot {
    /// Ensures the server, the bot's own user and `NickServ` exist, then
    /// wires an [`EntityRecorder`] into every event kind of `client`.
    pub async fn provision(
        settings: BotSettings,
        server: NewServer,
        store: Store,
        client: Arc<dyn Client>,
        dispatcher: SerializedDispatcher,
        model: Arc<dyn LlmClient>,
    ) -> Result<Self, BotError> {
        let server = store.servers.find_or_create(server).await?;
        store.users.find_or_create(&settings.nick).await?;
        store.users.find_or_create(NICKSERV).await?;

        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(EntityRecorder::new(store.clone(), server.id).with_intake(intake_tx));
        for kind in ChatEventKind::ALL {
            client.subscribe(kind, recorder.clone());
        }

        info!(
            event_name = "bot.provisioned",
            server = %server.name,
            nick = %settings.nick,
            channel = %settings.channel,
            model = %model.describe(),
            "bot provisioned"
        );

        let personality = Personality::default_for(&settings.nick, &settings.channel);
        let queue = Arc::new(ProcessingQueue::new(settings.task_timeout));
        let handle = BotHandle {
            settings: Arc::new(settings),
            personality: Arc::new(RwLock::new(personality)),
            model,
            store,
            client,
            dispatcher,
            recorder,
            queue,
        };

        Ok(Self {
            handle,
            chain: PluginChain::new(),
            intake: Mutex::new(Some(intake_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn handle(&self) -> BotHandle {
        self.handle.clone()
    }

    /// Appends a plugin. Plugins registered after [`Bot::start`] are not run.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.chain.register(plugin);
        self
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Runs `task` alongside the bot; it is aborted on [`Bot::stop`].
    pub fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push(tokio::spawn(task));
    }
}

async fn pump_intake(
    mut intake: mpsc::UnboundedReceiver<GenericMessage>,
    chain: Arc<PluginChain>,
    queue: Arc<ProcessingQueue>,
) {
    while let Some(message) = intake.recv().await {
        let chain = chain.clone();
        let label = format!("chain:{}", message.id.0);
        let ctx = PluginContext { message };
        let submitted = queue.enqueue(label, async move {
            let result = chain.run(&ctx).await;
            if let Err(error) = &result {
                error!(
                    event_name = "bot.plugin.failed",
                    message_id = ctx.message.id.0,
                    error = %error,
                    "plugin chain failed"
                );
            }
            result
        });
        if submitted.is_err() {
            warn!(event_name = "bot.intake.queue_closed", "processing queue closed; intake stopped");
            break;
        }
    }
}

#[async_trait]
impl Bot for ChatBot {
    async fn start(&self) -> Result<(), BotError> {
        let intake = self.intake.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(intake) = intake else {
            return Err(BotError::AlreadyStarted);
        };

        let chain = Arc::new(self.chain.clone());
        self.spawn_background(pump_intake(intake, chain, self.handle.queue.clone()));
        self.handle.client.start().await?;

        info!(
            event_name = "bot.started",
            plugins = ?self.chain.names(),
            "bot started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), BotError> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }

        let stopped = self.handle.client.stop().await;
        let report = self.handle.queue.shutdown(self.handle.settings.shutdown_drain).await;
        info!(
            event_name = "bot.stopped",
            drained = report.drained,
            discarded = report.discarded,
            "bot stopped"
        );
        stopped.map_err(BotError::from)
    }

    async fn send(&self, kind: MessageKind, target: &str, content: &str) -> Result<(), BotError> {
        self.handle.send(kind, target, content).await
    }
}
