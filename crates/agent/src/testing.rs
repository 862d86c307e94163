use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use perch_chat::{EventRouter, FakeClient};
use perch_core::domain::entity::NewServer;
use perch_core::domain::event::ChatEvent;
use perch_core::{EventLock, SerializedDispatcher};
use perch_db::{connect_with_settings, migrations, Store};

use crate::bot::{BotSettings, ChatBot};
use crate::llm::{LlmClient, LlmError};

/// Model double that answers from a script and remembers every prompt.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn replying<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|reply| Ok(reply.into())).collect()),
            ..Self::default()
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
            ..Self::default()
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedModel {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().expect("prompts lock").push(prompt.to_string());
        let next = self.replies.lock().expect("replies lock").pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(LlmError::Invocation { provider: "scripted", message }),
            None => Err(LlmError::Invocation {
                provider: "scripted",
                message: "script exhausted".to_string(),
            }),
        }
    }
}

pub struct TestBot {
    pub bot: ChatBot,
    pub client: Arc<FakeClient>,
}

impl TestBot {
    pub async fn new(model: Arc<ScriptedModel>) -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = Store::sql(pool);

        let dispatcher = SerializedDispatcher::new(EventLock::new());
        let client = Arc::new(FakeClient::new(Arc::new(EventRouter::new(dispatcher.clone()))));
        let bot = ChatBot::provision(
            BotSettings::new("perch", "#perch"),
            NewServer::new("irc.example.net", 6697, true),
            store,
            client.clone(),
            dispatcher,
            model,
        )
        .await
        .expect("provision");

        Self { bot, client }
    }
}

pub fn join(channel: &str, nick: &str) -> ChatEvent {
    ChatEvent::Join { channel: channel.to_string(), nick: nick.to_string() }
}

pub fn public(sender: &str, channel: &str, content: &str) -> ChatEvent {
    ChatEvent::PublicMessage {
        sender: sender.to_string(),
        channel: channel.to_string(),
        content: content.to_string(),
    }
}
