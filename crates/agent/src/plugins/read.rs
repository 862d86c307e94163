use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use perch_core::domain::message::{GenericMessage, MessageKind};
use perch_core::errors::ApplicationError;
use perch_core::plugin::{Next, Plugin, PluginContext, PluginError};
use perch_core::text::clean_reply;

use crate::bot::{BotError, BotHandle};
use crate::fetch::{DocumentFetcher, FetchError};

#[derive(Debug, Error)]
enum ReadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Bot(#[from] BotError),
}

fn requested_url(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("!read")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let url = rest.split_whitespace().next()?;
    let scheme_ok = ["http://", "https://"]
        .iter()
        .any(|scheme| {
            url.len() > scheme.len()
                && url.get(..scheme.len()).is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        });
    scheme_ok.then_some(url)
}

/// `!read <url>`: fetches a page and posts the model's take on it.
pub struct ReadPlugin {
    bot: BotHandle,
    fetcher: Arc<dyn DocumentFetcher>,
}

impl ReadPlugin {
    pub fn new(bot: BotHandle, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self { bot, fetcher }
    }

    async fn read(&self, message: &GenericMessage, url: &str) -> Result<(), ReadError> {
        let document = self.fetcher.fetch(url).await?;
        let nick = self.bot.nick();

        let mut lines = vec!["### Your Personality".to_string()];
        lines.extend(self.bot.personality().await.traits().iter().cloned());
        lines.extend([
            String::new(),
            "### Document Title".to_string(),
            document.title,
            String::new(),
            "### Document Content".to_string(),
            document.text,
            String::new(),
            "### Instructions".to_string(),
            format!("You are {nick}."),
            "Summarize or comment on the above document in a concise and relevant way.".to_string(),
            "Focus on interesting insights, not just a generic summary.".to_string(),
        ]);

        let reply = self
            .bot
            .agent()
            .query(&lines)
            .await
            .map_err(|error| BotError::from(ApplicationError::from(error)))?;
        let reply = clean_reply(&reply, nick);
        if reply.is_empty() {
            return Ok(());
        }

        self.bot.send(MessageKind::Public, &message.channel, &reply).await?;
        info!(event_name = "plugin.read.replied", url, sender = %message.sender, "commented on document");
        Ok(())
    }
}

#[async_trait]
impl Plugin for ReadPlugin {
    fn name(&self) -> &'static str {
        "read"
    }

    async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError> {
        let message = &ctx.message;
        if message.sender != self.bot.nick() {
            if let Some(url) = requested_url(&message.content) {
                if let Err(error) = self.read(message, url).await {
                    warn!(event_name = "plugin.read.failed", url, error = %error, "could not read url");
                    let notice = format!("Failed to process URL: {error}");
                    if let Err(error) = self.bot.send(MessageKind::Private, &message.sender, &notice).await {
                        warn!(event_name = "plugin.read.notify_failed", error = %error, "could not report failure");
                    }
                }
            }
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use perch_core::domain::message::{GenericMessage, MessageId, MessageKind};
    use perch_core::plugin::{PluginChain, PluginContext};

    use super::{requested_url, ReadPlugin};
    use crate::fetch::{Document, DocumentFetcher, FetchError};
    use crate::testing::{join, ScriptedModel, TestBot};

    struct StaticFetcher {
        result: Result<Document, FetchError>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
            self.requested.lock().expect("requested lock").push(url.to_string());
            self.result.clone()
        }
    }

    fn fetcher(result: Result<Document, FetchError>) -> Arc<StaticFetcher> {
        Arc::new(StaticFetcher { result, requested: Mutex::new(Vec::new()) })
    }

    fn context(sender: &str, content: &str) -> PluginContext {
        PluginContext {
            message: GenericMessage {
                id: MessageId(1),
                sender: sender.to_string(),
                channel: "#perch".to_string(),
                content: content.to_string(),
            },
        }
    }

    #[test]
    fn url_must_follow_the_command() {
        assert_eq!(requested_url("!read https://example.com/a b"), Some("https://example.com/a"));
        assert_eq!(requested_url("!read http://example.com"), Some("http://example.com"));
        assert_eq!(requested_url("!read example.com"), None);
        assert_eq!(requested_url("!readhttps://example.com"), None);
        assert_eq!(requested_url("please !read https://example.com"), None);
    }

    #[tokio::test]
    async fn document_commentary_is_posted_to_the_channel() {
        let model = ScriptedModel::replying(["Ownership keeps memory safe without a GC."]);
        let bot = TestBot::new(model.clone()).await;
        bot.client.emit(join("#perch", "alice")).await;
        let fetcher = fetcher(Ok(Document {
            title: "Understanding Ownership".to_string(),
            text: "Each value in Rust has an owner.".to_string(),
        }));

        let mut chain = PluginChain::new();
        chain.register(Arc::new(ReadPlugin::new(bot.bot.handle(), fetcher.clone())));
        chain.run(&context("alice", "!read https://doc.rust-lang.org/book/ch04-01.html")).await.expect("chain");

        let prompt = &model.prompts()[0];
        assert!(prompt.contains("### Document Title\nUnderstanding Ownership\n"));
        assert!(prompt.contains("### Document Content\nEach value in Rust has an owner.\n"));
        assert!(prompt.ends_with("Focus on interesting insights, not just a generic summary."));

        let sent = bot.client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Public);
        assert_eq!(sent[0].target, "#perch");
    }

    #[tokio::test]
    async fn failures_are_reported_privately_to_the_requester() {
        let model = ScriptedModel::replying(["unused"]);
        let bot = TestBot::new(model.clone()).await;
        let fetcher = fetcher(Err(FetchError::Unsafe("unsupported scheme `http`".to_string())));

        let mut chain = PluginChain::new();
        chain.register(Arc::new(ReadPlugin::new(bot.bot.handle(), fetcher)));
        chain.run(&context("alice", "!read http://example.com")).await.expect("chain");

        assert!(model.prompts().is_empty());
        let sent = bot.client.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Private);
        assert_eq!(sent[0].target, "alice");
        assert_eq!(sent[0].content, "Failed to process URL: unsafe url: unsupported scheme `http`");
    }

    #[tokio::test]
    async fn the_bot_does_not_read_its_own_links() {
        let bot = TestBot::new(ScriptedModel::replying(["unused"])).await;
        let fetcher = fetcher(Err(FetchError::Extract));

        let mut chain = PluginChain::new();
        chain.register(Arc::new(ReadPlugin::new(bot.bot.handle(), fetcher.clone())));
        chain.run(&context("perch", "!read https://example.com")).await.expect("chain");

        assert!(fetcher.requested.lock().expect("requested lock").is_empty());
    }
}
