use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use perch_core::domain::message::MessageKind;
use perch_core::errors::ApplicationError;
use perch_core::plugin::{Next, Plugin, PluginContext, PluginError};
use perch_core::text::clean_reply;

use crate::agent::Personality;
use crate::bot::{BotError, BotHandle};
use crate::plugins::{limit, quoted_log};

pub const IDLE_THRESHOLD: Duration = Duration::from_secs(4 * 60 * 60);
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Breaks long silences with an unprompted message.
pub struct IdlePlugin {
    bot: BotHandle,
    last_activity: Mutex<Instant>,
    threshold: Duration,
    check_every: Duration,
    context_size: usize,
}

impl IdlePlugin {
    pub fn new(bot: BotHandle, context_size: usize) -> Self {
        Self::with_timing(bot, context_size, IDLE_THRESHOLD, CHECK_INTERVAL)
    }

    pub fn with_timing(bot: BotHandle, context_size: usize, threshold: Duration, check_every: Duration) -> Self {
        Self { bot, last_activity: Mutex::new(Instant::now()), threshold, check_every, context_size }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }

    /// Checks for silence every `check_every` and, once the threshold has
    /// passed, queues one interaction behind any pending plugin runs.
    pub async fn watch(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.check_every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let idle_for = self.idle_for();
            if idle_for < self.threshold {
                continue;
            }

            self.touch();
            info!(event_name = "plugin.idle.triggered", idle_secs = idle_for.as_secs(), "channel went quiet");
            let plugin = self.clone();
            if let Err(error) = self.bot.enqueue("idle", async move { plugin.interact().await }) {
                warn!(event_name = "plugin.idle.enqueue_failed", error = %error, "watchdog stopping");
                return;
            }
        }
    }

    async fn interact(&self) -> Result<(), BotError> {
        let channel = self.bot.channel();
        let logs = self.bot.store().messages.recent(channel, limit(self.context_size)).await?;

        let mut lines = vec!["### IRC Logs".to_string()];
        lines.extend(logs.iter().map(quoted_log));
        lines.push(String::new());
        lines.push("### Instructions".to_string());
        lines.push("Given that there hasn't been any new messages in the last period, craft a message.".to_string());

        let personality = Personality::idle(self.bot.nick(), channel);
        let reply = self.bot.agent_with(personality).query(&lines).await.map_err(ApplicationError::from)?;
        let reply = clean_reply(&reply, self.bot.nick());
        if reply.is_empty() {
            debug!(event_name = "plugin.idle.empty_reply", "nothing to say");
            return Ok(());
        }
        self.bot.send(MessageKind::Public, channel, &reply).await
    }
}

#[async_trait]
impl Plugin for IdlePlugin {
    fn name(&self) -> &'static str {
        "idle"
    }

    async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError> {
        self.touch();
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use perch_core::domain::message::{GenericMessage, MessageId, MessageKind};
    use perch_core::plugin::{PluginChain, PluginContext};

    use super::IdlePlugin;
    use crate::testing::{join, public, ScriptedModel, TestBot};

    #[tokio::test]
    async fn silence_triggers_one_message_in_the_home_channel() {
        let model = ScriptedModel::replying(["So, anyone tried the new release?"]);
        let bot = TestBot::new(model.clone()).await;
        bot.client.emit(join("#perch", "alice")).await;
        bot.client.emit(public("alice", "#perch", "release notes are out")).await;

        let plugin = Arc::new(IdlePlugin::with_timing(
            bot.bot.handle(),
            16,
            Duration::from_millis(50),
            Duration::from_millis(10),
        ));
        let watcher = tokio::spawn(plugin.clone().watch());

        for _ in 0..100 {
            if !bot.client.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        watcher.abort();

        let sent = bot.client.sent();
        assert_eq!(sent[0].kind, MessageKind::Public);
        assert_eq!(sent[0].target, "#perch");
        assert_eq!(sent[0].content, "So, anyone tried the new release?");

        let prompt = &model.prompts()[0];
        assert!(prompt.contains("You like to liven up the channel"));
        assert!(prompt.contains("### IRC Logs\nalice: \"release notes are out\"\n"));
        assert!(prompt.ends_with("craft a message."));
    }

    #[tokio::test]
    async fn activity_resets_the_clock() {
        let model = ScriptedModel::replying(["unused"]);
        let bot = TestBot::new(model.clone()).await;
        let plugin = Arc::new(IdlePlugin::with_timing(
            bot.bot.handle(),
            16,
            Duration::from_millis(200),
            Duration::from_millis(10),
        ));
        let mut chain = PluginChain::new();
        chain.register(plugin.clone());
        let watcher = tokio::spawn(plugin.clone().watch());

        let ctx = PluginContext {
            message: GenericMessage {
                id: MessageId(1),
                sender: "alice".to_string(),
                channel: "#perch".to_string(),
                content: "still here".to_string(),
            },
        };
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            chain.run(&ctx).await.expect("chain");
        }
        watcher.abort();

        assert!(model.prompts().is_empty());
        assert!(plugin.idle_for() < Duration::from_millis(200));
    }
}
