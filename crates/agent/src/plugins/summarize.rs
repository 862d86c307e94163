use async_trait::async_trait;
use tracing::{debug, info, warn};

use perch_core::domain::message::GenericMessage;
use perch_core::errors::ApplicationError;
use perch_core::plugin::{Next, Plugin, PluginContext, PluginError};

use crate::agent::Personality;
use crate::bot::{BotError, BotHandle};
use crate::plugins::limit;

pub const SUMMARY_THRESHOLD: usize = 40;

/// Condenses the unsummarized backlog of a channel into a stored summary.
pub struct SummarizePlugin {
    bot: BotHandle,
    threshold: usize,
}

impl SummarizePlugin {
    pub fn new(bot: BotHandle) -> Self {
        Self::with_threshold(bot, SUMMARY_THRESHOLD)
    }

    pub fn with_threshold(bot: BotHandle, threshold: usize) -> Self {
        Self { bot, threshold: threshold.max(1) }
    }

    async fn summarize(&self, channel: &str) -> Result<(), BotError> {
        let store = self.bot.store();
        let backlog = store.messages.unsummarized(channel, limit(self.threshold)).await?;
        if backlog.len() < self.threshold {
            debug!(event_name = "plugin.summarize.waiting", channel, backlog = backlog.len(), "backlog below threshold");
            return Ok(());
        }

        let transcript =
            backlog.iter().map(GenericMessage::transcript_line).collect::<Vec<_>>().join("\n");
        let lines = ["Summarize the following conversation:".to_string(), transcript];
        let summary = self
            .bot
            .agent_with(Personality::summarizer(self.bot.nick()))
            .query(&lines)
            .await
            .map_err(ApplicationError::from)?;
        let summary = summary.trim();
        if summary.is_empty() {
            warn!(event_name = "plugin.summarize.empty", channel, "model returned an empty summary");
            return Ok(());
        }

        let Some(channel_record) = store.channels.find_by_name(channel).await? else {
            return Err(ApplicationError::not_found("channel", channel).into());
        };
        let ids: Vec<_> = backlog.iter().map(|message| message.id).collect();
        let saved = store.summaries.create(summary, Some(channel_record.id), &ids).await?;
        info!(
            event_name = "plugin.summarize.stored",
            channel,
            summary_id = saved.id.0,
            messages = ids.len(),
            "conversation summarized"
        );
        Ok(())
    }
}

#[async_trait]
impl Plugin for SummarizePlugin {
    fn name(&self) -> &'static str {
        "summarize"
    }

    async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError> {
        if let Err(error) = self.summarize(&ctx.message.channel).await {
            warn!(
                event_name = "plugin.summarize.failed",
                channel = %ctx.message.channel,
                error = %error,
                "summary not stored"
            );
        }
        next.run(ctx).await
    }
}
