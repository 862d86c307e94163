use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use perch_core::config::MemoryConfig;
use perch_core::domain::message::{GenericMessage, MessageKind};
use perch_core::errors::ApplicationError;
use perch_core::plugin::{Next, Plugin, PluginContext, PluginError};
use perch_core::retrieval::RetrievalAdapter;
use perch_core::text::{clean_reply, mentions};

use crate::bot::{BotError, BotHandle};
use crate::plugins::{limit, quoted_log};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MentionSettings {
    pub context_size: usize,
    pub window_size: usize,
    pub retrieval_k: usize,
}

impl From<&MemoryConfig> for MentionSettings {
    fn from(memory: &MemoryConfig) -> Self {
        Self {
            context_size: memory.context_size,
            window_size: memory.window_size,
            retrieval_k: memory.retrieval_k,
        }
    }
}

impl Default for MentionSettings {
    fn default() -> Self {
        Self { context_size: 16, window_size: 12, retrieval_k: 3 }
    }
}

/// Answers messages that mention the bot, using the recent channel log and
/// any related windows found in semantic memory.
pub struct MentionPlugin {
    bot: BotHandle,
    retrieval: Option<Arc<RetrievalAdapter>>,
    settings: MentionSettings,
}

impl MentionPlugin {
    pub fn new(bot: BotHandle, settings: MentionSettings) -> Self {
        Self { bot, retrieval: None, settings }
    }

    pub fn with_retrieval(mut self, retrieval: Arc<RetrievalAdapter>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Top anchors expanded into message windows. Memory is optional:
    /// failures are logged and the reply goes ahead without it.
    async fn remember(&self, message: &GenericMessage) -> Vec<Vec<GenericMessage>> {
        let Some(retrieval) = &self.retrieval else {
            return Vec::new();
        };

        let anchors = match retrieval.query(&message.channel, &message.content, self.settings.retrieval_k).await {
            Ok(anchors) => anchors,
            Err(error) => {
                warn!(
                    event_name = "plugin.mention.retrieval_failed",
                    channel = %message.channel,
                    error = %error,
                    "semantic memory unavailable"
                );
                return Vec::new();
            }
        };

        let mut seen = BTreeSet::new();
        let mut windows = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            if !seen.insert(anchor.id) {
                continue;
            }
            match self
                .bot
                .store()
                .messages
                .from_anchor(&message.channel, anchor.id, limit(self.settings.window_size))
                .await
            {
                Ok(window) if !window.is_empty() => windows.push(window),
                Ok(_) => {}
                Err(error) => warn!(
                    event_name = "plugin.mention.expand_failed",
                    anchor_id = anchor.id.0,
                    error = %error,
                    "could not expand memory window"
                ),
            }
        }
        windows
    }

    async fn prompt(&self, message: &GenericMessage) -> Result<Vec<String>, BotError> {
        let nick = self.bot.nick();
        let logs = self
            .bot
            .store()
            .messages
            .before(&message.channel, message.id, limit(self.settings.context_size))
            .await?;
        let memories = self.remember(message).await;

        let mut lines = vec!["### Your Personality".to_string()];
        lines.extend(self.bot.personality().await.traits().iter().cloned());
        lines.push(String::new());

        lines.push("### IRC Logs".to_string());
        lines.extend(logs.iter().map(quoted_log));
        lines.push(String::new());

        if !memories.is_empty() {
            lines.push("### Related Memories".to_string());
            for window in &memories {
                lines.extend(window.iter().map(quoted_log));
                lines.push(String::new());
            }
        }

        lines.push("### Mention".to_string());
        lines.push(format!(
            "User {} mentioned you in the following message: \"{}\"",
            message.sender, message.content
        ));
        lines.push(String::new());

        lines.push("### Instructions".to_string());
        lines.extend([
            format!("You are {nick}."),
            format!("Respond directly to the mention by {} with a short, coherent message.", message.sender),
            "Use information from the conversation logs **if** it is relevant to the mention.".to_string(),
            "Focus primarily on addressing the mention, but you may reference the previous conversation if it helps make your response more relevant or coherent.".to_string(),
            "Keep your response concise and aligned with the tone of the ongoing conversation and your personality.".to_string(),
            "Try not to answer the mention with a question.".to_string(),
        ]);

        debug!(
            event_name = "plugin.mention.prompt_built",
            context = logs.len(),
            memories = memories.len(),
            "mention prompt assembled"
        );
        Ok(lines)
    }

    async fn respond(&self, message: &GenericMessage) -> Result<(), BotError> {
        let lines = self.prompt(message).await?;
        let reply = self.bot.agent().query(&lines).await.map_err(ApplicationError::from)?;
        let reply = clean_reply(&reply, self.bot.nick());
        if reply.is_empty() {
            warn!(event_name = "plugin.mention.empty_reply", sender = %message.sender, "model returned nothing usable");
            return Ok(());
        }

        self.bot.send(MessageKind::Public, &message.channel, &reply).await?;
        info!(
            event_name = "plugin.mention.replied",
            channel = %message.channel,
            sender = %message.sender,
            "answered mention"
        );
        Ok(())
    }
}

#[async_trait]
impl Plugin for MentionPlugin {
    fn name(&self) -> &'static str {
        "mention"
    }

    async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError> {
        let message = &ctx.message;
        let nick = self.bot.nick();
        if message.sender != nick && mentions(&message.content, nick) {
            if let Err(error) = self.respond(message).await {
                warn!(
                    event_name = "plugin.mention.failed",
                    message_id = message.id.0,
                    error = %error,
                    "mention left unanswered"
                );
            }
        }
        next.run(ctx).await
    }
}
