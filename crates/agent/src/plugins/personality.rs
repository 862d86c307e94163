use async_trait::async_trait;
use tracing::{error, info, warn};

use perch_core::domain::message::MessageKind;
use perch_core::plugin::{Next, Plugin, PluginContext, PluginError};

use crate::agent::Personality;
use crate::bot::BotHandle;

const HELP: &str = "Available commands:\n\
!personality show - Show the current personality\n\
!personality add <text> - Add a trait to the current personality\n\
!personality set <text> - Replace the personality with a single trait\n\
!personality reset - Restore the default personality\n\
!personality help - Show this help message";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Command<'a> {
    Show,
    Add(&'a str),
    Set(&'a str),
    Reset,
    Help,
    Unknown(&'a str),
}

fn parse(content: &str) -> Option<Command<'_>> {
    let rest = content.strip_prefix("!personality")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let rest = rest.trim();
    let (subcommand, argument) = match rest.split_once(char::is_whitespace) {
        Some((subcommand, argument)) => (subcommand, argument.trim()),
        None => (rest, ""),
    };
    if subcommand.is_empty() {
        return None;
    }

    Some(match (subcommand, argument) {
        ("show", _) => Command::Show,
        ("reset", _) => Command::Reset,
        ("help", _) => Command::Help,
        ("add", text) if !text.is_empty() => Command::Add(text),
        ("set", text) if !text.is_empty() => Command::Set(text),
        (other, _) => Command::Unknown(other),
    })
}

/// `!personality` chat commands.
pub struct PersonalityPlugin {
    bot: BotHandle,
}

impl PersonalityPlugin {
    pub fn new(bot: BotHandle) -> Self {
        Self { bot }
    }

    async fn reply(&self, sender: &str, content: &str) {
        if let Err(error) = self.bot.send(MessageKind::Private, sender, content).await {
            warn!(event_name = "plugin.personality.reply_failed", sender, error = %error, "could not reply");
        }
    }

    async fn execute(&self, sender: &str, command: Command<'_>) {
        match command {
            Command::Show => {
                let personality = self.bot.personality().await;
                let reply =
                    format!("This is my current personality:\n{}", personality.traits().join("\n"));
                self.reply(sender, &reply).await;
            }
            Command::Add(text) => {
                self.bot.update_personality(|personality| personality.push(text)).await;
                info!(event_name = "plugin.personality.updated", sender, action = "add", "personality trait added");
            }
            Command::Set(text) => {
                self.bot
                    .update_personality(|personality| *personality = Personality::new([text]))
                    .await;
                info!(event_name = "plugin.personality.updated", sender, action = "set", "personality replaced");
            }
            Command::Reset => {
                let default = Personality::default_for(self.bot.nick(), self.bot.channel());
                self.bot.update_personality(|personality| *personality = default).await;
                info!(event_name = "plugin.personality.updated", sender, action = "reset", "personality reset");
            }
            Command::Help => self.reply(sender, HELP).await,
            Command::Unknown(subcommand) => {
                error!(
                    event_name = "plugin.personality.unknown_command",
                    sender,
                    subcommand,
                    "unknown personality command"
                );
            }
        }
    }
}

#[async_trait]
impl Plugin for PersonalityPlugin {
    fn name(&self) -> &'static str {
        "personality"
    }

    async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError> {
        let message = &ctx.message;
        if message.sender != self.bot.nick() {
            if let Some(command) = parse(&message.content) {
                self.execute(&message.sender, command).await;
            }
        }
        next.run(ctx).await
    }
}
