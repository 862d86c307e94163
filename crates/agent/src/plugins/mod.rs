//! Built-in plugins and their registration from configuration.

use std::sync::Arc;

use perch_core::config::{MemoryConfig, PluginName};
use perch_core::domain::message::GenericMessage;
use perch_core::errors::ApplicationError;
use perch_core::retrieval::RetrievalAdapter;

use crate::bot::{BotError, ChatBot};
use crate::fetch::DocumentFetcher;

pub mod embed;
pub mod idle;
pub mod mention;
pub mod personality;
pub mod read;
pub mod summarize;

pub use embed::EmbedPlugin;
pub use idle::IdlePlugin;
pub use mention::{MentionPlugin, MentionSettings};
pub use personality::PersonalityPlugin;
pub use read::ReadPlugin;
pub use summarize::SummarizePlugin;

/// Collaborators shared by the built-in plugins.
#[derive(Clone)]
pub struct PluginDeps {
    pub memory: MemoryConfig,
    pub retrieval: Arc<RetrievalAdapter>,
    pub fetcher: Arc<dyn DocumentFetcher>,
}

/// Registers `enabled` plugins on `bot` in the given order. The idle
/// watchdog is started as a background task of the bot.
pub fn install(bot: &mut ChatBot, enabled: &[PluginName], deps: &PluginDeps) -> Result<(), BotError> {
    let handle = bot.handle();
    for name in enabled {
        match name {
            PluginName::Personality => {
                bot.register(Arc::new(PersonalityPlugin::new(handle.clone())));
            }
            PluginName::Mention => {
                let plugin = MentionPlugin::new(handle.clone(), MentionSettings::from(&deps.memory))
                    .with_retrieval(deps.retrieval.clone());
                bot.register(Arc::new(plugin));
            }
            PluginName::Idle => {
                let plugin = Arc::new(IdlePlugin::new(handle.clone(), deps.memory.context_size));
                bot.spawn_background(plugin.clone().watch());
                bot.register(plugin);
            }
            PluginName::Read => {
                bot.register(Arc::new(ReadPlugin::new(handle.clone(), deps.fetcher.clone())));
            }
            PluginName::Embed => {
                let plugin = EmbedPlugin::from_config(deps.retrieval.clone(), &deps.memory)
                    .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
                bot.register(Arc::new(plugin));
            }
            PluginName::Summarize => {
                bot.register(Arc::new(SummarizePlugin::new(handle.clone())));
            }
        }
    }
    Ok(())
}

pub(crate) fn limit(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

pub(crate) fn quoted_log(message: &GenericMessage) -> String {
    format!("{}: \"{}\"", message.sender, message.content)
}
