use std::sync::Arc;

use tracing::debug;

use crate::llm::{LlmClient, LlmError};

/// A list of character traits prepended to every prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Personality {
    traits: Vec<String>,
}

impl Personality {
    pub fn new<I, S>(traits: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { traits: traits.into_iter().map(Into::into).collect() }
    }

    /// The personality the bot starts with and returns to on reset.
    pub fn default_for(nick: &str, channel: &str) -> Self {
        Self::new([
            format!("Your IRC nickname is {nick}."),
            format!("You hang around an IRC channel named {channel}."),
        ])
    }

    /// Used for unprompted messages after a quiet period.
    pub fn idle(nick: &str, channel: &str) -> Self {
        Self::new([
            format!("Your IRC nickname is {nick}."),
            format!("You hang around an IRC channel named {channel}."),
            "You like to liven up the channel with an offhand remark when it goes quiet.".to_string(),
            "Keep it short, casual and in tune with what was last discussed.".to_string(),
        ])
    }

    pub fn summarizer(nick: &str) -> Self {
        Self::new([
            format!("Your name is {nick}."),
            "You are an expert at summarizing informal chat conversations on platforms like IRC, Discord, or Slack.".to_string(),
            "Your goal is to succinctly summarize the conversation into a coherent and concise narrative that captures the essence of the discussion.".to_string(),
            "Ensure that the summary includes the main ideas and flow of the conversation, making it easy to understand the context for follow-up queries.".to_string(),
        ])
    }

    pub fn traits(&self) -> &[String] {
        &self.traits
    }

    pub fn push(&mut self, value: impl Into<String>) {
        self.traits.push(value.into());
    }

    pub fn format(&self, prompt: &str) -> String {
        format!("{}\n{prompt}", self.traits.join("\n"))
    }
}

/// A model paired with an optional personality.
#[derive(Clone)]
pub struct LlmAgent {
    model: Arc<dyn LlmClient>,
    personality: Option<Personality>,
}

impl LlmAgent {
    pub fn new(model: Arc<dyn LlmClient>) -> Self {
        Self { model, personality: None }
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = Some(personality);
        self
    }

    pub fn model(&self) -> &Arc<dyn LlmClient> {
        &self.model
    }

    /// Joins `lines` into one prompt, applies the personality and invokes
    /// the model once.
    pub async fn query<S: AsRef<str>>(&self, lines: &[S]) -> Result<String, LlmError> {
        let prompt = lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
        let prompt = match &self.personality {
            Some(personality) => personality.format(&prompt),
            None => prompt,
        };

        debug!(
            event_name = "llm.query.started",
            model = %self.model.describe(),
            prompt_chars = prompt.len(),
            "querying model"
        );
        self.model.invoke(&prompt).await
    }
}
