use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use perch_core::config::MemoryConfig;
use perch_core::domain::message::GenericMessage;
use perch_core::plugin::{Next, Plugin, PluginContext, PluginError};
use perch_core::retrieval::RetrievalAdapter;
use perch_core::windowing::{segment, validate_window, WindowingError};

/// Buffers channel messages and indexes them in windows once enough have
/// accumulated.
pub struct EmbedPlugin {
    retrieval: Arc<RetrievalAdapter>,
    buffers: Mutex<HashMap<String, Vec<GenericMessage>>>,
    threshold: usize,
    window_size: usize,
    overlap_size: usize,
}

impl EmbedPlugin {
    pub fn new(
        retrieval: Arc<RetrievalAdapter>,
        threshold: usize,
        window_size: usize,
        overlap_size: usize,
    ) -> Result<Self, WindowingError> {
        validate_window(window_size, overlap_size)?;
        Ok(Self {
            retrieval,
            buffers: Mutex::new(HashMap::new()),
            threshold: threshold.max(1),
            window_size,
            overlap_size,
        })
    }

    pub fn from_config(retrieval: Arc<RetrievalAdapter>, memory: &MemoryConfig) -> Result<Self, WindowingError> {
        Self::new(retrieval, memory.index_threshold, memory.window_size, memory.overlap_size)
    }

    pub async fn buffered(&self, channel: &str) -> usize {
        self.buffers.lock().await.get(channel).map_or(0, Vec::len)
    }

    async fn flush(&self, channel: &str, batch: Vec<GenericMessage>) -> Result<(), WindowingError> {
        let windows = segment(&batch, self.window_size, self.overlap_size)?;
        let mut indexed = 0;
        for window in &windows {
            match self.retrieval.index(channel, window).await {
                Ok(()) => indexed += 1,
                Err(error) => warn!(
                    event_name = "plugin.embed.index_failed",
                    channel,
                    anchor_id = window.anchor_id.0,
                    error = %error,
                    "window not indexed"
                ),
            }
        }
        info!(
            event_name = "plugin.embed.flushed",
            channel,
            messages = batch.len(),
            windows = windows.len(),
            indexed,
            "conversation windows indexed"
        );
        Ok(())
    }
}

#[async_trait]
impl Plugin for EmbedPlugin {
    fn name(&self) -> &'static str {
        "embed"
    }

    async fn process(&self, ctx: &PluginContext, next: Next<'_>) -> Result<(), PluginError> {
        let message = &ctx.message;
        let batch = {
            let mut buffers = self.buffers.lock().await;
            let buffer = buffers.entry(message.channel.clone()).or_default();
            buffer.push(message.clone());
            (buffer.len() >= self.threshold).then(|| std::mem::take(buffer))
        };

        if let Some(batch) = batch {
            if let Err(error) = self.flush(&message.channel, batch).await {
                warn!(event_name = "plugin.embed.segment_failed", error = %error, "buffer dropped");
            }
        }
        next.run(ctx).await
    }
}
