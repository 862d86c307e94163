use serde::Serialize;

use crate::commands::{block_on, load_config, open_store, retrieval, CommandError, CommandResult};
use perch_core::config::{LoadOptions, MemoryConfig};
use perch_core::domain::message::MessageId;
use perch_core::retrieval::RetrievalAdapter;
use perch_db::Store;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Hit {
    pub anchor_id: MessageId,
    pub distance: Option<f32>,
    pub messages: Vec<String>,
}

/// Retrieves the `k` closest windows and expands each anchor back into the
/// transcript lines of its window.
pub async fn search(
    store: &Store,
    retrieval: &RetrievalAdapter,
    memory: &MemoryConfig,
    channel: &str,
    text: &str,
    k: usize,
) -> Result<Vec<Hit>, CommandError> {
    if text.trim().is_empty() {
        return Err(CommandError::input("query text is empty"));
    }

    let results = retrieval.query(channel, text, k).await.map_err(CommandError::retrieval)?;
    let window = u32::try_from(memory.window_size).unwrap_or(u32::MAX);

    let mut hits = Vec::with_capacity(results.len());
    for result in results {
        let messages = store
            .messages
            .from_anchor(channel, result.id, window)
            .await
            .map_err(CommandError::persistence)?;
        hits.push(Hit {
            anchor_id: result.id,
            distance: result.distance,
            messages: messages.iter().map(|message| message.transcript_line()).collect(),
        });
    }
    Ok(hits)
}

pub fn run(options: &LoadOptions, channel: &str, text: &str, k: Option<usize>) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        let retrieval = retrieval(&config)?;
        let k = k.unwrap_or(config.memory.retrieval_k);
        block_on(async {
            let (pool, store) = open_store(&config).await?;
            let hits = search(&store, &retrieval, &config.memory, channel, text, k).await;
            pool.close().await;
            hits
        })
    });

    match result {
        Ok(hits) => CommandResult::success_with(
            "query",
            format!("{} related windows in {channel}", hits.len()),
            serde_json::to_value(&hits).ok(),
        ),
        Err(error) => error.into_result("query"),
    }
}
