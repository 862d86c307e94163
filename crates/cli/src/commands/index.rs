use serde::Serialize;
use tracing::warn;

use crate::commands::{block_on, load_config, open_store, retrieval, CommandError, CommandResult};
use perch_core::config::{LoadOptions, MemoryConfig};
use perch_core::retrieval::RetrievalAdapter;
use perch_core::windowing::segment;
use perch_db::Store;

#[derive(Clone, Debug)]
pub struct IndexArgs {
    pub channel: String,
    pub limit: Option<u32>,
    pub reset: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub messages: usize,
    pub windows: usize,
    pub indexed: usize,
    pub total: usize,
}

/// Segments the channel history and writes one vector per window.
/// Windows that fail to embed are logged and counted out of `indexed`.
pub async fn rebuild(
    store: &Store,
    retrieval: &RetrievalAdapter,
    memory: &MemoryConfig,
    args: &IndexArgs,
) -> Result<IndexReport, CommandError> {
    if store.channels.find_by_name(&args.channel).await.map_err(CommandError::persistence)?.is_none() {
        return Err(CommandError::input(format!("channel `{}` does not exist", args.channel)));
    }

    let history =
        store.messages.history(&args.channel, args.limit).await.map_err(CommandError::persistence)?;
    let windows = segment(&history, memory.window_size, memory.overlap_size)
        .map_err(CommandError::config)?;

    if args.reset {
        retrieval.reset(&args.channel).await.map_err(CommandError::retrieval)?;
    }

    let mut indexed = 0;
    for window in &windows {
        match retrieval.index(&args.channel, window).await {
            Ok(()) => indexed += 1,
            Err(error) => warn!(
                event_name = "cli.index.window_failed",
                channel = %args.channel,
                anchor_id = window.anchor_id.0,
                error = %error,
                "window not indexed"
            ),
        }
    }

    let total = retrieval.count(&args.channel).await.map_err(CommandError::retrieval)?;
    Ok(IndexReport { messages: history.len(), windows: windows.len(), indexed, total })
}

pub fn run(options: &LoadOptions, args: IndexArgs) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        let retrieval = retrieval(&config)?;
        block_on(async {
            let (pool, store) = open_store(&config).await?;
            let report = rebuild(&store, &retrieval, &config.memory, &args).await;
            pool.close().await;
            report
        })
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "index",
            format!("indexed {} of {} windows for {}", report.indexed, report.windows, args.channel),
            serde_json::to_value(report).ok(),
        ),
        Err(error) => error.into_result("index"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use perch_core::config::AppConfig;
    use perch_core::domain::entity::NewServer;
    use perch_core::retrieval::{InMemoryVectorIndex, RetrievalAdapter};
    use perch_db::{connect_with_settings, migrations, Store};

    use super::{rebuild, IndexArgs, IndexReport};
    use crate::commands::import_log::import;
    use crate::commands::testing::KeywordEmbedder;

    async fn seeded(lines: usize) -> Store {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let store = Store::sql(pool);
        let log: String = (0..lines).map(|i| format!("[10:{i:02}] <alice> line {i}\n")).collect();
        import(&store, NewServer::new("irc.example.net", 6697, true), "#perch", &log)
            .await
            .expect("import");
        store
    }

    fn args(limit: Option<u32>, reset: bool) -> IndexArgs {
        IndexArgs { channel: "#perch".to_string(), limit, reset }
    }

    #[tokio::test]
    async fn history_is_indexed_in_overlapping_windows() {
        let store = seeded(30).await;
        let retrieval = RetrievalAdapter::new(Arc::new(KeywordEmbedder), Arc::new(InMemoryVectorIndex::new()));
        let memory = AppConfig::default().memory;

        let report = rebuild(&store, &retrieval, &memory, &args(None, false)).await.expect("rebuild");

        // window 12, overlap 3: anchors at 0, 9, 18, 27
        assert_eq!(report, IndexReport { messages: 30, windows: 4, indexed: 4, total: 4 });
    }

    #[tokio::test]
    async fn reset_drops_previous_windows() {
        let store = seeded(30).await;
        let retrieval = RetrievalAdapter::new(Arc::new(KeywordEmbedder), Arc::new(InMemoryVectorIndex::new()));
        let memory = AppConfig::default().memory;
        rebuild(&store, &retrieval, &memory, &args(None, false)).await.expect("full");

        let report = rebuild(&store, &retrieval, &memory, &args(Some(12), true)).await.expect("limited");

        assert_eq!(report, IndexReport { messages: 12, windows: 2, indexed: 2, total: 2 });
    }

    #[tokio::test]
    async fn unknown_channel_is_an_input_error() {
        let store = seeded(1).await;
        let retrieval = RetrievalAdapter::new(Arc::new(KeywordEmbedder), Arc::new(InMemoryVectorIndex::new()));
        let mut request = args(None, false);
        request.channel = "#ghost".to_string();

        let error = rebuild(&store, &retrieval, &AppConfig::default().memory, &request)
            .await
            .expect_err("missing channel");
        assert_eq!(error.exit_code, 6);
    }
}
