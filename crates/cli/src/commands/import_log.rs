use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::commands::{block_on, load_config, open_store, CommandError, CommandResult};
use perch_core::config::LoadOptions;
use perch_core::domain::entity::NewServer;
use perch_core::domain::message::NewMessage;
use perch_core::text::parse_log_line;
use perch_db::{RepositoryError, Store};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// Stores every parseable log line as a public message of `channel`.
/// Senders are created on first sight; a line whose sender, channel and
/// content already exist is counted as a duplicate.
pub async fn import(
    store: &Store,
    server: NewServer,
    channel: &str,
    raw: &str,
) -> Result<ImportReport, RepositoryError> {
    let server = store.servers.find_or_create(server).await?;
    let channel = store.channels.find_or_create(channel, server.id).await?;

    let mut report = ImportReport::default();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        let Some(parsed) = parse_log_line(line) else {
            report.skipped += 1;
            continue;
        };
        let sender = store.users.find_or_create(parsed.nick).await?;
        if store.messages.exists(sender.id, channel.id, parsed.text).await? {
            report.duplicates += 1;
            continue;
        }
        store.messages.save(NewMessage::public(sender.id, channel.id, parsed.text)).await?;
        report.imported += 1;
    }
    Ok(report)
}

pub fn run(options: &LoadOptions, file: &Path, channel: &str) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("could not read log file `{}`", file.display()))
            .map_err(|error| CommandError::input(format!("{error:#}")))?;
        block_on(async {
            let (pool, store) = open_store(&config).await?;
            let server = NewServer::new(&config.server.host, config.server.port, config.server.secure);
            let report = import(&store, server, channel, &raw).await.map_err(CommandError::persistence);
            pool.close().await;
            report
        })
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "import-log",
            format!("imported {} messages into {channel}", report.imported),
            serde_json::to_value(report).ok(),
        ),
        Err(error) => error.into_result("import-log"),
    }
}

#[cfg(test)]
mod tests {
    use perch_core::domain::entity::NewServer;
    use perch_db::{connect_with_settings, migrations, Store};

    use super::{import, ImportReport};

    async fn store() -> Store {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        Store::sql(pool)
    }

    const LOG: &str = "\
[10:00] <alice> anyone up for a picnic?
[10:01] <bob> saturday works
-- day changed --
[10:02] <alice> park by the river

";

    #[tokio::test]
    async fn import_creates_senders_and_skips_noise() {
        let store = store().await;
        let report = import(&store, NewServer::new("irc.example.net", 6697, true), "#perch", LOG)
            .await
            .expect("import");

        assert_eq!(report, ImportReport { imported: 3, duplicates: 0, skipped: 1 });
        assert!(store.users.find_by_name("bob").await.expect("lookup").is_some());
        let history = store.messages.history("#perch", None).await.expect("history");
        let lines: Vec<_> = history.iter().map(|message| message.transcript_line()).collect();
        assert_eq!(
            lines,
            vec!["alice: anyone up for a picnic?", "bob: saturday works", "alice: park by the river"]
        );
    }

    #[tokio::test]
    async fn reimport_counts_duplicates() {
        let store = store().await;
        let server = NewServer::new("irc.example.net", 6697, true);
        import(&store, server.clone(), "#perch", LOG).await.expect("first import");

        let report = import(&store, server, "#perch", LOG).await.expect("second import");

        assert_eq!(report, ImportReport { imported: 0, duplicates: 3, skipped: 1 });
        assert_eq!(store.messages.count().await.expect("count"), 3);
    }
}
