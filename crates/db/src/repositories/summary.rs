use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use perch_core::domain::entity::{ChannelId, Summary, SummaryId};
use perch_core::domain::message::MessageId;

use super::{column, timestamp, RepositoryError, SummaryRepository};
use crate::DbPool;

pub struct SqlSummaryRepository {
    pool: DbPool,
}

impl SqlSummaryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<Summary, RepositoryError> {
    let channel_id: Option<i64> = column(row, "channel_id")?;
    Ok(Summary {
        id: SummaryId(column(row, "id")?),
        created_at: timestamp(row, "created_at")?,
        data: column(row, "data")?,
        channel_id: channel_id.map(ChannelId),
    })
}

#[async_trait]
impl SummaryRepository for SqlSummaryRepository {
    async fn create(
        &self,
        data: &str,
        channel_id: Option<ChannelId>,
        message_ids: &[MessageId],
    ) -> Result<Summary, RepositoryError> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("INSERT INTO summary (data, channel_id, created_at) VALUES (?, ?, ?)")
                .bind(data)
                .bind(channel_id.map(|id| id.0))
                .bind(created_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
        let id = SummaryId(result.last_insert_rowid());

        for message_id in message_ids {
            sqlx::query("UPDATE message SET summary_id = ? WHERE id = ?")
                .bind(id.0)
                .bind(message_id.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Summary { id, created_at, data: data.to_string(), channel_id })
    }

    async fn find_by_id(&self, id: SummaryId) -> Result<Option<Summary>, RepositoryError> {
        let row = sqlx::query("SELECT id, data, channel_id, created_at FROM summary WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(summary_from_row).transpose()
    }

    async fn latest_for_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Summary>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, data, channel_id, created_at FROM summary
             WHERE channel_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(channel_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(summary_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use perch_core::domain::entity::NewServer;
    use perch_core::domain::message::NewMessage;

    use super::SqlSummaryRepository;
    use crate::repositories::{
        ChannelRepository, MessageRepository, ServerRepository, SqlChannelRepository,
        SqlMessageRepository, SqlServerRepository, SqlUserRepository, SummaryRepository,
        UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn summary_links_messages_and_removes_them_from_backlog() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let server = SqlServerRepository::new(pool.clone())
            .find_or_create(NewServer::new("irc", 6667, false))
            .await
            .expect("server");
        let channel = SqlChannelRepository::new(pool.clone())
            .find_or_create("#perch", server.id)
            .await
            .expect("channel");
        let alice = SqlUserRepository::new(pool.clone()).find_or_create("alice").await.expect("user");

        let messages = SqlMessageRepository::new(pool.clone());
        for index in 0..5 {
            messages
                .save(NewMessage::public(alice.id, channel.id, format!("m{index}")))
                .await
                .expect("save");
        }

        let backlog = messages.unsummarized("#perch", 3).await.expect("backlog");
        let ids: Vec<_> = backlog.iter().map(|m| m.id).collect();

        let summaries = SqlSummaryRepository::new(pool.clone());
        let summary = summaries
            .create("alice counted to two", Some(channel.id), &ids)
            .await
            .expect("create");

        let remaining = messages.unsummarized("#perch", 10).await.expect("remaining");
        let contents: Vec<&str> = remaining.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        let linked = messages.find_by_id(ids[0]).await.expect("find").expect("exists");
        assert_eq!(linked.summary_id, Some(summary.id));

        let latest = summaries.latest_for_channel(channel.id).await.expect("latest");
        assert_eq!(latest.map(|s| s.data), Some("alice counted to two".to_string()));
    }
}
