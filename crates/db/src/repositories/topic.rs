use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use perch_core::domain::entity::{ChannelId, Topic, UserId};

use super::{column, timestamp, RepositoryError, TopicRepository};
use crate::DbPool;

pub struct SqlTopicRepository {
    pool: DbPool,
}

impl SqlTopicRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn topic_from_row(row: &SqliteRow) -> Result<Topic, RepositoryError> {
    Ok(Topic {
        id: column(row, "id")?,
        created_at: timestamp(row, "created_at")?,
        topic: column(row, "topic")?,
        user_id: UserId(column(row, "user_id")?),
        channel_id: ChannelId(column(row, "channel_id")?),
    })
}

#[async_trait]
impl TopicRepository for SqlTopicRepository {
    async fn exists(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        topic: &str,
    ) -> Result<bool, RepositoryError> {
        let found = sqlx::query(
            "SELECT 1 FROM topic WHERE channel_id = ? AND user_id = ? AND topic = ? LIMIT 1",
        )
        .bind(channel_id.0)
        .bind(user_id.0)
        .bind(topic)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn save(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        topic: &str,
    ) -> Result<Topic, RepositoryError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO topic (topic, user_id, channel_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(topic)
        .bind(user_id.0)
        .bind(channel_id.0)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Topic {
            id: result.last_insert_rowid(),
            created_at,
            topic: topic.to_string(),
            user_id,
            channel_id,
        })
    }

    async fn latest(&self, channel_id: ChannelId) -> Result<Option<Topic>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, topic, user_id, channel_id, created_at FROM topic
             WHERE channel_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(channel_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(topic_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use perch_core::domain::entity::NewServer;

    use super::SqlTopicRepository;
    use crate::repositories::{
        ChannelRepository, ServerRepository, SqlChannelRepository, SqlServerRepository,
        SqlUserRepository, TopicRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn latest_topic_wins_and_exists_detects_repeats() {
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
        let op = SqlUserRepository::new(pool.clone()).find_or_create("op").await.expect("user");

        let topics = SqlTopicRepository::new(pool.clone());
        topics.save(channel.id, op.id, "welcome").await.expect("first");
        topics.save(channel.id, op.id, "release day").await.expect("second");

        assert!(topics.exists(channel.id, op.id, "welcome").await.expect("exists"));
        assert!(!topics.exists(channel.id, op.id, "never set").await.expect("exists"));
        let latest = topics.latest(channel.id).await.expect("latest").expect("some");
        assert_eq!(latest.topic, "release day");
    }
}
