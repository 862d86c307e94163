use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use perch_core::domain::entity::{ChannelId, SummaryId, UserId};
use perch_core::domain::message::{GenericMessage, Message, MessageId, MessageTarget, NewMessage};

use super::{column, generic_message_from_row, timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

const GENERIC_SELECT: &str = "SELECT m.id, s.name AS sender, c.name AS channel, m.content
     FROM message m
     JOIN chat_user s ON s.id = m.sender_id
     JOIN channel c ON c.id = m.channel_id";

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let channel_id: Option<i64> = column(row, "channel_id")?;
    let recipient_id: Option<i64> = column(row, "recipient_id")?;
    let target = match (channel_id, recipient_id) {
        (Some(channel), None) => MessageTarget::Channel(ChannelId(channel)),
        (None, Some(recipient)) => MessageTarget::Recipient(UserId(recipient)),
        _ => {
            return Err(RepositoryError::Decode(
                "message must have exactly one of channel or recipient".to_string(),
            ))
        }
    };
    let summary_id: Option<i64> = column(row, "summary_id")?;

    Ok(Message {
        id: MessageId(column(row, "id")?),
        created_at: timestamp(row, "created_at")?,
        content: column(row, "content")?,
        sender_id: UserId(column(row, "sender_id")?),
        target,
        is_action: column(row, "is_action")?,
        summary_id: summary_id.map(SummaryId),
    })
}

#[async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn save(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO message (content, sender_id, channel_id, recipient_id, is_action, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.content)
        .bind(message.sender_id.0)
        .bind(message.target.channel().map(|id| id.0))
        .bind(message.target.recipient().map(|id| id.0))
        .bind(message.is_action)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: MessageId(result.last_insert_rowid()),
            created_at,
            content: message.content,
            sender_id: message.sender_id,
            target: message.target,
            is_action: message.is_action,
            summary_id: None,
        })
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, content, sender_id, channel_id, recipient_id, is_action, summary_id, created_at
             FROM message WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn exists(
        &self,
        sender_id: UserId,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<bool, RepositoryError> {
        let found = sqlx::query(
            "SELECT 1 FROM message WHERE sender_id = ? AND channel_id = ? AND content = ? LIMIT 1",
        )
        .bind(sender_id.0)
        .bind(channel_id.0)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn recent(&self, channel: &str, limit: u32) -> Result<Vec<GenericMessage>, RepositoryError> {
        let rows = sqlx::query(&format!("{GENERIC_SELECT} WHERE c.name = ? ORDER BY m.id DESC LIMIT ?"))
            .bind(channel)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let mut messages = rows.iter().map(generic_message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn before(
        &self,
        channel: &str,
        anchor: MessageId,
        limit: u32,
    ) -> Result<Vec<GenericMessage>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{GENERIC_SELECT} WHERE c.name = ? AND m.id < ? ORDER BY m.id DESC LIMIT ?"
        ))
        .bind(channel)
        .bind(anchor.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.iter().map(generic_message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn from_anchor(
        &self,
        channel: &str,
        anchor: MessageId,
        limit: u32,
    ) -> Result<Vec<GenericMessage>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{GENERIC_SELECT} WHERE c.name = ? AND m.id >= ? ORDER BY m.id ASC LIMIT ?"
        ))
        .bind(channel)
        .bind(anchor.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(generic_message_from_row).collect()
    }

    async fn history(
        &self,
        channel: &str,
        limit: Option<u32>,
    ) -> Result<Vec<GenericMessage>, RepositoryError> {
        let rows = sqlx::query(&format!("{GENERIC_SELECT} WHERE c.name = ? ORDER BY m.id ASC LIMIT ?"))
            .bind(channel)
            .bind(limit.map_or(-1, i64::from))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(generic_message_from_row).collect()
    }

    async fn unsummarized(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<GenericMessage>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{GENERIC_SELECT} WHERE c.name = ? AND m.summary_id IS NULL ORDER BY m.id ASC LIMIT ?"
        ))
        .bind(channel)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(generic_message_from_row).collect()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM message").fetch_one(&self.pool).await?;
        let count: i64 = column(&row, "count")?;
        Ok(count.max(0) as u64)
    }
}
