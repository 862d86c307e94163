use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use perch_core::domain::entity::{
    Channel, ChannelId, EventRecord, EventSubject, NewNotice, NewServer, Server, ServerId,
    Summary, SummaryId, Topic, User, UserId,
};
use perch_core::domain::message::{GenericMessage, Message, MessageId, NewMessage};

pub mod channel;
pub mod event;
pub mod message;
pub mod notice;
pub mod server;
pub mod summary;
pub mod topic;
pub mod user;

pub use channel::SqlChannelRepository;
pub use event::SqlEventRepository;
pub use message::SqlMessageRepository;
pub use notice::SqlNoticeRepository;
pub use server::SqlServerRepository;
pub use summary::SqlSummaryRepository;
pub use topic::SqlTopicRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Server>, RepositoryError>;
    async fn find_or_create(&self, server: NewServer) -> Result<Server, RepositoryError>;
    async fn update_motd(&self, id: ServerId, motd: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<User>, RepositoryError>;
    async fn find_or_create(&self, name: &str) -> Result<User, RepositoryError>;
    /// Renames a user and returns the number of affected rows.
    async fn rename(&self, old_name: &str, new_name: &str) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Channel>, RepositoryError>;
    async fn find_or_create(
        &self,
        name: &str,
        server_id: ServerId,
    ) -> Result<Channel, RepositoryError>;
    async fn set_mode(&self, id: ChannelId, mode: &str) -> Result<(), RepositoryError>;
    async fn add_member(&self, id: ChannelId, user_id: UserId) -> Result<(), RepositoryError>;
    async fn remove_member(&self, id: ChannelId, user_id: UserId) -> Result<(), RepositoryError>;
    async fn members(&self, id: ChannelId) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn save(&self, message: NewMessage) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    async fn exists(
        &self,
        sender_id: UserId,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<bool, RepositoryError>;
    /// The latest `limit` messages of a channel, oldest first.
    async fn recent(&self, channel: &str, limit: u32) -> Result<Vec<GenericMessage>, RepositoryError>;
    /// The latest `limit` channel messages older than `anchor`, oldest first.
    async fn before(
        &self,
        channel: &str,
        anchor: MessageId,
        limit: u32,
    ) -> Result<Vec<GenericMessage>, RepositoryError>;
    /// Up to `limit` channel messages starting at `anchor`, oldest first.
    async fn from_anchor(
        &self,
        channel: &str,
        anchor: MessageId,
        limit: u32,
    ) -> Result<Vec<GenericMessage>, RepositoryError>;
    /// Channel history in id order, optionally capped at `limit` messages.
    async fn history(
        &self,
        channel: &str,
        limit: Option<u32>,
    ) -> Result<Vec<GenericMessage>, RepositoryError>;
    /// The oldest `limit` channel messages not yet linked to a summary.
    async fn unsummarized(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<GenericMessage>, RepositoryError>;
    async fn count(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SummaryRepository: Send + Sync {
    /// Stores a summary and links the given messages to it.
    async fn create(
        &self,
        data: &str,
        channel_id: Option<ChannelId>,
        message_ids: &[MessageId],
    ) -> Result<Summary, RepositoryError>;
    async fn find_by_id(&self, id: SummaryId) -> Result<Option<Summary>, RepositoryError>;
    async fn latest_for_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Summary>, RepositoryError>;
}

#[async_trait]
pub trait NoticeRepository: Send + Sync {
    async fn save(&self, notice: NewNotice) -> Result<i64, RepositoryError>;
    async fn count(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait TopicRepository: Send + Sync {
    async fn exists(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        topic: &str,
    ) -> Result<bool, RepositoryError>;
    async fn save(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        topic: &str,
    ) -> Result<Topic, RepositoryError>;
    async fn latest(&self, channel_id: ChannelId) -> Result<Option<Topic>, RepositoryError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(
        &self,
        subject: EventSubject,
        event: serde_json::Value,
    ) -> Result<EventRecord, RepositoryError>;
    async fn list(&self, subject: EventSubject) -> Result<Vec<EventRecord>, RepositoryError>;
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn generic_message_from_row(row: &SqliteRow) -> Result<GenericMessage, RepositoryError> {
    Ok(GenericMessage {
        id: MessageId(column(row, "id")?),
        sender: column(row, "sender")?,
        channel: column(row, "channel")?,
        content: column(row, "content")?,
    })
}

pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User, RepositoryError> {
    Ok(User { id: UserId(column(row, "id")?), name: column(row, "name")? })
}
