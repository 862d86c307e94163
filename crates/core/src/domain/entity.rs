use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SummaryId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub tls: bool,
    pub motd: String,
}

/// Lookup key used to find or provision a server record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewServer {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub tls: bool,
}

impl NewServer {
    pub fn new(hostname: impl Into<String>, port: u16, tls: bool) -> Self {
        let hostname = hostname.into();
        Self { name: Self::display_name(&hostname, port), hostname, port, tls }
    }

    pub fn display_name(hostname: &str, port: u16) -> String {
        format!("Server {hostname}:{port}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub mode: String,
    pub server_id: ServerId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub id: SummaryId,
    pub created_at: DateTime<Utc>,
    pub data: String,
    pub channel_id: Option<ChannelId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub topic: String,
    pub user_id: UserId,
    pub channel_id: ChannelId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeSource {
    Server(ServerId),
    User(UserId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeTarget {
    Channel(ChannelId),
    User(UserId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotice {
    pub content: String,
    pub from: NoticeSource,
    pub to: NoticeTarget,
}

/// The entity an event log row belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSubject {
    Server(ServerId),
    User(UserId),
    Channel(ChannelId),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub subject: EventSubject,
    pub event: serde_json::Value,
}
