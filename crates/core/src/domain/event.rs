use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Registered,
    Ping,
    Pong,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Registered => "registered",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// An inbound event as delivered by the chat transport. Actors are raw
/// nicknames or channel names; resolving them to records happens later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    PublicMessage { sender: String, channel: String, content: String },
    PrivateMessage { sender: String, recipient: String, content: String },
    Action { sender: String, channel: String, content: String },
    Join { channel: String, nick: String },
    Part { channel: String, nick: String, reason: Option<String> },
    Names { channel: String, nicks: Vec<String> },
    Topic { channel: String, topic: String, set_by: String },
    ChannelMode { channel: String, mode: String },
    UserMode { channel: String, by: String, mode: String, target: Option<String>, added: bool },
    NickChange { old_nick: String, new_nick: String },
    Notice { from: Option<String>, to: String, content: String },
    Motd { motd: String },
    Kick { channel: String, nick: String, by: String, reason: Option<String> },
    Invite { channel: String, from: String, to: String },
    Quit { nick: String, reason: Option<String>, channels: Vec<String> },
    Connection { status: ConnectionStatus },
    Error { message: String, network: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventKind {
    Message,
    PrivateMessage,
    Action,
    Join,
    Part,
    Names,
    Topic,
    ChannelMode,
    UserMode,
    NickChange,
    Notice,
    Motd,
    Kick,
    Invite,
    Quit,
    Connection,
    Error,
}

impl ChatEventKind {
    pub const ALL: [ChatEventKind; 17] = [
        Self::Message,
        Self::PrivateMessage,
        Self::Action,
        Self::Join,
        Self::Part,
        Self::Names,
        Self::Topic,
        Self::ChannelMode,
        Self::UserMode,
        Self::NickChange,
        Self::Notice,
        Self::Motd,
        Self::Kick,
        Self::Invite,
        Self::Quit,
        Self::Connection,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::PrivateMessage => "private_message",
            Self::Action => "action",
            Self::Join => "join",
            Self::Part => "part",
            Self::Names => "names",
            Self::Topic => "topic",
            Self::ChannelMode => "channel_mode",
            Self::UserMode => "user_mode",
            Self::NickChange => "nick_change",
            Self::Notice => "notice",
            Self::Motd => "motd",
            Self::Kick => "kick",
            Self::Invite => "invite",
            Self::Quit => "quit",
            Self::Connection => "connection",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl ChatEvent {
    pub fn kind(&self) -> ChatEventKind {
        match self {
            Self::PublicMessage { .. } => ChatEventKind::Message,
            Self::PrivateMessage { .. } => ChatEventKind::PrivateMessage,
            Self::Action { .. } => ChatEventKind::Action,
            Self::Join { .. } => ChatEventKind::Join,
            Self::Part { .. } => ChatEventKind::Part,
            Self::Names { .. } => ChatEventKind::Names,
            Self::Topic { .. } => ChatEventKind::Topic,
            Self::ChannelMode { .. } => ChatEventKind::ChannelMode,
            Self::UserMode { .. } => ChatEventKind::UserMode,
            Self::NickChange { .. } => ChatEventKind::NickChange,
            Self::Notice { .. } => ChatEventKind::Notice,
            Self::Motd { .. } => ChatEventKind::Motd,
            Self::Kick { .. } => ChatEventKind::Kick,
            Self::Invite { .. } => ChatEventKind::Invite,
            Self::Quit { .. } => ChatEventKind::Quit,
            Self::Connection { .. } => ChatEventKind::Connection,
            Self::Error { .. } => ChatEventKind::Error,
        }
    }

    /// Event payload as stored in the per-entity event log.
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Extracts the nickname from a `nick!user@host` mask. A bare nickname is
/// returned unchanged.
pub fn nick_from_mask(mask: &str) -> Option<&str> {
    let nick = mask.split('!').next()?.trim();
    (!nick.is_empty()).then_some(nick)
}
