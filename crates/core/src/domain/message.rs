use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::{ChannelId, SummaryId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

/// Where a message was delivered. Exactly one of channel or recipient is
/// ever set, so the invariant is carried by the type itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTarget {
    Channel(ChannelId),
    Recipient(UserId),
}

impl MessageTarget {
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Self::Channel(id) => Some(*id),
            Self::Recipient(_) => None,
        }
    }

    pub fn recipient(&self) -> Option<UserId> {
        match self {
            Self::Recipient(id) => Some(*id),
            Self::Channel(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub is_action: bool,
    pub summary_id: Option<SummaryId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub is_action: bool,
}

impl NewMessage {
    pub fn public(sender_id: UserId, channel_id: ChannelId, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_id,
            target: MessageTarget::Channel(channel_id),
            is_action: false,
        }
    }

    pub fn private(sender_id: UserId, recipient_id: UserId, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_id,
            target: MessageTarget::Recipient(recipient_id),
            is_action: false,
        }
    }

    pub fn action(sender_id: UserId, channel_id: ChannelId, content: impl Into<String>) -> Self {
        Self { is_action: true, ..Self::public(sender_id, channel_id, content) }
    }
}

/// The projection of a persisted message that plugins see.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericMessage {
    pub id: MessageId,
    pub sender: String,
    pub channel: String,
    pub content: String,
}

impl GenericMessage {
    /// Renders the message as a `sender: content` transcript line.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.sender, self.content)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Public,
    Private,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::entity::{ChannelId, UserId};

    use super::{GenericMessage, MessageId, MessageTarget, NewMessage};

    #[test]
    fn public_and_private_messages_set_exactly_one_target() {
        let public = NewMessage::public(UserId(1), ChannelId(7), "hello");
        assert_eq!(public.target.channel(), Some(ChannelId(7)));
        assert_eq!(public.target.recipient(), None);

        let private = NewMessage::private(UserId(1), UserId(2), "psst");
        assert_eq!(private.target.channel(), None);
        assert_eq!(private.target.recipient(), Some(UserId(2)));
    }

    #[test]
    fn action_messages_are_public_and_flagged() {
        let action = NewMessage::action(UserId(3), ChannelId(4), "waves");
        assert!(action.is_action);
        assert_eq!(action.target, MessageTarget::Channel(ChannelId(4)));
    }

    #[test]
    fn transcript_line_prefixes_sender() {
        let message = GenericMessage {
            id: MessageId(10),
            sender: "alice".to_string(),
            channel: "#perch".to_string(),
            content: "morning".to_string(),
        };
        assert_eq!(message.transcript_line(), "alice: morning");
    }
}
