use crate::domain::message::{LogPosition, Message};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// A pub/sub scope. Each user has exactly one room, keyed by their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(Uuid);

impl RoomId {
    #[must_use]
    pub const fn for_user(user_id: Uuid) -> Self {
        Self(user_id)
    }

    #[must_use]
    pub const fn user_id(self) -> Uuid {
        self.0
    }

    /// Pub/sub channel name carrying this room's events.
    #[must_use]
    pub fn channel_name(self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }

    /// Inverse of [`RoomId::channel_name`].
    #[must_use]
    pub fn from_channel_name(channel: &str, prefix: &str) -> Option<Self> {
        channel.strip_prefix(prefix).and_then(|id| Uuid::parse_str(id).ok()).map(Self)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Copy of a freshly stored message carried by a nudge. Not authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&Message> for MessagePreview {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            content: message.content.clone(),
            subject: message.subject.clone(),
            created_at: message.created_at,
        }
    }
}

impl From<MessagePreview> for Message {
    fn from(preview: MessagePreview) -> Self {
        Self {
            id: preview.id,
            sender_id: preview.sender_id,
            recipient_id: preview.recipient_id,
            content: preview.content,
            subject: preview.subject,
            client_message_id: None,
            created_at: preview.created_at,
            read_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    MessageReceived {
        message: MessagePreview,
    },
    /// The viewer read `partner_id`'s messages up to and including `read_through`.
    #[serde(rename_all = "camelCase")]
    ReadStateChanged {
        partner_id: Uuid,
        count: u64,
        read_through: LogPosition,
    },
}

impl RoomEvent {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::ReadStateChanged { .. } => "read_state_changed",
        }
    }
}

/// An event addressed to a room, as it travels over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomNotification {
    pub room: RoomId,
    pub event: RoomEvent,
}
