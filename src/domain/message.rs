use crate::config::MessagingConfig;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A directed message as stored in the durable log.
///
/// Every field is fixed at insert time except `read_at`, which moves from
/// `None` to `Some` at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub subject: Option<String>,
    pub client_message_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub read_at: Option<OffsetDateTime>,
}

impl Message {
    #[must_use]
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }

    /// The other participant from `viewer_id`'s side.
    #[must_use]
    pub fn partner_of(&self, viewer_id: Uuid) -> Uuid {
        if self.sender_id == viewer_id { self.recipient_id } else { self.sender_id }
    }

    #[must_use]
    pub fn is_unread_by(&self, viewer_id: Uuid) -> bool {
        self.recipient_id == viewer_id && self.read_at.is_none()
    }

    #[must_use]
    pub const fn order_key(&self) -> LogPosition {
        LogPosition { created_at: self.created_at, id: self.id }
    }
}

/// A row's place in the log. Orders by `created_at`, then `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPosition {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub id: Uuid,
}

/// Outcome of marking a thread read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadMark {
    pub count: u64,
    /// Newest row that flipped. `None` when nothing did.
    pub through: Option<LogPosition>,
}

impl ReadMark {
    /// Folds a flipped row into the mark.
    pub fn record(&mut self, position: LogPosition) {
        self.count += 1;
        self.through = self.through.max(Some(position));
    }
}

/// A validated message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub subject: Option<String>,
    pub client_message_id: Option<Uuid>,
}

impl NewMessage {
    /// Validates a draft and assigns it a time-ordered id.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if the content is blank, a length limit is
    /// exceeded, or the sender addresses themselves.
    pub fn new(
        sender_id: Uuid,
        recipient_id: Uuid,
        content: String,
        subject: Option<String>,
        client_message_id: Option<Uuid>,
        limits: &MessagingConfig,
    ) -> Result<Self> {
        if sender_id == recipient_id {
            return Err(AppError::Validation("Cannot send a message to yourself".to_string()));
        }
        if content.trim().is_empty() {
            return Err(AppError::Validation("Message content must not be empty".to_string()));
        }
        if content.chars().count() > limits.max_content_len {
            return Err(AppError::Validation(format!(
                "Message content exceeds {} characters",
                limits.max_content_len
            )));
        }

        // Blank subjects are stored as absent.
        let subject = subject.filter(|s| !s.trim().is_empty());
        if let Some(s) = &subject
            && s.chars().count() > limits.max_subject_len
        {
            return Err(AppError::Validation(format!("Subject exceeds {} characters", limits.max_subject_len)));
        }

        Ok(Self { id: Uuid::now_v7(), sender_id, recipient_id, content, subject, client_message_id })
    }
}

/// Result of an append: either a fresh row or the row an earlier send with the
/// same client message id already wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    Inserted(Message),
    Existing(Message),
}

impl Appended {
    #[must_use]
    pub const fn message(&self) -> &Message {
        match self {
            Self::Inserted(m) | Self::Existing(m) => m,
        }
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Inserted(m) | Self::Existing(m) => m,
        }
    }

    #[must_use]
    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}
