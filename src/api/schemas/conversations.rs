use crate::api::schemas::messaging::MessageView;
use crate::domain::conversation::ConversationSummary;
use crate::services::conversation_service::OpenedThread;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub partner_id: Uuid,
    pub last_message: String,
    pub last_message_id: Uuid,
    pub last_sender_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_time: OffsetDateTime,
    pub unread_count: u64,
}

impl From<ConversationSummary> for ConversationView {
    fn from(summary: ConversationSummary) -> Self {
        Self {
            partner_id: summary.partner_id,
            last_message: summary.last_message,
            last_message_id: summary.last_message_id,
            last_sender_id: summary.last_sender_id,
            last_message_time: summary.last_message_time,
            unread_count: summary.unread_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationList {
    pub conversations: Vec<ConversationView>,
    pub total_unread: u64,
}

impl From<Vec<ConversationSummary>> for ConversationList {
    fn from(summaries: Vec<ConversationSummary>) -> Self {
        let total_unread = summaries.iter().map(|s| s.unread_count).sum();
        Self { conversations: summaries.into_iter().map(Into::into).collect(), total_unread }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadView {
    pub partner_id: Uuid,
    pub messages: Vec<MessageView>,
    /// Rows this request flipped from unread to read.
    pub marked: u64,
}

impl ThreadView {
    #[must_use]
    pub fn new(partner_id: Uuid, thread: OpenedThread) -> Self {
        Self { partner_id, messages: thread.messages.into_iter().map(Into::into).collect(), marked: thread.marked }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub marked: u64,
}
