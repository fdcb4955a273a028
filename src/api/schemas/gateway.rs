use crate::api::schemas::conversations::ConversationView;
use crate::domain::room::MessagePreview;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// Text frames pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Full conversation list. Sent on connect, on request and after the session lagged.
    #[serde(rename_all = "camelCase")]
    Snapshot { conversations: Vec<ConversationView>, total_unread: u64 },
    #[serde(rename_all = "camelCase")]
    MessageReceived { message: MessagePreview, conversation: Option<ConversationView>, total_unread: u64 },
    #[serde(rename_all = "camelCase")]
    ReadStateChanged { partner_id: Uuid, count: u64, total_unread: u64 },
}

/// Text frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// The client closed a thread view; mark it read in the background.
    #[serde(rename_all = "camelCase")]
    MarkRead { partner_id: Uuid },
    /// Ask for a fresh snapshot.
    Resync,
}
