use crate::domain::conversation::{ConversationIndex, ConversationSummary, aggregate};
use crate::domain::message::Message;
use crate::error::Result;
use crate::services::message_service::MessageService;
use crate::services::read_state_service::ReadStateService;
use uuid::Uuid;

/// An opened thread: its messages plus how many were flipped to read by opening it.
#[derive(Debug, Clone)]
pub struct OpenedThread {
    pub messages: Vec<Message>,
    pub marked: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationService {
    messages: MessageService,
    read_state: ReadStateService,
}

impl ConversationService {
    #[must_use]
    pub const fn new(messages: MessageService, read_state: ReadStateService) -> Self {
        Self { messages, read_state }
    }

    /// The viewer's conversation list, most recent first.
    ///
    /// # Errors
    /// Returns a persistence error if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn list(&self, viewer_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let log = self.messages.query(viewer_id).await?;
        Ok(aggregate(viewer_id, &log))
    }

    /// Index seeded from the full log, for sessions that keep folding pushes into it.
    ///
    /// # Errors
    /// Returns a persistence error if the store fails.
    pub async fn index(&self, viewer_id: Uuid) -> Result<ConversationIndex> {
        let log = self.messages.query(viewer_id).await?;
        Ok(ConversationIndex::from_log(viewer_id, &log))
    }

    /// Opens a thread: marks it read, then returns it so the rows already carry `read_at`.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if `partner_id` is the viewer.
    /// Returns a persistence error if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn open_thread(&self, viewer_id: Uuid, partner_id: Uuid) -> Result<OpenedThread> {
        let marked = self.read_state.mark_read(viewer_id, partner_id).await?;
        let messages = self.messages.query_thread(viewer_id, partner_id).await?;
        Ok(OpenedThread { messages, marked })
    }
}
