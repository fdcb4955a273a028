use crate::domain::message::Message;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRecord {
    pub(crate) id: Uuid,
    pub(crate) sender_id: Uuid,
    pub(crate) recipient_id: Uuid,
    pub(crate) client_message_id: Option<Uuid>,
    pub(crate) subject: Option<String>,
    pub(crate) content: String,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) read_at: Option<OffsetDateTime>,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            sender_id: record.sender_id,
            recipient_id: record.recipient_id,
            content: record.content,
            subject: record.subject,
            client_message_id: record.client_message_id,
            created_at: record.created_at,
            read_at: record.read_at,
        }
    }
}
