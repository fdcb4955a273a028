use crate::adapters::database::DbPool;
use crate::adapters::database::records::MessageRecord;
use crate::domain::message::{Appended, LogPosition, Message, NewMessage, ReadMark};
use crate::error::{AppError, Result};
use crate::services::store::MessageStore;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

#[derive(Clone, Debug)]
pub struct MessageRepository {
    pool: DbPool,
}

impl MessageRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    #[tracing::instrument(level = "debug", skip(self, message), fields(message_id = %message.id))]
    async fn insert(&self, message: NewMessage) -> Result<Appended> {
        let mut conn = self.pool.acquire().await?;

        // The partial unique index makes a repeated client id a no-op that returns no row.
        let result = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, sender_id, recipient_id, client_message_id, subject, content)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sender_id, client_message_id) WHERE client_message_id IS NOT NULL DO NOTHING
            RETURNING id, sender_id, recipient_id, client_message_id, subject, content, created_at, read_at
            "#,
        )
        .bind(message.id)
        .bind(message.sender_id)
        .bind(message.recipient_id)
        .bind(message.client_message_id)
        .bind(&message.subject)
        .bind(&message.content)
        .fetch_optional(&mut *conn)
        .await;

        match result {
            Ok(Some(record)) => Ok(Appended::Inserted(record.into())),
            Ok(None) => {
                let client_message_id = message.client_message_id.ok_or(AppError::Internal)?;
                let existing = sqlx::query_as::<_, MessageRecord>(
                    r#"
                    SELECT id, sender_id, recipient_id, client_message_id, subject, content, created_at, read_at
                    FROM messages
                    WHERE sender_id = $1 AND client_message_id = $2
                    "#,
                )
                .bind(message.sender_id)
                .bind(client_message_id)
                .fetch_one(&mut *conn)
                .await?;
                Ok(Appended::Existing(existing.into()))
            }
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                // Sender or recipient is missing from the users table.
                Err(AppError::NotFound)
            }
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(CHECK_VIOLATION) => {
                Err(AppError::Validation(e.message().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_client_id(&self, sender_id: Uuid, client_message_id: Uuid) -> Result<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, sender_id, recipient_id, client_message_id, subject, content, created_at, read_at
            FROM messages
            WHERE sender_id = $1 AND client_message_id = $2
            "#,
        )
        .bind(sender_id)
        .bind(client_message_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_for_participant(&self, viewer_id: Uuid) -> Result<Vec<Message>> {
        let mut conn = self.pool.acquire().await?;
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, sender_id, recipient_id, client_message_id, subject, content, created_at, read_at
            FROM messages
            WHERE sender_id = $1 OR recipient_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(viewer_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_between(&self, viewer_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>> {
        let mut conn = self.pool.acquire().await?;
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, sender_id, recipient_id, client_message_id, subject, content, created_at, read_at
            FROM messages
            WHERE (sender_id = $1 AND recipient_id = $2)
               OR (sender_id = $2 AND recipient_id = $1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(viewer_id)
        .bind(partner_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_read(&self, recipient_id: Uuid, sender_id: Uuid) -> Result<ReadMark> {
        let mut conn = self.pool.acquire().await?;
        // Concurrent callers re-check `read_at IS NULL` after the row lock, so each row flips once.
        let flipped = sqlx::query_as::<_, (OffsetDateTime, Uuid)>(
            r#"
            UPDATE messages
            SET read_at = NOW()
            WHERE recipient_id = $1 AND sender_id = $2 AND read_at IS NULL
            RETURNING created_at, id
            "#,
        )
        .bind(recipient_id)
        .bind(sender_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut mark = ReadMark::default();
        for (created_at, id) in flipped {
            mark.record(LogPosition { created_at, id });
        }
        Ok(mark)
    }
}
