use crate::config::MessagingConfig;
use crate::domain::message::{Appended, Message, NewMessage, ReadMark};
use crate::error::{AppError, Result};
use crate::services::store::{IdentityDirectory, MessageStore};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    appended_total: Counter<u64>,
    query_size: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            appended_total: meter
                .u64_counter("parley_messages_appended_total")
                .with_description("Append attempts against the message store")
                .build(),
            query_size: meter
                .u64_histogram("parley_message_query_size")
                .with_description("Number of messages returned by a single query")
                .build(),
        }
    }
}

/// Front door to the durable message log.
#[derive(Clone, Debug)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn IdentityDirectory>,
    config: MessagingConfig,
    metrics: Metrics,
}

impl MessageService {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, directory: Arc<dyn IdentityDirectory>, config: MessagingConfig) -> Self {
        Self { store, directory, config, metrics: Metrics::new() }
    }

    /// Persists a message. The returned row carries its `created_at`.
    ///
    /// A `client_message_id` the sender already used returns the original row
    /// without writing a new one.
    ///
    /// # Errors
    /// Returns `AppError::Validation` for blank content, oversize fields or a self-addressed message.
    /// Returns `AppError::NotFound` if the recipient cannot be resolved.
    /// Returns a persistence error if the store fails; nothing is written in that case.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, content, subject),
        fields(sender_id = %sender_id, recipient_id = %recipient_id)
    )]
    pub async fn append(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: String,
        subject: Option<String>,
        client_message_id: Option<Uuid>,
    ) -> Result<Appended> {
        let draft = NewMessage::new(sender_id, recipient_id, content, subject, client_message_id, &self.config)?;

        if let Some(client_id) = client_message_id
            && let Some(existing) = self.store.find_by_client_id(sender_id, client_id).await?
        {
            tracing::debug!(message_id = %existing.id, "Client message id already stored");
            self.metrics.appended_total.add(1, &[KeyValue::new("status", "replayed")]);
            return Ok(Appended::Existing(existing));
        }

        if self.directory.resolve(recipient_id).await?.is_none() {
            return Err(AppError::NotFound);
        }

        match self.store.insert(draft).await {
            Ok(appended) => {
                let status = if appended.is_replay() { "replayed" } else { "inserted" };
                tracing::debug!(message_id = %appended.message().id, status, "Message appended");
                self.metrics.appended_total.add(1, &[KeyValue::new("status", status)]);
                Ok(appended)
            }
            Err(e) => {
                self.metrics.appended_total.add(1, &[KeyValue::new("status", "failure")]);
                Err(e)
            }
        }
    }

    /// Every message the viewer sent or received, oldest first.
    ///
    /// # Errors
    /// Returns a persistence error if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn query(&self, viewer_id: Uuid) -> Result<Vec<Message>> {
        let messages = self.store.list_for_participant(viewer_id).await?;
        self.metrics.query_size.record(messages.len() as u64, &[KeyValue::new("scope", "all")]);
        Ok(messages)
    }

    /// The part of [`MessageService::query`] exchanged with `partner_id`.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if `partner_id` is the viewer.
    /// Returns a persistence error if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn query_thread(&self, viewer_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>> {
        ensure_distinct(viewer_id, partner_id)?;
        let messages = self.store.list_between(viewer_id, partner_id).await?;
        self.metrics.query_size.record(messages.len() as u64, &[KeyValue::new("scope", "thread")]);
        Ok(messages)
    }

    /// Marks everything `partner_id` sent to the viewer as read. Returns how many rows flipped and the newest of them.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if `partner_id` is the viewer.
    /// Returns a persistence error if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_read(&self, viewer_id: Uuid, partner_id: Uuid) -> Result<ReadMark> {
        ensure_distinct(viewer_id, partner_id)?;
        self.store.mark_read(viewer_id, partner_id).await
    }
}

fn ensure_distinct(viewer_id: Uuid, partner_id: Uuid) -> Result<()> {
    if viewer_id == partner_id {
        return Err(AppError::Validation("A conversation needs two distinct participants".to_string()));
    }
    Ok(())
}
