use crate::config::MessagingConfig;
use crate::domain::delivery::{DeliveryReport, DeliveryState};
use crate::domain::message::Message;
use crate::domain::room::{MessagePreview, RoomEvent, RoomId};
use crate::error::{AppError, Result};
use crate::services::message_service::MessageService;
use crate::services::room::{BroadcastError, RoomChannel};
use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    sends_total: Counter<u64>,
    notify_total: Counter<u64>,
    notify_duration_seconds: Histogram<f64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            sends_total: meter
                .u64_counter("parley_sends_total")
                .with_description("Send attempts handled by the delivery coordinator")
                .build(),
            notify_total: meter
                .u64_counter("parley_notify_total")
                .with_description("Terminal notify outcomes")
                .build(),
            notify_duration_seconds: meter
                .f64_histogram("parley_notify_duration_seconds")
                .with_description("Time spent notifying the recipient room, retries included")
                .build(),
        }
    }
}

type SendKey = (Uuid, Uuid);

/// Holds a `(sender, client_message_id)` slot for the lifetime of one send.
struct SendGuard {
    in_flight: Arc<DashMap<SendKey, ()>>,
    key: SendKey,
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// Drives a send from durable write to best-effort recipient notification.
///
/// The store write is the commit point. Once it succeeds the caller gets a
/// success, whatever happens to the notification.
#[derive(Clone, Debug)]
pub struct DeliveryService {
    messages: MessageService,
    rooms: RoomChannel,
    in_flight: Arc<DashMap<SendKey, ()>>,
    retry_strategy: ExponentialBuilder,
    metrics: Metrics,
}

impl DeliveryService {
    #[must_use]
    pub fn new(messages: MessageService, rooms: RoomChannel, config: &MessagingConfig) -> Self {
        let retry_strategy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(config.notify_min_backoff_ms))
            .with_max_delay(Duration::from_millis(config.notify_max_backoff_ms))
            .with_max_times(config.notify_max_attempts.saturating_sub(1));

        Self { messages, rooms, in_flight: Arc::new(DashMap::new()), retry_strategy, metrics: Metrics::new() }
    }

    /// Stores the message, then nudges the recipient's room.
    ///
    /// A replayed `client_message_id` returns the stored row and does not notify again.
    ///
    /// # Errors
    /// Returns `AppError::Conflict` if the same `client_message_id` is already being sent.
    /// Otherwise returns whatever [`MessageService::append`] returns; no notification is attempted then.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, content, subject),
        fields(sender_id = %sender_id, recipient_id = %recipient_id, state = tracing::field::Empty)
    )]
    pub async fn send(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: String,
        subject: Option<String>,
        client_message_id: Option<Uuid>,
    ) -> Result<DeliveryReport> {
        let _guard = client_message_id.map(|id| self.claim((sender_id, id))).transpose()?;

        let appended = match self.messages.append(sender_id, recipient_id, content, subject, client_message_id).await {
            Ok(appended) => appended,
            Err(e) => {
                self.metrics.sends_total.add(1, &[KeyValue::new("status", "failure")]);
                return Err(e);
            }
        };

        if appended.is_replay() {
            self.metrics.sends_total.add(1, &[KeyValue::new("status", "replayed")]);
            tracing::Span::current().record("state", DeliveryState::Created.as_str());
            return Ok(DeliveryReport {
                message: appended.into_message(),
                state: DeliveryState::Created,
                replayed: true,
            });
        }

        self.metrics.sends_total.add(1, &[KeyValue::new("status", "stored")]);
        let message = appended.into_message();
        let state = self.notify(&message).await;
        tracing::Span::current().record("state", state.as_str());

        Ok(DeliveryReport { message, state, replayed: false })
    }

    fn claim(&self, key: SendKey) -> Result<SendGuard> {
        match self.in_flight.entry(key) {
            Entry::Occupied(_) => Err(AppError::Conflict("A send with this client message id is in progress".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(SendGuard { in_flight: Arc::clone(&self.in_flight), key })
            }
        }
    }

    async fn notify(&self, message: &Message) -> DeliveryState {
        let room = RoomId::for_user(message.recipient_id);
        let preview = MessagePreview::from(message);
        let state = DeliveryState::Created.begin_notify();
        let start = Instant::now();

        let rooms = &self.rooms;
        let preview = &preview;
        let result = (|| async move { rooms.broadcast(room, RoomEvent::MessageReceived { message: preview.clone() }).await })
            .retry(self.retry_strategy)
            .when(BroadcastError::is_transient)
            .notify(|e, duration| {
                tracing::debug!(error = %e, retry_in = ?duration, "Room broadcast failed, retrying");
            })
            .await;

        let receivers = match result {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, %room, "Giving up on recipient notification");
                None
            }
        };

        let state = state.finish_notify(receivers);
        self.metrics.notify_duration_seconds.record(start.elapsed().as_secs_f64(), &[]);
        self.metrics.notify_total.add(1, &[KeyValue::new("state", state.as_str())]);
        state
    }
}
