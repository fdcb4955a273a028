use crate::domain::message::ReadMark;
use crate::domain::room::{RoomEvent, RoomId};
use crate::error::Result;
use crate::services::message_service::MessageService;
use crate::services::room::RoomChannel;
use opentelemetry::{global, metrics::Counter};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    marked_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            marked_total: meter
                .u64_counter("parley_messages_marked_read_total")
                .with_description("Messages that transitioned from unread to read")
                .build(),
        }
    }
}

/// Moves a viewer's incoming messages from unread to read and tells their other sessions.
#[derive(Clone, Debug)]
pub struct ReadStateService {
    messages: MessageService,
    rooms: RoomChannel,
    metrics: Metrics,
}

impl ReadStateService {
    #[must_use]
    pub fn new(messages: MessageService, rooms: RoomChannel) -> Self {
        Self { messages, rooms, metrics: Metrics::new() }
    }

    /// Marks the thread with `partner_id` as read. Returns how many rows flipped.
    ///
    /// Safe to call concurrently: each row flips exactly once across all callers.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if `partner_id` is the viewer.
    /// Returns a persistence error if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_read(&self, viewer_id: Uuid, partner_id: Uuid) -> Result<u64> {
        let ReadMark { count, through } = self.messages.mark_read(viewer_id, partner_id).await?;
        let Some(read_through) = through else {
            return Ok(0);
        };
        self.metrics.marked_total.add(count, &[]);

        // The viewer's own room, so their other open sessions drop the badge.
        let event = RoomEvent::ReadStateChanged { partner_id, count, read_through };
        match self.rooms.broadcast(RoomId::for_user(viewer_id), event).await {
            Ok(receivers) => tracing::debug!(receivers, "Read state change broadcast"),
            Err(e) => tracing::warn!(error = %e, "Failed to broadcast read state change"),
        }

        Ok(count)
    }

    /// Fire-and-forget variant for views that are already closing.
    /// The update may land after the caller is gone.
    pub fn mark_read_detached(&self, viewer_id: Uuid, partner_id: Uuid) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(
            async move {
                // Already logged by the instrumented call.
                let _ = service.mark_read(viewer_id, partner_id).await;
            }
            .instrument(tracing::debug_span!("mark_read_detached", %viewer_id, %partner_id)),
        )
    }
}
