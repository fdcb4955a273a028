//! Room-scoped, at-most-once push fabric.
//!
//! Events are nudges: a context that was not subscribed when an event went
//! out never sees it, and a lagging context is told how much it missed.
//! Clients reconcile against the message store, which stays authoritative.

use crate::domain::room::{RoomEvent, RoomId, RoomNotification};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

pub mod registry;
pub mod transport;

pub use registry::RoomRegistry;
pub use transport::{BroadcastError, LocalTransport, RoomMembership, RoomTransport};

#[derive(Clone, Debug)]
struct Metrics {
    broadcasts_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            broadcasts_total: meter
                .u64_counter("parley_room_broadcasts_total")
                .with_description("Room broadcast attempts")
                .build(),
        }
    }
}

/// Injectable handle to the room fabric: a local registry plus the transport
/// that carries events between nodes.
#[derive(Clone, Debug)]
pub struct RoomChannel {
    registry: RoomRegistry,
    transport: Arc<dyn RoomTransport>,
    metrics: Metrics,
}

impl RoomChannel {
    #[must_use]
    pub fn new(registry: RoomRegistry, transport: Arc<dyn RoomTransport>) -> Self {
        Self { registry, transport, metrics: Metrics::new() }
    }

    /// Single-node channel whose broadcasts loop straight back into the local registry.
    #[must_use]
    pub fn local(capacity: usize) -> Self {
        let registry = RoomRegistry::new(capacity);
        let transport = Arc::new(LocalTransport::new(registry.clone()));
        Self::new(registry, transport)
    }

    /// A fresh subscription context with no rooms joined.
    #[must_use]
    pub fn context(&self) -> RoomContext {
        RoomContext { registry: self.registry.clone(), streams: StreamMap::new() }
    }

    /// Sends `event` to every context currently subscribed to `room`.
    ///
    /// # Errors
    /// Returns `BroadcastError` if the transport rejects the event.
    #[tracing::instrument(level = "debug", skip(self, event), fields(room = %room, event = event.label()))]
    pub async fn broadcast(&self, room: RoomId, event: RoomEvent) -> Result<usize, BroadcastError> {
        let label = event.label();
        let result = self.transport.publish(&RoomNotification { room, event }).await;

        let status = match &result {
            Ok(0) => "no_receivers",
            Ok(_) => "delivered",
            Err(_) => "error",
        };
        self.metrics.broadcasts_total.add(1, &[KeyValue::new("event", label), KeyValue::new("status", status)]);

        result
    }

    /// Routes an event that arrived from another node into local contexts.
    pub fn dispatch(&self, notification: &RoomNotification) -> usize {
        self.registry.deliver(notification)
    }

    pub fn perform_gc(&self) {
        self.registry.perform_gc();
    }

    #[must_use]
    pub const fn registry(&self) -> &RoomRegistry {
        &self.registry
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSignal {
    Event { room: RoomId, event: RoomEvent },
    /// The context fell behind and `missed` events were dropped for it.
    Lagged { room: RoomId, missed: u64 },
}

/// One client's set of room subscriptions.
pub struct RoomContext {
    registry: RoomRegistry,
    streams: StreamMap<RoomId, BroadcastStream<RoomEvent>>,
}

impl std::fmt::Debug for RoomContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomContext").field("rooms", &self.rooms()).finish_non_exhaustive()
    }
}

impl RoomContext {
    /// Subscribes to `room`, leaving whatever this context had joined before.
    pub fn join_room(&mut self, room: RoomId) {
        let previous: Vec<RoomId> = self.streams.keys().copied().filter(|r| *r != room).collect();
        for r in previous {
            self.streams.remove(&r);
        }
        if !self.streams.contains_key(&room) {
            self.add_room(room);
        }
    }

    /// Subscribes to `room` in addition to the rooms already joined.
    pub fn add_room(&mut self, room: RoomId) {
        let rx = self.registry.subscribe(room);
        self.streams.insert(room, BroadcastStream::new(rx));
    }

    /// Leaves one room. Returns whether it was joined.
    pub fn leave(&mut self, room: RoomId) -> bool {
        self.streams.remove(&room).is_some()
    }

    /// Leaves every room. A no-op when nothing is joined.
    pub fn leave_room(&mut self) {
        self.streams.clear();
    }

    #[must_use]
    pub fn rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.streams.keys().copied().collect();
        rooms.sort_unstable();
        rooms
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        !self.streams.is_empty()
    }

    /// Waits for the next signal from any joined room.
    ///
    /// Pends forever while no room is joined, so it is safe to poll inside `select!`.
    pub async fn recv(&mut self) -> RoomSignal {
        loop {
            if self.streams.is_empty() {
                std::future::pending::<()>().await;
            }
            match self.streams.next().await {
                Some((room, Ok(event))) => return RoomSignal::Event { room, event },
                Some((room, Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    return RoomSignal::Lagged { room, missed };
                }
                // A closed room stream is dropped from the map; keep waiting on the rest.
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::LogPosition;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn nudge(count: u64) -> RoomEvent {
        let read_through = LogPosition { created_at: OffsetDateTime::UNIX_EPOCH, id: Uuid::nil() };
        RoomEvent::ReadStateChanged { partner_id: Uuid::nil(), count, read_through }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_joined_contexts_only() {
        let channel = RoomChannel::local(8);
        let room = RoomId::for_user(Uuid::new_v4());

        let mut joined = channel.context();
        joined.join_room(room);
        let idle = channel.context();

        let reached = channel.broadcast(room, nudge(1)).await.expect("local broadcast");
        assert_eq!(reached, 1);
        assert_eq!(joined.recv().await, RoomSignal::Event { room, event: nudge(1) });
        assert!(!idle.is_joined());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_reports_zero() {
        let channel = RoomChannel::local(8);
        let reached = channel.broadcast(RoomId::for_user(Uuid::new_v4()), nudge(1)).await.expect("local broadcast");
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_late_joiner_never_sees_earlier_events() {
        let channel = RoomChannel::local(8);
        let room = RoomId::for_user(Uuid::new_v4());

        let mut early = channel.context();
        early.join_room(room);
        channel.broadcast(room, nudge(1)).await.expect("broadcast");

        let mut late = channel.context();
        late.join_room(room);
        channel.broadcast(room, nudge(2)).await.expect("broadcast");

        assert_eq!(late.recv().await, RoomSignal::Event { room, event: nudge(2) });
        assert_eq!(early.recv().await, RoomSignal::Event { room, event: nudge(1) });
    }

    #[tokio::test]
    async fn test_join_room_replaces_previous_room() {
        let channel = RoomChannel::local(8);
        let first = RoomId::for_user(Uuid::new_v4());
        let second = RoomId::for_user(Uuid::new_v4());

        let mut ctx = channel.context();
        ctx.join_room(first);
        ctx.join_room(second);
        assert_eq!(ctx.rooms(), vec![second]);

        assert_eq!(channel.broadcast(first, nudge(1)).await.expect("broadcast"), 0);
    }

    #[tokio::test]
    async fn test_add_room_keeps_explicit_set() {
        let channel = RoomChannel::local(8);
        let first = RoomId::for_user(Uuid::new_v4());
        let second = RoomId::for_user(Uuid::new_v4());

        let mut ctx = channel.context();
        ctx.add_room(first);
        ctx.add_room(second);
        let mut expected = vec![first, second];
        expected.sort_unstable();
        assert_eq!(ctx.rooms(), expected);

        assert!(ctx.leave(first));
        assert!(!ctx.leave(first));
        assert_eq!(ctx.rooms(), vec![second]);
    }

    #[tokio::test]
    async fn test_leave_room_is_idempotent() {
        let channel = RoomChannel::local(8);
        let room = RoomId::for_user(Uuid::new_v4());

        let mut ctx = channel.context();
        ctx.leave_room();
        ctx.join_room(room);
        ctx.leave_room();
        ctx.leave_room();

        assert!(!ctx.is_joined());
        assert_eq!(channel.broadcast(room, nudge(1)).await.expect("broadcast"), 0);
    }

    #[tokio::test]
    async fn test_lagging_context_is_told_what_it_missed() {
        let channel = RoomChannel::local(2);
        let room = RoomId::for_user(Uuid::new_v4());

        let mut ctx = channel.context();
        ctx.join_room(room);
        for n in 0..5 {
            channel.broadcast(room, nudge(n)).await.expect("broadcast");
        }

        assert_eq!(ctx.recv().await, RoomSignal::Lagged { room, missed: 3 });
        assert_eq!(ctx.recv().await, RoomSignal::Event { room, event: nudge(3) });
    }
}
