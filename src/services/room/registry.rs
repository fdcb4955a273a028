use crate::domain::room::{RoomEvent, RoomId, RoomNotification};
use crate::services::room::transport::RoomMembership;
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
struct Metrics {
    received_total: Counter<u64>,
    unrouted_total: Counter<u64>,
    active_channels: UpDownCounter<i64>,
    gc_duration_seconds: Histogram<f64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            received_total: meter
                .u64_counter("parley_room_events_received_total")
                .with_description("Room events handed to the local registry")
                .build(),
            unrouted_total: meter
                .u64_counter("parley_room_events_unrouted_total")
                .with_description("Room events with no local subscriber")
                .build(),
            active_channels: meter
                .i64_up_down_counter("parley_room_channels")
                .with_description("Number of live local room channels")
                .build(),
            gc_duration_seconds: meter
                .f64_histogram("parley_room_gc_duration_seconds")
                .with_description("Time taken by a single room GC pass")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("parley_room_channels_reclaimed_total")
                .with_description("Idle room channels reclaimed by GC")
                .build(),
        }
    }
}

/// Node-local table of room channels.
#[derive(Clone, Debug)]
pub struct RoomRegistry {
    channels: Arc<DashMap<RoomId, broadcast::Sender<RoomEvent>>>,
    capacity: usize,
    membership: Option<Arc<dyn RoomMembership>>,
    metrics: Metrics,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { channels: Arc::new(DashMap::new()), capacity: capacity.max(1), membership: None, metrics: Metrics::new() }
    }

    /// Reports channel creation and reclamation to `membership`.
    #[must_use]
    pub fn with_membership(mut self, membership: Arc<dyn RoomMembership>) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn subscribe(&self, room: RoomId) -> broadcast::Receiver<RoomEvent> {
        self.channels
            .entry(room)
            .or_insert_with(|| {
                self.metrics.active_channels.add(1, &[]);
                if let Some(membership) = &self.membership {
                    membership.opened(room);
                }
                let (tx, _rx) = broadcast::channel(self.capacity);
                tx
            })
            .value()
            .subscribe()
    }

    /// Fans an event out to local subscribers of its room and returns how many got it.
    pub fn deliver(&self, notification: &RoomNotification) -> usize {
        let label = KeyValue::new("event", notification.event.label());
        self.metrics.received_total.add(1, std::slice::from_ref(&label));

        let delivered =
            self.channels.get(&notification.room).and_then(|tx| tx.send(notification.event.clone()).ok()).unwrap_or(0);

        if delivered == 0 {
            tracing::debug!(room = %notification.room, event = notification.event.label(), "No local subscriber for room event");
            self.metrics.unrouted_total.add(1, &[label]);
        }
        delivered
    }

    /// Drops channels that no context is subscribed to anymore.
    pub fn perform_gc(&self) {
        let start = std::time::Instant::now();
        let mut reclaimed = 0;

        self.channels.retain(|room, sender| {
            let active = sender.receiver_count() > 0;
            if !active {
                self.metrics.active_channels.add(-1, &[]);
                if let Some(membership) = &self.membership {
                    membership.closed(*room);
                }
                reclaimed += 1;
            }
            active
        });

        let duration = start.elapsed().as_secs_f64();
        self.metrics.gc_duration_seconds.record(duration, &[]);

        if reclaimed > 0 {
            self.metrics.gc_reclaimed_total.add(reclaimed, &[]);
            tracing::info!(reclaimed, "Room GC reclaimed idle channels");
        }
        tracing::debug!(duration_secs = %duration, "Room GC pass completed");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
