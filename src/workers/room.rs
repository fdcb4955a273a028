use crate::adapters::redis::{PubSubMessage, RedisRoomTransport};
use crate::services::room::RoomChannel;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

/// Reclaims idle room channels and, on multi-node deployments, feeds events
/// published by other nodes into the local registry.
#[derive(Debug)]
pub struct RoomWorker {
    rooms: RoomChannel,
    remote: Option<RedisRoomTransport>,
    gc_interval_secs: u64,
}

impl RoomWorker {
    #[must_use]
    pub const fn new(rooms: RoomChannel, remote: Option<RedisRoomTransport>, gc_interval_secs: u64) -> Self {
        Self { rooms, remote, gc_interval_secs }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut gc_interval = tokio::time::interval(Duration::from_secs(self.gc_interval_secs.max(1)));

        let mut remote_rx = self.remote.as_ref().map(RedisRoomTransport::messages);

        tracing::info!(distributed = remote_rx.is_some(), "Room worker started");

        while !*shutdown.borrow() {
            tokio::select! {
                // Either the flag flipped or every sender is gone; both end the worker.
                _ = shutdown.changed() => break,

                _ = gc_interval.tick() => {
                    async { self.rooms.perform_gc() }
                        .instrument(tracing::debug_span!("room_gc_iteration"))
                        .await;
                }

                result = recv_remote(remote_rx.as_mut()) => {
                    match result {
                        Ok(message) => {
                            if let Some(remote) = &self.remote
                                && let Some(notification) = remote.parse(&message)
                            {
                                self.rooms.dispatch(&notification);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "Room dispatcher lagged behind pubsub");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::error!("Room pubsub stream closed, worker exiting");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Room worker shutting down...");
    }
}

async fn recv_remote(
    rx: Option<&mut broadcast::Receiver<PubSubMessage>>,
) -> Result<PubSubMessage, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
