use crate::adapters::redis::{PubSubMessage, RedisClient};
use crate::domain::room::{RoomEvent, RoomId, RoomNotification};
use crate::services::room::{BroadcastError, RoomMembership, RoomTransport};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Publishes room events as JSON on `<prefix><room id>` channels.
///
/// A node is subscribed to a room's channel only while its registry holds
/// that room, so the `PUBLISH` reply counts nodes with a live room.
#[derive(Debug, Clone)]
pub struct RedisRoomTransport {
    redis: Arc<RedisClient>,
    channel_prefix: String,
}

impl RedisRoomTransport {
    #[must_use]
    pub const fn new(redis: Arc<RedisClient>, channel_prefix: String) -> Self {
        Self { redis, channel_prefix }
    }

    /// Raw messages from every room channel this node is subscribed to.
    #[must_use]
    pub fn messages(&self) -> broadcast::Receiver<PubSubMessage> {
        self.redis.messages()
    }

    #[must_use]
    pub fn parse(&self, message: &PubSubMessage) -> Option<RoomNotification> {
        decode(&self.channel_prefix, message)
    }
}

/// Decodes a raw pub/sub message into a room notification.
/// Returns `None` for channels outside the room prefix or malformed payloads.
#[must_use]
pub fn decode(channel_prefix: &str, message: &PubSubMessage) -> Option<RoomNotification> {
    let room = RoomId::from_channel_name(&message.channel, channel_prefix)?;
    match serde_json::from_slice::<RoomEvent>(&message.payload) {
        Ok(event) => Some(RoomNotification { room, event }),
        Err(e) => {
            tracing::warn!(error = %e, channel = %message.channel, "Dropping malformed room event");
            None
        }
    }
}

#[async_trait]
impl RoomTransport for RedisRoomTransport {
    #[tracing::instrument(level = "debug", skip(self, notification), fields(room = %notification.room, event = notification.event.label()))]
    async fn publish(&self, notification: &RoomNotification) -> Result<usize, BroadcastError> {
        let channel = notification.room.channel_name(&self.channel_prefix);
        let payload = serde_json::to_vec(&notification.event)?;

        let mut conn = self.redis.publisher();
        // PUBLISH answers with the number of subscribed connections, i.e. nodes holding the room.
        let receivers: i64 =
            conn.publish(&channel, payload).await.map_err(|e| BroadcastError::Unavailable(e.to_string()))?;

        Ok(usize::try_from(receivers).unwrap_or(0))
    }
}

impl RoomMembership for RedisRoomTransport {
    fn opened(&self, room: RoomId) {
        self.redis.subscribe(room.channel_name(&self.channel_prefix));
    }

    fn closed(&self, room: RoomId) {
        self.redis.unsubscribe(room.channel_name(&self.channel_prefix));
    }
}
