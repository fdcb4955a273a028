use crate::domain::room::{RoomId, RoomNotification};
use crate::services::room::registry::RoomRegistry;
use async_trait::async_trait;
use thiserror::Error;

/// Failure to hand an event to the pub/sub fabric.
///
/// Never converted into `AppError`: callers log it and carry on.
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Room transport unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to encode room event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BroadcastError {
    /// Whether a retry could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait RoomTransport: Send + Sync + std::fmt::Debug {
    /// Hands the event to the fabric and returns how many receivers it reached.
    ///
    /// # Errors
    /// Returns `BroadcastError` if the fabric cannot accept the event.
    async fn publish(&self, notification: &RoomNotification) -> Result<usize, BroadcastError>;
}

/// Told when this node starts and stops holding a room channel.
///
/// Called with registry locks held, so implementations must not block or call back into the registry.
pub trait RoomMembership: Send + Sync + std::fmt::Debug {
    fn opened(&self, room: RoomId);
    fn closed(&self, room: RoomId);
}

/// Loops events straight back into this process's registry.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    registry: RoomRegistry,
}

impl LocalTransport {
    #[must_use]
    pub const fn new(registry: RoomRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RoomTransport for LocalTransport {
    async fn publish(&self, notification: &RoomNotification) -> Result<usize, BroadcastError> {
        Ok(self.registry.deliver(notification))
    }
}
