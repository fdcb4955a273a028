use crate::domain::identity::Identity;
use crate::domain::message::{Appended, Message, NewMessage, ReadMark};
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// The durable, append-only message log.
///
/// Implementations must make every write atomic per row: a failed `insert`
/// leaves nothing behind, and `mark_read` only touches rows whose `read_at`
/// is still null.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Stores a new row and assigns `created_at`.
    ///
    /// If the draft carries a client message id that the sender already used,
    /// the existing row is returned instead.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if a participant does not exist in the backend.
    /// Returns a persistence error if the write fails.
    async fn insert(&self, message: NewMessage) -> Result<Appended>;

    /// Looks up the row a sender stored under a client message id.
    ///
    /// # Errors
    /// Returns a persistence error if the read fails.
    async fn find_by_client_id(&self, sender_id: Uuid, client_message_id: Uuid) -> Result<Option<Message>>;

    /// Every row where `viewer_id` is sender or recipient, ascending by `(created_at, id)`.
    ///
    /// # Errors
    /// Returns a persistence error if the read fails.
    async fn list_for_participant(&self, viewer_id: Uuid) -> Result<Vec<Message>>;

    /// Rows exchanged between the two users, ascending by `(created_at, id)`.
    ///
    /// # Errors
    /// Returns a persistence error if the read fails.
    async fn list_between(&self, viewer_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>>;

    /// Stamps `read_at = now` on unread rows from `sender_id` to `recipient_id`.
    /// Returns how many rows transitioned and the newest of them.
    ///
    /// # Errors
    /// Returns a persistence error if the update fails.
    async fn mark_read(&self, recipient_id: Uuid, sender_id: Uuid) -> Result<ReadMark>;
}

/// Resolves opaque user ids against the user directory.
#[async_trait]
pub trait IdentityDirectory: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns a persistence error if the directory cannot be reached.
    async fn resolve(&self, user_id: Uuid) -> Result<Option<Identity>>;
}
