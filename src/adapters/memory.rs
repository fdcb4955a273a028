//! Process-local adapters used by single-node deployments without Postgres and by the test suite.

use crate::domain::identity::Identity;
use crate::domain::message::{Appended, Message, NewMessage, ReadMark};
use crate::error::{AppError, Result};
use crate::services::store::{IdentityDirectory, MessageStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct InMemoryMessageStore {
    rows: Arc<RwLock<Vec<Message>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Appended> {
        self.check_available()?;
        let mut rows = self.rows.write().await;

        if let Some(client_id) = message.client_message_id
            && let Some(existing) =
                rows.iter().find(|m| m.sender_id == message.sender_id && m.client_message_id == Some(client_id))
        {
            return Ok(Appended::Existing(existing.clone()));
        }

        let stored = Message {
            id: message.id,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            content: message.content,
            subject: message.subject,
            client_message_id: message.client_message_id,
            created_at: OffsetDateTime::now_utc(),
            read_at: None,
        };

        // Keep the log sorted so reads never need to.
        let at = rows.partition_point(|m| m.order_key() <= stored.order_key());
        rows.insert(at, stored.clone());

        Ok(Appended::Inserted(stored))
    }

    async fn find_by_client_id(&self, sender_id: Uuid, client_message_id: Uuid) -> Result<Option<Message>> {
        self.check_available()?;
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|m| m.sender_id == sender_id && m.client_message_id == Some(client_message_id)).cloned())
    }

    async fn list_for_participant(&self, viewer_id: Uuid) -> Result<Vec<Message>> {
        self.check_available()?;
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|m| m.is_visible_to(viewer_id)).cloned().collect())
    }

    async fn list_between(&self, viewer_id: Uuid, partner_id: Uuid) -> Result<Vec<Message>> {
        self.check_available()?;
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|m| m.is_visible_to(viewer_id) && m.partner_of(viewer_id) == partner_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, recipient_id: Uuid, sender_id: Uuid) -> Result<ReadMark> {
        self.check_available()?;
        let now = OffsetDateTime::now_utc();
        let mut rows = self.rows.write().await;
        let mut mark = ReadMark::default();
        for row in rows.iter_mut().filter(|m| m.recipient_id == recipient_id && m.sender_id == sender_id) {
            if row.read_at.is_none() {
                row.read_at = Some(now);
                mark.record(row.order_key());
            }
        }
        Ok(mark)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryIdentityDirectory {
    users: Arc<DashMap<Uuid, Identity>>,
}

impl InMemoryIdentityDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: Identity) {
        self.users.insert(identity.id, identity);
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn resolve(&self, user_id: Uuid) -> Result<Option<Identity>> {
        Ok(self.users.get(&user_id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingConfig;

    fn draft(sender: Uuid, recipient: Uuid, content: &str, client_id: Option<Uuid>) -> NewMessage {
        NewMessage::new(sender, recipient, content.to_string(), None, client_id, &MessagingConfig::default())
            .expect("valid draft")
    }

    #[tokio::test]
    async fn test_insert_assigns_timestamp_and_keeps_order() {
        let store = InMemoryMessageStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let first = store.insert(draft(a, b, "one", None)).await.expect("insert").into_message();
        let second = store.insert(draft(b, a, "two", None)).await.expect("insert").into_message();

        let rows = store.list_for_participant(a).await.expect("list");
        assert_eq!(rows.iter().map(|m| m.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        assert!(rows.windows(2).all(|w| w[0].order_key() <= w[1].order_key()));
        assert!(rows.iter().all(|m| m.read_at.is_none()));
    }

    #[tokio::test]
    async fn test_client_message_id_replays_existing_row() {
        let store = InMemoryMessageStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let client_id = Uuid::new_v4();

        let first = store.insert(draft(a, b, "hello", Some(client_id))).await.expect("insert");
        let again = store.insert(draft(a, b, "hello", Some(client_id))).await.expect("insert");

        assert!(!first.is_replay());
        assert!(again.is_replay());
        assert_eq!(first.message().id, again.message().id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_one_way() {
        let store = InMemoryMessageStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert(draft(a, b, "x", None)).await.expect("insert");
        let newest = store.insert(draft(a, b, "y", None)).await.expect("insert").into_message();
        store.insert(draft(b, a, "z", None)).await.expect("insert");

        let mark = store.mark_read(b, a).await.expect("mark");
        assert_eq!(mark.count, 2);
        assert_eq!(mark.through, Some(newest.order_key()));
        assert_eq!(store.mark_read(b, a).await.expect("mark"), ReadMark::default());
        // The reverse direction is untouched.
        assert_eq!(store.mark_read(a, b).await.expect("mark").count, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_without_writing() {
        let store = InMemoryMessageStore::new();
        store.set_unavailable(true);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let err = store.insert(draft(a, b, "lost", None)).await.expect_err("store is down");
        assert!(matches!(err, AppError::Persistence(_)));

        store.set_unavailable(false);
        assert!(store.is_empty().await);
    }
}
