#![allow(clippy::unwrap_used, clippy::panic, clippy::missing_panics_doc, missing_debug_implementations, unreachable_pub)]
mod common;

use parley_server::adapters::database::{MessageRepository, UserRepository};
use parley_server::config::MessagingConfig;
use parley_server::domain::message::NewMessage;
use parley_server::error::AppError;
use parley_server::services::store::{IdentityDirectory, MessageStore};
use uuid::Uuid;

fn draft(sender: Uuid, recipient: Uuid, content: &str, client_id: Option<Uuid>) -> NewMessage {
    NewMessage::new(sender, recipient, content.to_string(), None, client_id, &MessagingConfig::default()).unwrap()
}

#[tokio::test]
async fn test_insert_round_trips_through_postgres() {
    let pool = common::get_test_pool().await;
    let repo = MessageRepository::new(pool.clone());
    let alice = common::insert_user(&pool, "alice").await;
    let bob = common::insert_user(&pool, "bob").await;

    let message = NewMessage::new(
        alice,
        bob,
        "hello".to_string(),
        Some("greetings".to_string()),
        None,
        &MessagingConfig::default(),
    )
    .unwrap();
    let id = message.id;

    let appended = repo.insert(message).await.unwrap();
    assert!(!appended.is_replay());
    let stored = appended.into_message();
    assert_eq!(stored.id, id);
    assert_eq!(stored.subject.as_deref(), Some("greetings"));
    assert!(stored.read_at.is_none());

    let listed = repo.list_for_participant(bob).await.unwrap();
    assert_eq!(listed, vec![stored]);
}

#[tokio::test]
async fn test_repeated_client_message_id_returns_existing_row() {
    let pool = common::get_test_pool().await;
    let repo = MessageRepository::new(pool.clone());
    let alice = common::insert_user(&pool, "alice").await;
    let bob = common::insert_user(&pool, "bob").await;
    let client_id = Uuid::new_v4();

    let first = repo.insert(draft(alice, bob, "once", Some(client_id))).await.unwrap();
    let again = repo.insert(draft(alice, bob, "once", Some(client_id))).await.unwrap();

    assert!(!first.is_replay());
    assert!(again.is_replay());
    assert_eq!(first.message(), again.message());
    assert_eq!(repo.list_between(alice, bob).await.unwrap().len(), 1);

    let found = repo.find_by_client_id(alice, client_id).await.unwrap();
    assert_eq!(found.map(|m| m.id), Some(first.message().id));
    assert!(repo.find_by_client_id(bob, client_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_recipient_is_not_found() {
    let pool = common::get_test_pool().await;
    let repo = MessageRepository::new(pool.clone());
    let alice = common::insert_user(&pool, "alice").await;

    let err = repo.insert(draft(alice, Uuid::new_v4(), "into the void", None)).await.unwrap_err();

    assert!(matches!(err, AppError::NotFound), "got {err:?}");
}

#[tokio::test]
async fn test_queries_are_in_log_order_and_scoped() {
    let pool = common::get_test_pool().await;
    let repo = MessageRepository::new(pool.clone());
    let alice = common::insert_user(&pool, "alice").await;
    let bob = common::insert_user(&pool, "bob").await;
    let carol = common::insert_user(&pool, "carol").await;

    let mut expected = Vec::new();
    for (sender, recipient, content) in [(alice, bob, "one"), (bob, alice, "two"), (alice, bob, "three")] {
        expected.push(repo.insert(draft(sender, recipient, content, None)).await.unwrap().into_message().id);
    }
    repo.insert(draft(carol, alice, "elsewhere", None)).await.unwrap();

    let thread = repo.list_between(bob, alice).await.unwrap();
    assert_eq!(thread.iter().map(|m| m.id).collect::<Vec<_>>(), expected);
    assert!(thread.windows(2).all(|w| w[0].order_key() < w[1].order_key()));

    assert_eq!(repo.list_for_participant(alice).await.unwrap().len(), 4);
    assert_eq!(repo.list_for_participant(bob).await.unwrap().len(), 3);
    assert_eq!(repo.list_for_participant(carol).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_mark_read_flips_each_row_once() {
    let pool = common::get_test_pool().await;
    let repo = MessageRepository::new(pool.clone());
    let alice = common::insert_user(&pool, "alice").await;
    let bob = common::insert_user(&pool, "bob").await;

    repo.insert(draft(alice, bob, "first", None)).await.unwrap();
    let newest = repo.insert(draft(alice, bob, "second", None)).await.unwrap().into_message();
    repo.insert(draft(bob, alice, "reply", None)).await.unwrap();

    let mark = repo.mark_read(bob, alice).await.unwrap();
    assert_eq!(mark.count, 2);
    assert_eq!(mark.through, Some(newest.order_key()));

    let again = repo.mark_read(bob, alice).await.unwrap();
    assert_eq!(again.count, 0);
    assert_eq!(again.through, None);

    let thread = repo.list_between(bob, alice).await.unwrap();
    assert!(thread.iter().filter(|m| m.recipient_id == bob).all(|m| m.read_at.is_some()));
    assert!(thread.iter().filter(|m| m.recipient_id == alice).all(|m| m.read_at.is_none()));
}

#[tokio::test]
async fn test_user_repository_resolves_known_users_only() {
    let pool = common::get_test_pool().await;
    let users = UserRepository::new(pool.clone());
    let alice = common::insert_user(&pool, "alice").await;

    let identity = users.resolve(alice).await.unwrap().unwrap();
    assert_eq!(identity.id, alice);
    assert_eq!(identity.display_name, "alice");
    assert!(identity.avatar_url.is_none());

    assert!(users.resolve(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_closed_pool_is_reported_as_unavailable() {
    let pool = common::get_test_pool().await;
    let repo = MessageRepository::new(pool.clone());
    let users = UserRepository::new(pool.clone());
    pool.close().await;

    let err = repo.list_for_participant(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)), "got {err:?}");

    let err = users.resolve(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)), "got {err:?}");
}
