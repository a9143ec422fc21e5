//! Inbox poll routing tests.
//!
//! Exercises the full routing matrix, including the deliberate
//! drop-vs-hold asymmetry for undeliverable non-dispatch messages.

use agent_foreman::models::agent::WorkerMode;
use agent_foreman::models::inbox::{InboxItem, InboxSource, InboxStatus, MessageKind};
use agent_foreman::orchestrator::session_manager::StartOptions;

use super::test_helpers::{add_worker, harness, settle, Harness};

async fn queue_message(h: &Harness, agent_id: &str, kind: MessageKind, body: &str) -> InboxItem {
    let item = InboxItem::new(
        agent_id.to_owned(),
        "C_FLEET".to_owned(),
        kind,
        InboxSource::Direct,
        body.to_owned(),
    );
    h.inbox.create(item).await.expect("queue message")
}

async fn status_of(h: &Harness, item_id: &str) -> InboxStatus {
    h.inbox
        .get(item_id)
        .await
        .expect("get item")
        .expect("item exists")
        .status
}

async fn start_session(h: &Harness, agent_id: &str) -> String {
    h.sessions
        .start_session(
            agent_id,
            StartOptions {
                working_dir: "/fake/workspace".into(),
                worktree: None,
                prompt: None,
            },
        )
        .await
        .expect("session")
        .id
}

#[tokio::test]
async fn dispatch_message_without_session_is_marked_read() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    let item = queue_message(&h, "w1", MessageKind::Dispatch, "task ping").await;

    let outcome = h.daemon.poll_inbox().await;

    assert_eq!(outcome.processed, 1);
    assert_eq!(status_of(&h, &item.id).await, InboxStatus::Read);
}

#[tokio::test]
async fn messages_with_active_session_are_forwarded_as_input() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    start_session(&h, "w1").await;

    let chat = queue_message(&h, "w1", MessageKind::Chat, "status update please").await;
    let dispatch = queue_message(&h, "w1", MessageKind::Dispatch, "new task context").await;

    let outcome = h.daemon.poll_inbox().await;
    settle().await;

    assert_eq!(outcome.processed, 2);
    assert_eq!(status_of(&h, &chat.id).await, InboxStatus::Read);
    assert_eq!(status_of(&h, &dispatch.id).await, InboxStatus::Read);

    let handle = h.spawner.handle_for("w1").await.expect("handle");
    let inputs = h.spawner.inputs(&handle).await;
    assert!(inputs.contains(&"status update please".to_owned()));
    assert!(inputs.contains(&"new task context".to_owned()));
}

#[tokio::test]
async fn chat_for_idle_ephemeral_worker_is_dropped() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    let item = queue_message(&h, "w1", MessageKind::Chat, "are you there?").await;

    let outcome = h.daemon.poll_inbox().await;

    // Marked read, never delivered: ephemeral workers have no next
    // session to hold it for.
    assert_eq!(outcome.processed, 1);
    assert_eq!(status_of(&h, &item.id).await, InboxStatus::Read);
    assert!(h.spawner.handle_for("w1").await.is_none());
}

#[tokio::test]
async fn chat_for_idle_persistent_worker_stays_unread() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Persistent).await;
    let item = queue_message(&h, "w1", MessageKind::Chat, "read me later").await;

    let outcome = h.daemon.poll_inbox().await;

    assert_eq!(outcome.processed, 0);
    assert_eq!(status_of(&h, &item.id).await, InboxStatus::Unread);
}

#[tokio::test]
async fn held_message_is_delivered_once_a_session_appears() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Persistent).await;
    let item = queue_message(&h, "w1", MessageKind::Chat, "read me later").await;

    h.daemon.poll_inbox().await;
    assert_eq!(status_of(&h, &item.id).await, InboxStatus::Unread);

    start_session(&h, "w1").await;
    h.daemon.poll_inbox().await;
    settle().await;

    assert_eq!(status_of(&h, &item.id).await, InboxStatus::Read);
    let handle = h.spawner.handle_for("w1").await.expect("handle");
    assert!(h.spawner.inputs(&handle).await.contains(&"read me later".to_owned()));
}

#[tokio::test]
async fn poll_routes_at_most_fifty_items_per_agent() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    for n in 0..55 {
        queue_message(&h, "w1", MessageKind::Chat, &format!("msg {n}")).await;
    }

    let outcome = h.daemon.poll_inbox().await;
    assert_eq!(outcome.processed, 50);

    let unread = h
        .inbox
        .list()
        .await
        .expect("list")
        .into_iter()
        .filter(|item| item.status == InboxStatus::Unread)
        .count();
    assert_eq!(unread, 5, "overflow items wait for the next cycle");
}
