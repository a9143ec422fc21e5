//! Dispatch service integration tests.
//!
//! Covers assignment+notification composition, re-dispatch semantics,
//! candidate filtering, and the assigned/unassigned disjointness
//! property.

use agent_foreman::models::agent::WorkerMode;
use agent_foreman::models::task::{AssignmentStatus, TaskPriority};
use agent_foreman::orchestrator::dispatch::{DispatchOptions, SmartDispatchOptions};
use agent_foreman::AppError;

use super::test_helpers::{add_steward, add_task, add_worker, harness};

#[tokio::test]
async fn dispatch_assigns_and_notifies() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    add_task(&h, "T-1", "Fix login flow", TaskPriority::High).await;

    let receipt = h
        .dispatch
        .dispatch("T-1", "w1", DispatchOptions::default())
        .await
        .expect("dispatch");

    assert!(receipt.is_new_assignment);
    assert_eq!(receipt.task.assignee.as_deref(), Some("w1"));
    assert_eq!(receipt.agent.id, "w1");
    assert!(!receipt.notification.message_id.is_empty());
}

#[tokio::test]
async fn redispatch_sends_fresh_notification_without_reassigning() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    add_task(&h, "T-1", "Fix login flow", TaskPriority::High).await;

    let first = h
        .dispatch
        .dispatch("T-1", "w1", DispatchOptions::default())
        .await
        .expect("first dispatch");
    let second = h
        .dispatch
        .dispatch("T-1", "w1", DispatchOptions::default())
        .await
        .expect("second dispatch");

    assert!(first.is_new_assignment);
    assert!(!second.is_new_assignment);
    assert_ne!(
        first.notification.message_id, second.notification.message_id,
        "re-dispatch must produce a fresh notification"
    );
}

#[tokio::test]
async fn dispatch_missing_task_or_agent_fails_not_found() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    add_task(&h, "T-1", "Fix login flow", TaskPriority::High).await;

    let missing_task = h
        .dispatch
        .dispatch("T-404", "w1", DispatchOptions::default())
        .await;
    assert!(matches!(missing_task, Err(AppError::NotFound(_))));

    let missing_agent = h
        .dispatch
        .dispatch("T-1", "ghost", DispatchOptions::default())
        .await;
    assert!(matches!(missing_agent, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn smart_dispatch_fails_when_no_worker_is_eligible() {
    let h = harness().await;
    // Stewards are never dispatch candidates.
    add_steward(&h, "s1", "docs", None).await;
    add_task(&h, "T-1", "Fix login flow", TaskPriority::High).await;

    let result = h
        .dispatch
        .smart_dispatch("T-1", SmartDispatchOptions::default())
        .await;
    assert!(
        matches!(result, Err(AppError::NoEligibleAgents(_))),
        "expected NoEligibleAgents, got {result:?}"
    );
}

#[tokio::test]
async fn smart_dispatch_prefers_skill_overlap() {
    let h = harness().await;
    let mut specialist = add_worker(&h, "w-rust", WorkerMode::Ephemeral).await;
    specialist.capabilities.skills = vec!["rust".into()];
    h.agents
        .update(&specialist.id.clone(), specialist)
        .await
        .expect("update agent");
    add_worker(&h, "w-generalist", WorkerMode::Ephemeral).await;

    let mut task = add_task(&h, "T-1", "Port parser", TaskPriority::Normal).await;
    task.tags = vec!["rust".into()];
    h.tasks.update(&task.id.clone(), task).await.expect("update task");

    let receipt = h
        .dispatch
        .smart_dispatch("T-1", SmartDispatchOptions::default())
        .await
        .expect("smart dispatch");
    assert_eq!(receipt.agent.id, "w-rust");
}

#[tokio::test]
async fn smart_dispatch_skips_workers_without_capacity() {
    let h = harness().await;
    add_worker(&h, "w-busy", WorkerMode::Ephemeral).await;
    add_worker(&h, "w-free", WorkerMode::Ephemeral).await;

    // Saturate w-busy's default capacity of one.
    add_task(&h, "T-0", "Existing work", TaskPriority::Normal).await;
    h.assignment
        .assign_to_agent("T-0", "w-busy", Default::default())
        .await
        .expect("assign");
    h.assignment
        .start_task("T-0", None)
        .await
        .expect("start task");

    add_task(&h, "T-1", "New work", TaskPriority::Normal).await;
    let receipt = h
        .dispatch
        .smart_dispatch("T-1", SmartDispatchOptions::default())
        .await
        .expect("smart dispatch");
    assert_eq!(receipt.agent.id, "w-free");
}

#[tokio::test]
async fn excluded_agent_is_never_selected() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    add_task(&h, "T-1", "Anything", TaskPriority::Normal).await;

    let result = h
        .dispatch
        .smart_dispatch(
            "T-1",
            SmartDispatchOptions {
                exclude_agent: Some("w1".into()),
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::NoEligibleAgents(_))));
}

#[tokio::test]
async fn get_candidates_previews_without_dispatching() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    add_task(&h, "T-1", "Anything", TaskPriority::Normal).await;

    let candidates = h
        .dispatch
        .get_candidates("T-1", &SmartDispatchOptions::default())
        .await
        .expect("candidates");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].agent.id, "w1");

    // Preview must not assign.
    let task = h.tasks.get("T-1").await.expect("get").expect("task");
    assert_eq!(task.assignment_status(), AssignmentStatus::Unassigned);
}

#[tokio::test]
async fn unassigned_and_assigned_listings_are_disjoint() {
    let h = harness().await;
    add_worker(&h, "w1", WorkerMode::Ephemeral).await;
    for n in 0..4 {
        add_task(&h, &format!("T-{n}"), "Work item", TaskPriority::Normal).await;
    }
    h.assignment
        .assign_to_agent("T-1", "w1", Default::default())
        .await
        .expect("assign");
    h.assignment
        .assign_to_agent("T-3", "w1", Default::default())
        .await
        .expect("assign");

    let unassigned = h.assignment.get_unassigned_tasks().await.expect("unassigned");
    let assigned = h
        .assignment
        .list_assignments(Some(AssignmentStatus::Assigned))
        .await
        .expect("assigned");

    for task in &unassigned {
        assert!(
            !assigned.iter().any(|other| other.id == task.id),
            "task {} appears in both listings",
            task.id
        );
    }
    assert_eq!(unassigned.len(), 2);
    assert_eq!(assigned.len(), 2);
}
