//! Domain model unit tests: derived assignment status, the session
//! state machine, and inbox-retention rules.

use chrono::Utc;

use agent_foreman::models::agent::{Agent, AgentRole, WorkerMode};
use agent_foreman::models::session::{SessionStatus, TerminationReason};
use agent_foreman::models::task::{
    AssignmentStatus, MergeStatus, Task, TaskPriority, TaskStatus,
};

// ── Derived assignment status ────────────────────────────────────────

#[test]
fn fresh_task_is_unassigned() {
    let task = Task::new("T-1", "Anything", TaskPriority::Normal);
    assert_eq!(task.assignment_status(), AssignmentStatus::Unassigned);
    assert!(task.is_assignable());
}

#[test]
fn assignee_without_start_is_assigned() {
    let mut task = Task::new("T-1", "Anything", TaskPriority::Normal);
    task.assignee = Some("w1".into());
    assert_eq!(task.assignment_status(), AssignmentStatus::Assigned);
    assert!(!task.is_assignable());
}

#[test]
fn started_assignee_is_in_progress() {
    let mut task = Task::new("T-1", "Anything", TaskPriority::Normal);
    task.assignee = Some("w1".into());
    task.work.started_at = Some(Utc::now());
    task.status = TaskStatus::InProgress;
    assert_eq!(task.assignment_status(), AssignmentStatus::InProgress);
}

#[test]
fn closed_task_is_completed_even_with_assignee() {
    let mut task = Task::new("T-1", "Anything", TaskPriority::Normal);
    task.assignee = Some("w1".into());
    task.work.started_at = Some(Utc::now());
    task.status = TaskStatus::Closed;
    assert_eq!(task.assignment_status(), AssignmentStatus::Completed);
}

#[test]
fn merged_wins_over_everything() {
    let mut task = Task::new("T-1", "Anything", TaskPriority::Normal);
    task.status = TaskStatus::Closed;
    task.work.merge_status = Some(MergeStatus::Merged);
    assert_eq!(task.assignment_status(), AssignmentStatus::Merged);
}

#[test]
fn pending_merge_does_not_imply_merged() {
    let mut task = Task::new("T-1", "Anything", TaskPriority::Normal);
    task.status = TaskStatus::Closed;
    task.work.merge_status = Some(MergeStatus::Pending);
    assert_eq!(task.assignment_status(), AssignmentStatus::Completed);
}

#[test]
fn priorities_order_low_to_urgent() {
    assert!(TaskPriority::Low < TaskPriority::Normal);
    assert!(TaskPriority::Normal < TaskPriority::High);
    assert!(TaskPriority::High < TaskPriority::Urgent);
}

// ── Session state machine ────────────────────────────────────────────

#[test]
fn session_transitions_follow_the_lifecycle() {
    use SessionStatus::{Running, Starting, Suspended, Terminated, Terminating};

    assert!(Starting.can_transition_to(Running));
    assert!(Running.can_transition_to(Suspended));
    assert!(Running.can_transition_to(Terminating));
    assert!(Suspended.can_transition_to(Terminating));
    assert!(Terminating.can_transition_to(Terminated));

    // Crash/exit may jump to terminated from anywhere.
    for status in [Starting, Running, Suspended, Terminating] {
        assert!(status.can_transition_to(Terminated));
    }
}

#[test]
fn invalid_session_transitions_are_rejected() {
    use SessionStatus::{Running, Starting, Suspended, Terminated, Terminating};

    assert!(!Terminated.can_transition_to(Running));
    assert!(!Terminated.can_transition_to(Terminating));
    assert!(!Suspended.can_transition_to(Running));
    assert!(!Terminating.can_transition_to(Running));
    assert!(!Starting.can_transition_to(Suspended));
    assert!(!Running.can_transition_to(Starting));
}

#[test]
fn terminated_is_the_only_inactive_status() {
    assert!(SessionStatus::Starting.is_active());
    assert!(SessionStatus::Running.is_active());
    assert!(SessionStatus::Suspended.is_active());
    assert!(SessionStatus::Terminating.is_active());
    assert!(!SessionStatus::Terminated.is_active());
}

#[test]
fn new_session_snapshots_role_and_mode() {
    let session = agent_foreman::models::session::Session::new(
        "w1".into(),
        AgentRole::Worker,
        Some(WorkerMode::Ephemeral),
        "/ws".into(),
        None,
    );
    assert_eq!(session.status, SessionStatus::Starting);
    assert_eq!(session.role, AgentRole::Worker);
    assert!(session.terminated_at.is_none());
    assert_ne!(session.termination_reason, Some(TerminationReason::Stopped));
}

// ── Agent helpers ────────────────────────────────────────────────────

#[test]
fn inbox_retention_depends_on_role_and_mode() {
    assert!(Agent::director("d", "d").retains_inbox());
    assert!(Agent::worker("w", "w", WorkerMode::Persistent).retains_inbox());
    assert!(!Agent::worker("w", "w", WorkerMode::Ephemeral).retains_inbox());
    let steward = Agent::steward(
        "s",
        "s",
        agent_foreman::models::agent::StewardProfile {
            focus: "docs".into(),
            schedule: None,
            events: Vec::new(),
        },
    );
    assert!(!steward.retains_inbox());
}

#[test]
fn max_concurrent_tasks_defaults_to_one() {
    let mut worker = Agent::worker("w", "w", WorkerMode::Ephemeral);
    assert_eq!(worker.max_concurrent_tasks(), 1);
    worker.capabilities.max_concurrent_tasks = Some(4);
    assert_eq!(worker.max_concurrent_tasks(), 4);
}

#[test]
fn only_ephemeral_workers_are_auto_spawnable() {
    assert!(Agent::worker("w", "w", WorkerMode::Ephemeral).is_ephemeral_worker());
    assert!(!Agent::worker("w", "w", WorkerMode::Persistent).is_ephemeral_worker());
    assert!(!Agent::director("d", "d").is_ephemeral_worker());
}
