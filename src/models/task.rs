//! Task model with derived assignment status and orchestration metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Ready for assignment.
    Open,
    /// Actively being worked by the assignee.
    InProgress,
    /// Waiting on an external dependency.
    Blocked,
    /// Intentionally postponed.
    Deferred,
    /// Work finished.
    Closed,
    /// Soft-deleted; never assigned or listed.
    Tombstone,
}

/// Dispatch priority, ordered lowest to highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// Default priority.
    Normal,
    /// Preferred over normal work.
    High,
    /// Dispatched before everything else.
    Urgent,
}

/// Merge state for a completed task's branch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Merge requested, not yet landed.
    Pending,
    /// Branch merged into the base.
    Merged,
    /// Merge attempt failed; needs manual resolution.
    Failed,
}

/// Assignment state derived from stored task fields; never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// No assignee.
    Unassigned,
    /// Assigned but not started.
    Assigned,
    /// Assignee has started work.
    InProgress,
    /// Task closed.
    Completed,
    /// Task closed and branch merged.
    Merged,
}

/// One entry in a task's append-only handoff history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HandoffEntry {
    /// Session that performed the handoff, when known.
    pub session_id: Option<String>,
    /// Context message left for the next assignee.
    pub message: String,
    /// Branch carried over for continuation.
    pub branch: Option<String>,
    /// Worktree path carried over for continuation.
    pub worktree: Option<String>,
    /// When the handoff happened.
    pub handoff_at: DateTime<Utc>,
}

/// Orchestrator metadata sub-record attached to every task.
///
/// Versioned so external writers can be validated at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkContext {
    /// Metadata schema version.
    pub version: u32,
    /// Agent currently responsible, mirrors `Task::assignee`.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    /// Working branch name.
    #[serde(default)]
    pub branch: Option<String>,
    /// Isolated checkout path.
    #[serde(default)]
    pub worktree_path: Option<String>,
    /// Session currently working the task.
    #[serde(default)]
    pub session_id: Option<String>,
    /// When work started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When work completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Merge state of the working branch.
    #[serde(default)]
    pub merge_status: Option<MergeStatus>,
    /// Append-only handoff history; extended, never rewritten.
    #[serde(default)]
    pub handoff_history: Vec<HandoffEntry>,
}

impl Default for WorkContext {
    fn default() -> Self {
        Self {
            version: 1,
            assigned_agent: None,
            branch: None,
            worktree_path: None,
            session_id: None,
            started_at: None,
            completed_at: None,
            merge_status: None,
            handoff_history: Vec::new(),
        }
    }
}

/// A unit of work with status, priority, and assignment metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Unique record identifier.
    pub id: String,
    /// Human-readable title, slugged into branch names.
    pub title: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Dispatch priority.
    pub priority: TaskPriority,
    /// Current assignee agent id; at most one at a time.
    #[serde(default)]
    pub assignee: Option<String>,
    /// Routing tags, matched by the workflow-task poll.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Orchestrator metadata.
    #[serde(default)]
    pub work: WorkContext,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct an open task with the given priority.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: TaskPriority) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Open,
            priority,
            assignee: None,
            tags: Vec::new(),
            work: WorkContext::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Derive the assignment status from stored fields.
    ///
    /// Recomputing must always yield the value implied by
    /// {assignee presence, task status, `started_at`, `merge_status`} alone.
    #[must_use]
    pub fn assignment_status(&self) -> AssignmentStatus {
        if self.work.merge_status == Some(MergeStatus::Merged) {
            return AssignmentStatus::Merged;
        }
        if self.status == TaskStatus::Closed {
            return AssignmentStatus::Completed;
        }
        match (&self.assignee, self.work.started_at) {
            (Some(_), Some(_)) => AssignmentStatus::InProgress,
            (Some(_), None) => AssignmentStatus::Assigned,
            (None, _) => AssignmentStatus::Unassigned,
        }
    }

    /// Whether the task can still be picked up by dispatch.
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        self.assignee.is_none() && self.status == TaskStatus::Open
    }

    /// Most recent handoff entry, if any.
    #[must_use]
    pub fn last_handoff(&self) -> Option<&HandoffEntry> {
        self.work.handoff_history.last()
    }
}
