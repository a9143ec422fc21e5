//! Session model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::agent::{AgentRole, WorkerMode};

/// Lifecycle status for an agent session.
///
/// Valid transitions: `Starting → Running → {Suspended, Terminating} →
/// Terminated`. Any state may move directly to `Terminated` on crash or
/// process exit. All other transitions are rejected (fail-closed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Process spawn requested, not yet confirmed.
    Starting,
    /// Agent process is live.
    Running,
    /// Process stopped with a resume handle retained.
    Suspended,
    /// Stop requested, awaiting process exit.
    Terminating,
    /// Terminal state.
    Terminated,
}

impl SessionStatus {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Terminated {
            return true;
        }
        matches!(
            (self, next),
            (Self::Starting, Self::Running)
                | (Self::Running, Self::Suspended | Self::Terminating)
                | (Self::Suspended | Self::Starting, Self::Terminating)
        )
    }

    /// Whether this status counts as a live session for exclusivity checks.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::Terminated
    }
}

/// Why a session reached `Terminated`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Explicit `stop_session`.
    Stopped,
    /// Suspended with a resume handle retained.
    Suspended,
    /// Process exited cleanly on its own.
    Exited,
    /// Process exited with a failure code or signal.
    Crashed,
    /// The spawner failed to start the process.
    SpawnFailed,
}

/// One lifecycle instance of a spawned agent process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Owning agent id.
    pub agent_id: String,
    /// Role snapshot at spawn time.
    pub role: AgentRole,
    /// Worker-mode snapshot at spawn time.
    pub worker_mode: Option<WorkerMode>,
    /// OS process id, once known.
    pub pid: Option<u32>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Directory the process runs in.
    pub working_dir: String,
    /// Worktree path when the session is rooted in one.
    pub worktree: Option<String>,
    /// External session handle usable for resumption.
    pub resume_handle: Option<String>,
    /// Spawn timestamp.
    pub started_at: DateTime<Utc>,
    /// Last observed activity.
    pub last_activity_at: DateTime<Utc>,
    /// Terminal timestamp, set exactly once.
    pub terminated_at: Option<DateTime<Utc>>,
    /// Why the session terminated.
    pub termination_reason: Option<TerminationReason>,
}

impl Session {
    /// Construct a new session in `Starting` state.
    #[must_use]
    pub fn new(
        agent_id: String,
        role: AgentRole,
        worker_mode: Option<WorkerMode>,
        working_dir: String,
        worktree: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            role,
            worker_mode,
            pid: None,
            status: SessionStatus::Starting,
            working_dir,
            worktree,
            resume_handle: None,
            started_at: now,
            last_activity_at: now,
            terminated_at: None,
            termination_reason: None,
        }
    }

    /// Whether the session has not reached the terminal state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
