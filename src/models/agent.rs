//! Agent registry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::steward::EventSpec;

/// Role of a registered agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Oversees the fleet; receives escalations.
    Director,
    /// Executes dispatched tasks.
    Worker,
    /// Runs scheduled or event-triggered maintenance.
    Steward,
}

/// Session continuity mode for worker agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// One session per task; no mailbox continuity between sessions.
    Ephemeral,
    /// Long-lived session; undelivered messages are held for the next one.
    Persistent,
}

/// Skill and concurrency descriptor used for dispatch ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CapabilityProfile {
    /// Free-form skill tags (e.g. `"refactoring"`, `"sql"`).
    #[serde(default)]
    pub skills: Vec<String>,
    /// Programming languages the agent works in.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Maximum simultaneously in-progress tasks; `None` means 1.
    #[serde(default)]
    pub max_concurrent_tasks: Option<u32>,
}

/// Maintenance profile carried by steward-role agents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StewardProfile {
    /// Focus area, matched against task tags by the workflow-task poll.
    pub focus: String,
    /// Optional cron expression for scheduled execution.
    #[serde(default)]
    pub schedule: Option<String>,
    /// Event subscriptions that trigger execution.
    #[serde(default)]
    pub events: Vec<EventSpec>,
}

/// A registered actor capable of running a session.
///
/// Agents are created by registration and never deleted; deactivation
/// clears `active` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Agent {
    /// Unique record identifier.
    pub id: String,
    /// Display name, also used in branch/worktree naming.
    pub name: String,
    /// Closed role variant.
    pub role: AgentRole,
    /// Continuity mode; meaningful for workers only.
    #[serde(default)]
    pub worker_mode: Option<WorkerMode>,
    /// Maintenance profile; present on stewards only.
    #[serde(default)]
    pub steward: Option<StewardProfile>,
    /// Dispatch-ranking descriptor.
    #[serde(default)]
    pub capabilities: CapabilityProfile,
    /// Agent id this agent reports to.
    #[serde(default)]
    pub reports_to: Option<String>,
    /// Whether the agent participates in dispatch and polling.
    pub active: bool,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Last registry update.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Construct a worker agent with defaults.
    #[must_use]
    pub fn worker(id: impl Into<String>, name: impl Into<String>, mode: WorkerMode) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            role: AgentRole::Worker,
            worker_mode: Some(mode),
            steward: None,
            capabilities: CapabilityProfile::default(),
            reports_to: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct a director agent.
    #[must_use]
    pub fn director(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            role: AgentRole::Director,
            worker_mode: None,
            steward: None,
            capabilities: CapabilityProfile::default(),
            reports_to: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Construct a steward agent with the given maintenance profile.
    #[must_use]
    pub fn steward(
        id: impl Into<String>,
        name: impl Into<String>,
        profile: StewardProfile,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            role: AgentRole::Steward,
            worker_mode: None,
            steward: Some(profile),
            capabilities: CapabilityProfile::default(),
            reports_to: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this agent is an ephemeral worker.
    #[must_use]
    pub fn is_ephemeral_worker(&self) -> bool {
        self.role == AgentRole::Worker && self.worker_mode == Some(WorkerMode::Ephemeral)
    }

    /// Whether undeliverable non-dispatch messages are held for a later
    /// session rather than dropped.
    ///
    /// Directors and persistent workers have mailbox continuity; ephemeral
    /// workers and stewards have no "next session" to deliver to.
    #[must_use]
    pub fn retains_inbox(&self) -> bool {
        match self.role {
            AgentRole::Director => true,
            AgentRole::Steward => false,
            AgentRole::Worker => matches!(self.worker_mode, Some(WorkerMode::Persistent)),
        }
    }

    /// Effective concurrency limit (default 1 when unset).
    #[must_use]
    pub fn max_concurrent_tasks(&self) -> u32 {
        self.capabilities.max_concurrent_tasks.unwrap_or(1)
    }
}
