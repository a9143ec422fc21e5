//! Health issue model for agent failure detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Detected failure condition category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// No output observed past the configured threshold.
    NoOutput,
    /// Error count within the rolling window reached the threshold.
    RepeatedErrors,
    /// The agent process exited abnormally.
    ProcessCrashed,
    /// The agent has a session but is absent from the registry.
    MissingAgent,
}

/// Severity attached to a detected issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Needs attention but the agent may self-recover.
    Warning,
    /// Needs corrective action.
    Critical,
}

/// Corrective action applicable to an issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthAction {
    /// Keep watching; no side effects.
    Monitor,
    /// Send a ping message into the agent's session.
    SendPing,
    /// Stop the session and let the daemon respawn the agent.
    Restart,
    /// Unassign the current task and dispatch it elsewhere.
    Reassign,
    /// Message the first director-role agent.
    NotifyDirector,
}

/// A detected, deduplicated failure condition for one agent.
///
/// Issues are keyed by `(agent_id, issue_type)`; repeated detection bumps
/// `occurrence_count` and `last_seen_at` in place instead of creating a
/// duplicate record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthIssue {
    /// Stable identifier usable from the transport layer.
    pub id: String,
    /// Affected agent.
    pub agent_id: String,
    /// Condition category; one active issue per category per agent.
    pub issue_type: IssueType,
    /// Severity from configuration.
    pub severity: IssueSeverity,
    /// Human-readable description of the detection.
    pub description: String,
    /// First detection time.
    pub detected_at: DateTime<Utc>,
    /// Most recent re-detection time.
    pub last_seen_at: DateTime<Utc>,
    /// Number of detections since the issue became active.
    pub occurrence_count: u32,
}

impl HealthIssue {
    /// Construct a freshly detected issue.
    #[must_use]
    pub fn new(
        agent_id: String,
        issue_type: IssueType,
        severity: IssueSeverity,
        description: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            issue_type,
            severity,
            description,
            detected_at: now,
            last_seen_at: now,
            occurrence_count: 1,
        }
    }

    /// Record a re-detection of the same condition.
    pub fn touch(&mut self, description: String) {
        self.description = description;
        self.last_seen_at = Utc::now();
        self.occurrence_count += 1;
    }
}

/// Outcome of `take_action`; failures here are local results, not errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ActionReport {
    /// Whether the action was carried out.
    pub ok: bool,
    /// What happened, for the operator.
    pub detail: String,
    /// Set when the action tripped an escalation (e.g. ping budget spent).
    pub escalated: bool,
}

impl ActionReport {
    /// Successful action report.
    #[must_use]
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
            escalated: false,
        }
    }

    /// Failed action report.
    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
            escalated: false,
        }
    }
}
