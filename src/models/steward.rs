//! Steward trigger registrations and execution history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event subscription definition carried on a steward's profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EventSpec {
    /// Event name to match.
    pub name: String,
    /// Optional `key=value` condition checked against the event payload.
    #[serde(default)]
    pub condition: Option<String>,
}

/// A registered cron trigger for one steward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScheduledJob {
    /// Steward agent id.
    pub steward_id: String,
    /// Cron expression (seconds-resolution, six or seven fields).
    pub expression: String,
    /// Last time this job fired, if ever.
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// A registered event trigger for one steward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EventSubscription {
    /// Steward agent id.
    pub steward_id: String,
    /// Event name to match.
    pub event: String,
    /// Optional `key=value` condition checked against the payload.
    #[serde(default)]
    pub condition: Option<String>,
}

/// What caused a steward execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StewardTrigger {
    /// Fired by the cron schedule.
    Cron {
        /// The matched expression.
        expression: String,
    },
    /// Fired by a published event.
    Event {
        /// The published event name.
        name: String,
    },
    /// Invoked directly by an operator.
    Manual,
}

impl StewardTrigger {
    /// Short label for logging and prompts.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cron { .. } => "cron",
            Self::Event { .. } => "event",
            Self::Manual => "manual",
        }
    }
}

/// Result of one steward execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Completed; carries the runner's summary.
    Success(String),
    /// The runner returned an error.
    Failure(String),
    /// The configured execution timeout elapsed.
    TimedOut,
}

/// One entry in a steward's bounded, append-only execution history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionRecord {
    /// Unique record identifier.
    pub id: String,
    /// Steward agent id.
    pub steward_id: String,
    /// Trigger context for this run.
    pub trigger: StewardTrigger,
    /// Whether an operator invoked it directly.
    pub manual: bool,
    /// Execution start.
    pub started_at: DateTime<Utc>,
    /// Execution end, absent only while in flight.
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome, absent only while in flight.
    pub outcome: Option<ExecutionOutcome>,
}

impl ExecutionRecord {
    /// Construct an in-flight execution record.
    #[must_use]
    pub fn begin(steward_id: String, trigger: StewardTrigger, manual: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            steward_id,
            trigger,
            manual,
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
        }
    }

    /// Seal the record with its outcome.
    pub fn finish(&mut self, outcome: ExecutionOutcome) {
        self.completed_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }
}
