//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::health::IssueSeverity;
use crate::{AppError, Result};

/// Bounds for the daemon poll interval, milliseconds.
const MIN_POLL_INTERVAL_MS: u64 = 1_000;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// Dispatch daemon cadence settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DaemonConfig {
    /// Interval between poll cycles; clamped to [1000, 60000] ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum unread inbox items routed per agent per cycle.
    #[serde(default = "default_inbox_batch_size")]
    pub inbox_batch_size: usize,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_inbox_batch_size() -> usize {
    50
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            inbox_batch_size: default_inbox_batch_size(),
        }
    }
}

impl DaemonConfig {
    /// Poll interval clamped to the supported range.
    ///
    /// Out-of-range values are accepted from config but clamped here with
    /// a warning rather than rejected.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        let clamped = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        if clamped != self.poll_interval_ms {
            warn!(
                configured = self.poll_interval_ms,
                clamped, "poll_interval_ms outside supported range"
            );
        }
        Duration::from_millis(clamped)
    }
}

/// Health detection thresholds. All values are independent; none derives
/// from another.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Seconds without output before a `no_output` issue is raised.
    #[serde(default = "default_no_output_threshold")]
    pub no_output_threshold_seconds: u64,
    /// Rolling window for counting errors, seconds.
    #[serde(default = "default_error_window")]
    pub error_window_seconds: u64,
    /// Errors within the window that trigger a `repeated_errors` issue.
    #[serde(default = "default_error_count_threshold")]
    pub error_count_threshold: u32,
    /// Pings sent before a stalled agent is escalated.
    #[serde(default = "default_max_ping_attempts")]
    pub max_ping_attempts: u32,
    /// Ping message delivered to a silent session.
    #[serde(default = "default_ping_message")]
    pub ping_message: String,
    /// Severity attached to `no_output` issues.
    #[serde(default = "default_warning_severity")]
    pub no_output_severity: IssueSeverity,
    /// Severity attached to `repeated_errors` issues.
    #[serde(default = "default_warning_severity")]
    pub repeated_errors_severity: IssueSeverity,
}

fn default_warning_severity() -> IssueSeverity {
    IssueSeverity::Warning
}

fn default_no_output_threshold() -> u64 {
    300
}

fn default_error_window() -> u64 {
    120
}

fn default_error_count_threshold() -> u32 {
    5
}

fn default_max_ping_attempts() -> u32 {
    3
}

fn default_ping_message() -> String {
    "Are you still working? Reply or continue with the current task.".into()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            no_output_threshold_seconds: default_no_output_threshold(),
            error_window_seconds: default_error_window(),
            error_count_threshold: default_error_count_threshold(),
            max_ping_attempts: default_max_ping_attempts(),
            ping_message: default_ping_message(),
            no_output_severity: default_warning_severity(),
            repeated_errors_severity: default_warning_severity(),
        }
    }
}

/// Steward scheduler settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StewardConfig {
    /// Timeout for one steward execution, seconds.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_seconds: u64,
    /// Execution-history entries kept per steward; oldest evicted.
    #[serde(default = "default_max_history")]
    pub max_history_per_steward: usize,
    /// Register and start all stewards at construction.
    #[serde(default)]
    pub start_immediately: bool,
}

fn default_execution_timeout() -> u64 {
    300
}

fn default_max_history() -> usize {
    20
}

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            execution_timeout_seconds: default_execution_timeout(),
            max_history_per_steward: default_max_history(),
            start_immediately: false,
        }
    }
}

/// Dispatch candidate filtering.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Minimum scorer value for smart-dispatch eligibility.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

fn default_min_score() -> f64 {
    0.25
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Repository root that worktrees are created under.
    pub workspace_root: PathBuf,
    /// Agent host CLI binary (e.g. `claude`).
    pub worker_cli: String,
    /// Default arguments for the host CLI.
    #[serde(default)]
    pub worker_cli_args: Vec<String>,
    /// Dispatch daemon cadence.
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Health detection thresholds.
    #[serde(default)]
    pub health: HealthConfig,
    /// Steward scheduler settings.
    #[serde(default)]
    pub steward: StewardConfig,
    /// Dispatch candidate filtering.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Hours a terminated session is retained before pruning.
    #[serde(default = "default_session_retention_hours")]
    pub session_retention_hours: u32,
}

fn default_session_retention_hours() -> u32 {
    24
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Retention window for terminated sessions.
    #[must_use]
    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.session_retention_hours) * 3_600)
    }

    fn validate(&mut self) -> Result<()> {
        if self.worker_cli.is_empty() {
            return Err(AppError::Config("worker_cli must not be empty".into()));
        }

        if self.health.error_count_threshold == 0 {
            return Err(AppError::Config(
                "health.error_count_threshold must be greater than zero".into(),
            ));
        }

        if self.steward.max_history_per_steward == 0 {
            return Err(AppError::Config(
                "steward.max_history_per_steward must be greater than zero".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
