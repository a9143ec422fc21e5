//! Health supervision: activity tracking, failure detection, and
//! corrective action.
//!
//! The [`ActivityLog`] holds per-agent trackers (last output, rolling
//! error window, ping attempts) created on first activity and evicted
//! when the owning session stops. The [`HealthSteward`] evaluates
//! detectors for agents with running sessions, deduplicates issues by
//! `(agent, type)`, and applies corrective actions. Crashes are recorded
//! directly by the consumer task, bypassing periodic evaluation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::capabilities::{Notifier, NotifyMeta, Store};
use crate::config::HealthConfig;
use crate::models::agent::{Agent, AgentRole};
use crate::models::health::{ActionReport, HealthAction, HealthIssue, IssueSeverity, IssueType};
use crate::models::inbox::MessageKind;
use crate::models::session::{SessionStatus, TerminationReason};
use crate::orchestrator::assignment::TaskAssignmentService;
use crate::orchestrator::dispatch::{DispatchService, SmartDispatchOptions};
use crate::orchestrator::session_manager::{SessionExit, SessionManager};
use crate::{AppError, Result};

/// Upper bound on retained error timestamps per agent.
const MAX_TRACKED_ERRORS: usize = 100;

#[derive(Debug, Default, Clone)]
struct AgentActivity {
    last_output_at: Option<DateTime<Utc>>,
    error_times: VecDeque<DateTime<Utc>>,
    ping_attempts: u32,
}

/// Per-agent activity trackers.
///
/// Owned by the health steward; the session manager writes into it from
/// session event forwarders and clears it on `stop_session`.
#[derive(Default)]
pub struct ActivityLog {
    inner: std::sync::RwLock<HashMap<String, AgentActivity>>,
}

impl ActivityLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record structured output: resets the error streak and ping count.
    pub fn record_output(&self, agent_id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            let entry = inner.entry(agent_id.to_owned()).or_default();
            entry.last_output_at = Some(Utc::now());
            entry.error_times.clear();
            entry.ping_attempts = 0;
        }
    }

    /// Record an error occurrence.
    pub fn record_error(&self, agent_id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            let entry = inner.entry(agent_id.to_owned()).or_default();
            entry.error_times.push_back(Utc::now());
            while entry.error_times.len() > MAX_TRACKED_ERRORS {
                entry.error_times.pop_front();
            }
        }
    }

    /// Bump the ping counter, returning the new attempt count.
    pub fn increment_ping(&self, agent_id: &str) -> u32 {
        self.inner.write().map_or(0, |mut inner| {
            let entry = inner.entry(agent_id.to_owned()).or_default();
            entry.ping_attempts += 1;
            entry.ping_attempts
        })
    }

    /// Current ping attempt count.
    #[must_use]
    pub fn ping_attempts(&self, agent_id: &str) -> u32 {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.get(agent_id).map(|entry| entry.ping_attempts))
            .unwrap_or(0)
    }

    /// Last recorded output time.
    #[must_use]
    pub fn last_output(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.get(agent_id).and_then(|entry| entry.last_output_at))
    }

    /// Errors recorded within the trailing window.
    #[must_use]
    pub fn errors_within(&self, agent_id: &str, window: ChronoDuration) -> usize {
        let cutoff = Utc::now() - window;
        self.inner
            .read()
            .ok()
            .and_then(|inner| {
                inner
                    .get(agent_id)
                    .map(|entry| entry.error_times.iter().filter(|at| **at > cutoff).count())
            })
            .unwrap_or(0)
    }

    /// Drop the agent's tracker entirely.
    pub fn clear(&self, agent_id: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.remove(agent_id);
        }
    }

    /// Number of agents currently tracked.
    #[must_use]
    pub fn tracked_agents(&self) -> usize {
        self.inner.read().map_or(0, |inner| inner.len())
    }
}

/// Result of one fleet-wide health check.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Monotonic check number.
    pub check_number: u64,
    /// Agents evaluated this round.
    pub agents_checked: usize,
    /// Issues that became active this round.
    pub new_issues: Vec<HealthIssue>,
    /// Issues whose condition cleared this round.
    pub resolved_issues: Vec<HealthIssue>,
}

/// Aggregate health statistics for the transport layer.
#[derive(Debug, Clone, Copy)]
pub struct HealthStats {
    /// Total health checks run.
    pub checks_run: u64,
    /// Currently active issues.
    pub active_issues: usize,
    /// Agents with activity trackers.
    pub tracked_agents: usize,
}

/// Failure detection and remediation for the agent fleet.
pub struct HealthSteward {
    config: HealthConfig,
    activity: Arc<ActivityLog>,
    agents: Arc<dyn Store<Agent>>,
    sessions: Arc<SessionManager>,
    assignment: Arc<TaskAssignmentService>,
    dispatch: Arc<DispatchService>,
    notifier: Arc<dyn Notifier>,
    issues: RwLock<HashMap<(String, IssueType), HealthIssue>>,
    check_counter: AtomicU64,
}

impl HealthSteward {
    /// Create the steward over its collaborating services.
    #[must_use]
    pub fn new(
        config: HealthConfig,
        activity: Arc<ActivityLog>,
        agents: Arc<dyn Store<Agent>>,
        sessions: Arc<SessionManager>,
        assignment: Arc<TaskAssignmentService>,
        dispatch: Arc<DispatchService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            activity,
            agents,
            sessions,
            assignment,
            dispatch,
            notifier,
            issues: RwLock::new(HashMap::new()),
            check_counter: AtomicU64::new(0),
        }
    }

    /// The shared activity log.
    #[must_use]
    pub fn activity(&self) -> Arc<ActivityLog> {
        Arc::clone(&self.activity)
    }

    /// Record an unconditional `process_crashed` issue for the agent.
    ///
    /// Bypasses periodic evaluation; repeated crashes bump the existing
    /// issue's occurrence count.
    pub async fn record_crash(&self, agent_id: &str, description: &str) -> HealthIssue {
        let mut issues = self.issues.write().await;
        let key = (agent_id.to_owned(), IssueType::ProcessCrashed);
        if let Some(existing) = issues.get_mut(&key) {
            existing.touch(description.to_owned());
            warn!(
                agent_id,
                occurrences = existing.occurrence_count,
                "repeated agent crash"
            );
            return existing.clone();
        }
        let issue = HealthIssue::new(
            agent_id.to_owned(),
            IssueType::ProcessCrashed,
            IssueSeverity::Critical,
            description.to_owned(),
        );
        warn!(agent_id, issue_id = %issue.id, "agent crash recorded");
        issues.insert(key, issue.clone());
        issue
    }

    /// Detector conditions currently true for one agent.
    ///
    /// Only agents with a running session are evaluated; an agent absent
    /// from the registry is itself an issue. An agent can trip more than
    /// one detector simultaneously.
    async fn detect(&self, agent_id: &str) -> Result<Vec<(IssueType, IssueSeverity, String)>> {
        let mut found = Vec::new();

        let Some(_) = self.agents.get(agent_id).await? else {
            found.push((
                IssueType::MissingAgent,
                IssueSeverity::Critical,
                format!("agent {agent_id} has a session but is not in the registry"),
            ));
            return Ok(found);
        };

        let session = self.sessions.get_active_session(agent_id).await;
        let Some(session) = session.filter(|s| s.status == SessionStatus::Running) else {
            return Ok(found);
        };

        let no_output_after = ChronoDuration::seconds(
            i64::try_from(self.config.no_output_threshold_seconds).unwrap_or(i64::MAX),
        );
        // A session that has never produced output is measured from its
        // start time.
        let last = self
            .activity
            .last_output(agent_id)
            .unwrap_or(session.started_at);
        let idle = Utc::now() - last;
        if idle > no_output_after {
            found.push((
                IssueType::NoOutput,
                self.config.no_output_severity,
                format!("no output for {}s", idle.num_seconds()),
            ));
        }

        let window = ChronoDuration::seconds(
            i64::try_from(self.config.error_window_seconds).unwrap_or(i64::MAX),
        );
        let errors = self.activity.errors_within(agent_id, window);
        if errors >= self.config.error_count_threshold as usize {
            found.push((
                IssueType::RepeatedErrors,
                self.config.repeated_errors_severity,
                format!(
                    "{errors} errors within {}s",
                    self.config.error_window_seconds
                ),
            ));
        }

        Ok(found)
    }

    /// Evaluate one agent, updating the active-issue set.
    ///
    /// Returns the agent's currently active issues.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the registry lookup fails.
    pub async fn check_agent(&self, agent_id: &str) -> Result<Vec<HealthIssue>> {
        let detections = self.detect(agent_id).await?;
        self.apply_detections(agent_id, detections).await;
        let issues = self.issues.read().await;
        Ok(issues
            .values()
            .filter(|issue| issue.agent_id == agent_id)
            .cloned()
            .collect())
    }

    /// Upsert detected conditions and auto-resolve cleared ones.
    ///
    /// Crash issues are exempt from auto-resolution: that condition
    /// cannot clear by observation.
    async fn apply_detections(
        &self,
        agent_id: &str,
        detections: Vec<(IssueType, IssueSeverity, String)>,
    ) -> (Vec<HealthIssue>, Vec<HealthIssue>) {
        let mut new_issues = Vec::new();
        let mut resolved = Vec::new();
        let detected_types: Vec<IssueType> =
            detections.iter().map(|(issue_type, _, _)| *issue_type).collect();

        let mut issues = self.issues.write().await;
        for (issue_type, severity, description) in detections {
            let key = (agent_id.to_owned(), issue_type);
            if let Some(existing) = issues.get_mut(&key) {
                existing.touch(description);
            } else {
                let issue =
                    HealthIssue::new(agent_id.to_owned(), issue_type, severity, description);
                info!(agent_id, ?issue_type, issue_id = %issue.id, "health issue detected");
                issues.insert(key, issue.clone());
                new_issues.push(issue);
            }
        }

        let cleared: Vec<(String, IssueType)> = issues
            .keys()
            .filter(|(owner, issue_type)| {
                owner == agent_id
                    && *issue_type != IssueType::ProcessCrashed
                    && !detected_types.contains(issue_type)
            })
            .cloned()
            .collect();
        for key in cleared {
            if let Some(issue) = issues.remove(&key) {
                info!(agent_id, issue_type = ?key.1, "health issue resolved");
                resolved.push(issue);
            }
        }

        (new_issues, resolved)
    }

    /// Evaluate every agent that currently has a session.
    ///
    /// Diffs the previous and new active-issue sets and increments the
    /// monotonic check counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if a registry lookup fails.
    pub async fn run_health_check(&self) -> Result<HealthReport> {
        let span = info_span!("run_health_check");
        let _guard = span.enter();

        let mut agent_ids: Vec<String> = self
            .sessions
            .list_active()
            .await
            .into_iter()
            .map(|session| session.agent_id)
            .collect();
        agent_ids.sort();
        agent_ids.dedup();

        let mut new_issues = Vec::new();
        let mut resolved_issues = Vec::new();
        for agent_id in &agent_ids {
            let detections = self.detect(agent_id).await?;
            let (fresh, cleared) = self.apply_detections(agent_id, detections).await;
            new_issues.extend(fresh);
            resolved_issues.extend(cleared);
        }

        let check_number = self.check_counter.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            check_number,
            agents = agent_ids.len(),
            new = new_issues.len(),
            resolved = resolved_issues.len(),
            "health check complete"
        );
        Ok(HealthReport {
            check_number,
            agents_checked: agent_ids.len(),
            new_issues,
            resolved_issues,
        })
    }

    /// All active issues, oldest first.
    pub async fn active_issues(&self) -> Vec<HealthIssue> {
        let mut issues: Vec<HealthIssue> = self.issues.read().await.values().cloned().collect();
        issues.sort_by_key(|issue| issue.detected_at);
        issues
    }

    /// Aggregate statistics for the transport layer.
    pub async fn stats(&self) -> HealthStats {
        HealthStats {
            checks_run: self.check_counter.load(Ordering::Relaxed),
            active_issues: self.issues.read().await.len(),
            tracked_agents: self.activity.tracked_agents(),
        }
    }

    /// Remove an issue by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown issue id.
    pub async fn resolve_issue(&self, issue_id: &str) -> Result<HealthIssue> {
        let mut issues = self.issues.write().await;
        let key = issues
            .iter()
            .find(|(_, issue)| issue.id == issue_id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| AppError::NotFound(format!("issue {issue_id} not found")))?;
        issues
            .remove(&key)
            .ok_or_else(|| AppError::NotFound(format!("issue {issue_id} not found")))
    }

    /// Apply a corrective action to an issue.
    ///
    /// Acting on an unknown issue id yields a failed [`ActionReport`],
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` only for storage-layer failures inside
    /// the action itself.
    pub async fn take_action(&self, issue_id: &str, action: HealthAction) -> Result<ActionReport> {
        let span = info_span!("take_action", issue_id, ?action);
        let _guard = span.enter();

        let issue = {
            let issues = self.issues.read().await;
            issues.values().find(|issue| issue.id == issue_id).cloned()
        };
        let Some(issue) = issue else {
            return Ok(ActionReport::failed("Issue not found"));
        };

        match action {
            HealthAction::Monitor => {
                info!(agent_id = %issue.agent_id, "monitoring issue");
                Ok(ActionReport::ok("monitoring"))
            }
            HealthAction::SendPing => self.ping_agent(&issue).await,
            HealthAction::Restart => self.restart_agent(&issue).await,
            HealthAction::Reassign => match self.reassign_current_task(&issue.agent_id).await {
                Ok(task_id) => Ok(ActionReport::ok(format!("task {task_id} reassigned"))),
                Err(err) => Ok(ActionReport::failed(err.to_string())),
            },
            HealthAction::NotifyDirector => self.notify_director(&issue).await,
        }
    }

    async fn ping_agent(&self, issue: &HealthIssue) -> Result<ActionReport> {
        let Some(session) = self.sessions.get_active_session(&issue.agent_id).await else {
            return Ok(ActionReport::failed("agent has no active session"));
        };
        if let Err(err) = self
            .sessions
            .send_input(&session.id, &self.config.ping_message)
            .await
        {
            return Ok(ActionReport::failed(format!("ping delivery failed: {err}")));
        }

        let attempts = self.activity.increment_ping(&issue.agent_id);
        info!(agent_id = %issue.agent_id, attempts, "ping sent");

        if attempts > self.config.max_ping_attempts {
            let escalation = self.notify_director(issue).await?;
            let mut report = ActionReport::ok(format!(
                "ping {attempts} exceeded budget of {}; escalated to director",
                self.config.max_ping_attempts
            ));
            report.escalated = true;
            report.ok = escalation.ok;
            return Ok(report);
        }
        Ok(ActionReport::ok(format!("ping {attempts} sent")))
    }

    async fn restart_agent(&self, issue: &HealthIssue) -> Result<ActionReport> {
        let Some(session) = self.sessions.get_active_session(&issue.agent_id).await else {
            return Ok(ActionReport::failed("agent has no active session"));
        };
        match self.sessions.stop_session(&session.id).await {
            Ok(_) => {
                // The availability poll respawns the agent; the acted-on
                // issue is spent.
                let _ = self.resolve_issue(&issue.id).await;
                Ok(ActionReport::ok(format!(
                    "session {} stopped; daemon will respawn",
                    session.id
                )))
            }
            Err(err) => Ok(ActionReport::failed(format!("restart failed: {err}"))),
        }
    }

    /// Unassign the agent's current task and dispatch it elsewhere.
    ///
    /// The task is left unassigned when no other agent is eligible.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the agent has no current task,
    /// or `AppError::NoEligibleAgents` ("No suitable agent…") when
    /// nobody else can take it.
    pub async fn reassign_task(&self, agent_id: &str, task_id: &str) -> Result<String> {
        self.assignment.unassign_task(task_id).await?;
        match self
            .dispatch
            .smart_dispatch(
                task_id,
                SmartDispatchOptions {
                    exclude_agent: Some(agent_id.to_owned()),
                },
            )
            .await
        {
            Ok(receipt) => Ok(receipt.agent.id),
            Err(AppError::NoEligibleAgents(_)) => Err(AppError::NoEligibleAgents(format!(
                "No suitable agent available to reassign task {task_id}"
            ))),
            Err(err) => Err(err),
        }
    }

    async fn reassign_current_task(&self, agent_id: &str) -> Result<String> {
        let tasks = self.assignment.get_agent_tasks(agent_id).await?;
        let task = tasks
            .first()
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} has no current task")))?;
        let task_id = task.id.clone();
        self.reassign_task(agent_id, &task_id).await?;
        Ok(task_id)
    }

    async fn notify_director(&self, issue: &HealthIssue) -> Result<ActionReport> {
        let directors: Vec<Agent> = self
            .agents
            .list()
            .await?
            .into_iter()
            .filter(|agent| agent.role == AgentRole::Director && agent.active)
            .collect();
        let Some(director) = directors.first() else {
            return Ok(ActionReport::failed("no director registered"));
        };

        let content = format!(
            "Health issue for agent {}: {:?} ({}), seen {} time(s)",
            issue.agent_id, issue.issue_type, issue.description, issue.occurrence_count
        );
        match self
            .notifier
            .notify_agent(
                &director.id,
                &content,
                &NotifyMeta {
                    kind: MessageKind::Chat,
                    task_id: None,
                },
            )
            .await
        {
            Ok(_) => Ok(ActionReport::ok(format!("director {} notified", director.id))),
            Err(err) => Ok(ActionReport::failed(format!("director notify failed: {err}"))),
        }
    }
}

/// Spawn a background task converting crashed-session exits into health
/// issues.
///
/// Runs until the `CancellationToken` fires or the exit stream closes.
#[must_use]
pub fn spawn_crash_consumer(
    mut exits: mpsc::Receiver<SessionExit>,
    health: Arc<HealthSteward>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let exit = tokio::select! {
                () = cancel.cancelled() => {
                    info!("crash consumer shutting down");
                    break;
                }
                maybe_exit = exits.recv() => {
                    if let Some(exit) = maybe_exit { exit } else {
                        info!("session exit stream closed");
                        break;
                    }
                }
            };

            if exit.reason == TerminationReason::Crashed {
                let description = exit.exit_code.map_or_else(
                    || format!("session {} terminated by signal", exit.session_id),
                    |code| format!("session {} exited with code {code}", exit.session_id),
                );
                health.record_crash(&exit.agent_id, &description).await;
            }
        }
    })
}
