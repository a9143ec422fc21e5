//! Steward scheduler: cron/event-triggered execution of maintenance
//! agents.
//!
//! Registration is explicit — nothing is registered at construction.
//! The scheduler owns no timer: due cron jobs are evaluated by
//! [`StewardScheduler::poll_due`], which the dispatch daemon calls from
//! its steward-trigger poll.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, warn};

use crate::capabilities::{StewardRunner, Store};
use crate::config::StewardConfig;
use crate::models::agent::{Agent, AgentRole};
use crate::models::steward::{
    EventSubscription, ExecutionOutcome, ExecutionRecord, ScheduledJob, StewardTrigger,
};
use crate::{AppError, Result};

struct RegisteredJob {
    steward_id: String,
    expression: String,
    schedule: Schedule,
    last_evaluated: DateTime<Utc>,
    last_fired_at: Option<DateTime<Utc>>,
}

/// Cron/event trigger registry and execution engine for stewards.
pub struct StewardScheduler {
    config: StewardConfig,
    agents: Arc<dyn Store<Agent>>,
    runner: Arc<dyn StewardRunner>,
    jobs: RwLock<Vec<RegisteredJob>>,
    subscriptions: RwLock<Vec<EventSubscription>>,
    history: RwLock<HashMap<String, VecDeque<ExecutionRecord>>>,
    running: AtomicBool,
    in_flight: AtomicUsize,
}

impl StewardScheduler {
    /// Create a scheduler with nothing registered and the clock stopped.
    #[must_use]
    pub fn new(
        config: StewardConfig,
        agents: Arc<dyn Store<Agent>>,
        runner: Arc<dyn StewardRunner>,
    ) -> Self {
        Self {
            config,
            agents,
            runner,
            jobs: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
            history: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Begin honoring cron triggers.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("steward scheduler started");
        }
    }

    /// Stop honoring cron triggers. In-flight executions finish.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("steward scheduler stopped");
        }
    }

    /// Whether cron triggers are being honored.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of executions currently in flight.
    #[must_use]
    pub fn running_executions(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Register one steward's triggers from its profile.
    ///
    /// Re-registration replaces the steward's existing triggers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown agent,
    /// `AppError::Scheduler` for a non-steward agent or an invalid cron
    /// expression.
    pub async fn register_steward(&self, steward_id: &str) -> Result<()> {
        let span = info_span!("register_steward", steward_id);
        let _guard = span.enter();

        let agent = self
            .agents
            .get(steward_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {steward_id} not found")))?;
        if agent.role != AgentRole::Steward {
            return Err(AppError::Scheduler(format!(
                "agent {steward_id} is not a steward"
            )));
        }
        let profile = agent.steward.clone().ok_or_else(|| {
            AppError::Scheduler(format!("steward {steward_id} has no maintenance profile"))
        })?;

        self.unregister_steward(steward_id).await;

        if let Some(expression) = profile.schedule {
            let schedule = Schedule::from_str(&expression).map_err(|err| {
                AppError::Scheduler(format!("invalid cron expression {expression:?}: {err}"))
            })?;
            self.jobs.write().await.push(RegisteredJob {
                steward_id: steward_id.to_owned(),
                expression: expression.clone(),
                schedule,
                last_evaluated: Utc::now(),
                last_fired_at: None,
            });
            info!(expression, "cron trigger registered");
        }

        let mut subscriptions = self.subscriptions.write().await;
        for event in profile.events {
            info!(event = %event.name, "event trigger registered");
            subscriptions.push(EventSubscription {
                steward_id: steward_id.to_owned(),
                event: event.name,
                condition: event.condition,
            });
        }

        Ok(())
    }

    /// Register every active steward in the registry.
    ///
    /// Returns the number of stewards registered; per-steward failures
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the registry listing fails.
    pub async fn register_all_stewards(&self) -> Result<usize> {
        let stewards: Vec<Agent> = self
            .agents
            .list()
            .await?
            .into_iter()
            .filter(|agent| agent.role == AgentRole::Steward && agent.active)
            .collect();

        let mut registered = 0;
        for steward in stewards {
            match self.register_steward(&steward.id).await {
                Ok(()) => registered += 1,
                Err(err) => warn!(steward_id = %steward.id, %err, "steward registration failed"),
            }
        }
        Ok(registered)
    }

    /// Remove all triggers for a steward.
    pub async fn unregister_steward(&self, steward_id: &str) {
        self.jobs
            .write()
            .await
            .retain(|job| job.steward_id != steward_id);
        self.subscriptions
            .write()
            .await
            .retain(|sub| sub.steward_id != steward_id);
    }

    /// Registered cron jobs.
    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|job| ScheduledJob {
                steward_id: job.steward_id.clone(),
                expression: job.expression.clone(),
                last_fired_at: job.last_fired_at,
            })
            .collect()
    }

    /// Registered event subscriptions.
    pub async fn subscriptions(&self) -> Vec<EventSubscription> {
        self.subscriptions.read().await.clone()
    }

    /// Execute one steward under the configured timeout, appending a
    /// bounded history entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown agent. Runner
    /// failures and timeouts are recorded in the execution outcome, not
    /// returned.
    pub async fn execute_steward(
        &self,
        steward_id: &str,
        trigger: StewardTrigger,
        manual: bool,
    ) -> Result<ExecutionRecord> {
        let span = info_span!("execute_steward", steward_id, trigger = trigger.label());
        let _guard = span.enter();

        let agent = self
            .agents
            .get(steward_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {steward_id} not found")))?;

        let mut record = ExecutionRecord::begin(steward_id.to_owned(), trigger.clone(), manual);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let timeout = Duration::from_secs(self.config.execution_timeout_seconds);
        let outcome = match tokio::time::timeout(timeout, self.runner.run(&agent, &trigger)).await {
            Ok(Ok(summary)) => ExecutionOutcome::Success(summary),
            Ok(Err(err)) => {
                warn!(%err, "steward execution failed");
                ExecutionOutcome::Failure(err.to_string())
            }
            Err(_) => {
                warn!(timeout_secs = self.config.execution_timeout_seconds, "steward execution timed out");
                ExecutionOutcome::TimedOut
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        record.finish(outcome);

        let mut history = self.history.write().await;
        let entries = history.entry(steward_id.to_owned()).or_default();
        entries.push_back(record.clone());
        while entries.len() > self.config.max_history_per_steward {
            entries.pop_front();
        }

        info!(outcome = ?record.outcome, "steward execution recorded");
        Ok(record)
    }

    /// Execution history for one steward, oldest first.
    pub async fn history(&self, steward_id: &str) -> Vec<ExecutionRecord> {
        self.history
            .read()
            .await
            .get(steward_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fire cron jobs that came due since their last evaluation.
    ///
    /// Multiple elapsed occurrences coalesce into a single firing so a
    /// slow poll cycle cannot produce a burst. Returns the execution
    /// records produced. A stopped scheduler fires nothing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if a registered steward vanished
    /// from the registry.
    pub async fn poll_due(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        if !self.is_running() {
            return Ok(Vec::new());
        }

        // Collect due jobs first so the lock is not held across execution.
        let mut due: Vec<(String, String)> = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            for job in jobs.iter_mut() {
                let elapsed = job
                    .schedule
                    .after(&job.last_evaluated)
                    .take_while(|at| *at <= now)
                    .count();
                if elapsed > 0 {
                    if elapsed > 1 {
                        debug!(
                            steward_id = %job.steward_id,
                            skipped = elapsed - 1,
                            "coalescing missed cron occurrences"
                        );
                    }
                    due.push((job.steward_id.clone(), job.expression.clone()));
                    job.last_fired_at = Some(now);
                }
                job.last_evaluated = now;
            }
        }

        let mut records = Vec::new();
        for (steward_id, expression) in due {
            let record = self
                .execute_steward(&steward_id, StewardTrigger::Cron { expression }, false)
                .await?;
            records.push(record);
        }
        Ok(records)
    }

    /// Notify every subscription matching the event name and optional
    /// condition, returning the count triggered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if a subscribed steward vanished
    /// from the registry.
    pub async fn publish_event(&self, name: &str, data: &serde_json::Value) -> Result<usize> {
        let span = info_span!("publish_event", name);
        let _guard = span.enter();

        let matching: Vec<EventSubscription> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|sub| sub.event == name && condition_matches(sub.condition.as_deref(), data))
            .cloned()
            .collect();

        for sub in &matching {
            self.execute_steward(
                &sub.steward_id,
                StewardTrigger::Event {
                    name: name.to_owned(),
                },
                false,
            )
            .await?;
        }

        info!(triggered = matching.len(), "event published");
        Ok(matching.len())
    }
}

/// Check a `key=value` condition against a JSON payload.
///
/// An absent condition always matches; an absent key never does.
fn condition_matches(condition: Option<&str>, data: &serde_json::Value) -> bool {
    let Some(condition) = condition else {
        return true;
    };
    let Some((key, wanted)) = condition.split_once('=') else {
        warn!(condition, "malformed subscription condition; not matching");
        return false;
    };
    match data.get(key.trim()) {
        Some(serde_json::Value::String(actual)) => actual == wanted.trim(),
        Some(actual) => actual.to_string() == wanted.trim(),
        None => false,
    }
}
