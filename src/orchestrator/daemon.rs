//! Dispatch daemon: the only component with a timer.
//!
//! One interval drives a strictly sequential cycle of four sub-polls:
//! worker-availability, inbox, steward-trigger, workflow-task. Sequential
//! execution bounds resource use and keeps ordering deterministic. Every
//! per-item failure is caught, counted, and recorded; the timer callback
//! never propagates an error and the cycle always reschedules.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::capabilities::{Store, WorktreeManager};
use crate::config::DaemonConfig;
use crate::models::agent::{Agent, AgentRole};
use crate::models::inbox::{InboxItem, InboxStatus, MessageKind};
use crate::models::task::{AssignmentStatus, Task};
use crate::orchestrator::assignment::{AssignOptions, TaskAssignmentService};
use crate::orchestrator::dispatch::{DispatchOptions, DispatchService};
use crate::orchestrator::health::HealthSteward;
use crate::orchestrator::scheduler::StewardScheduler;
use crate::orchestrator::session_manager::{SessionManager, StartOptions};
use crate::Result;

/// Outcome of one sub-poll.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Items handled successfully.
    pub processed: usize,
    /// Per-item failures caught.
    pub errors: usize,
    /// Messages for each caught failure.
    pub error_messages: Vec<String>,
    /// Wall-clock time spent in the sub-poll.
    pub duration_ms: u64,
}

impl PollOutcome {
    fn record_error(&mut self, context: &str, err: &crate::AppError) {
        warn!(context, %err, "poll item failed");
        self.errors += 1;
        self.error_messages.push(format!("{context}: {err}"));
    }
}

/// Outcome of one full daemon cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Monotonic cycle number.
    pub cycle: u64,
    /// Worker-availability sub-poll outcome.
    pub worker_availability: PollOutcome,
    /// Inbox sub-poll outcome.
    pub inbox: PollOutcome,
    /// Steward-trigger sub-poll outcome.
    pub steward_triggers: PollOutcome,
    /// Workflow-task sub-poll outcome.
    pub workflow_tasks: PollOutcome,
}

impl CycleReport {
    /// Total caught errors across all sub-polls.
    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.worker_availability.errors
            + self.inbox.errors
            + self.steward_triggers.errors
            + self.workflow_tasks.errors
    }
}

/// Lifecycle and domain events emitted for observers.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// A poll cycle began.
    PollStart {
        /// Cycle number.
        cycle: u64,
    },
    /// A poll cycle finished.
    PollComplete {
        /// Cycle number.
        cycle: u64,
        /// Caught errors across the cycle.
        errors: usize,
    },
    /// A sub-poll recorded a caught failure.
    PollError {
        /// Cycle number.
        cycle: u64,
        /// The failure message.
        message: String,
    },
    /// A task was dispatched to an agent.
    TaskDispatched {
        /// Dispatched task.
        task_id: String,
        /// Receiving agent.
        agent_id: String,
    },
    /// An inbox message was forwarded into a session.
    MessageForwarded {
        /// Recipient agent.
        agent_id: String,
        /// Forwarded message id.
        message_id: String,
    },
    /// A session was started for an agent.
    AgentSpawned {
        /// The agent.
        agent_id: String,
        /// The new session.
        session_id: String,
    },
}

/// Top-level coordinator running all polling loops.
pub struct DispatchDaemon {
    config: DaemonConfig,
    agents: Arc<dyn Store<Agent>>,
    inbox: Arc<dyn Store<InboxItem>>,
    sessions: Arc<SessionManager>,
    assignment: Arc<TaskAssignmentService>,
    dispatch: Arc<DispatchService>,
    health: Arc<HealthSteward>,
    scheduler: Arc<StewardScheduler>,
    worktrees: Arc<dyn WorktreeManager>,
    events: broadcast::Sender<DaemonEvent>,
    cycle: AtomicU64,
}

impl DispatchDaemon {
    /// Create the daemon over its collaborating services.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // Wiring seam; assembled once in main.
    pub fn new(
        config: DaemonConfig,
        agents: Arc<dyn Store<Agent>>,
        inbox: Arc<dyn Store<InboxItem>>,
        sessions: Arc<SessionManager>,
        assignment: Arc<TaskAssignmentService>,
        dispatch: Arc<DispatchService>,
        health: Arc<HealthSteward>,
        scheduler: Arc<StewardScheduler>,
        worktrees: Arc<dyn WorktreeManager>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            agents,
            inbox,
            sessions,
            assignment,
            dispatch,
            health,
            scheduler,
            worktrees,
            events,
            cycle: AtomicU64::new(0),
        }
    }

    /// Attach an observer to the daemon's event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: DaemonEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Spawn the polling loop. Runs until the token is cancelled.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.poll_interval();
        info!(interval_ms = interval.as_millis(), "dispatch daemon starting");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("dispatch daemon shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.run_cycle().await;
                        if report.total_errors() > 0 {
                            warn!(
                                cycle = report.cycle,
                                errors = report.total_errors(),
                                "poll cycle finished with errors"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Run one full poll cycle: availability, inbox, steward triggers,
    /// workflow tasks — strictly in that order.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("poll_cycle", cycle);
        let _guard = span.enter();
        self.emit(DaemonEvent::PollStart { cycle });

        let worker_availability = self.poll_worker_availability().await;
        let inbox = self.poll_inbox().await;
        let steward_triggers = self.poll_steward_triggers().await;
        let workflow_tasks = self.poll_workflow_tasks().await;

        let report = CycleReport {
            cycle,
            worker_availability,
            inbox,
            steward_triggers,
            workflow_tasks,
        };
        for outcome in [
            &report.worker_availability,
            &report.inbox,
            &report.steward_triggers,
            &report.workflow_tasks,
        ] {
            for message in &outcome.error_messages {
                self.emit(DaemonEvent::PollError {
                    cycle,
                    message: message.clone(),
                });
            }
        }
        self.emit(DaemonEvent::PollComplete {
            cycle,
            errors: report.total_errors(),
        });
        debug!(
            cycle,
            dispatched = report.worker_availability.processed,
            routed = report.inbox.processed,
            "poll cycle complete"
        );
        report
    }

    /// Find idle ephemeral workers and put them to work: pick the
    /// highest-priority unassigned task, resolve its worktree, dispatch,
    /// and start a session rooted in the worktree.
    pub async fn poll_worker_availability(&self) -> PollOutcome {
        let started = Instant::now();
        let mut outcome = PollOutcome::default();

        let workers = match self.agents.list().await {
            Ok(agents) => agents,
            Err(err) => {
                outcome.record_error("list agents", &err);
                outcome.duration_ms = duration_ms(started);
                return outcome;
            }
        };

        for worker in workers
            .iter()
            .filter(|agent| agent.active && agent.is_ephemeral_worker())
        {
            if self.sessions.get_active_session(&worker.id).await.is_some() {
                continue;
            }
            match self.activate_worker(worker).await {
                Ok(true) => outcome.processed += 1,
                Ok(false) => {}
                Err(err) => outcome.record_error(&format!("worker {}", worker.id), &err),
            }
        }

        outcome.duration_ms = duration_ms(started);
        outcome
    }

    /// Dispatch the best task to one idle worker and start its session.
    ///
    /// A task already dispatched to this worker whose session never
    /// started (e.g. a spawn failure last cycle) is retried before fresh
    /// work. Returns `false` when there is nothing to dispatch.
    async fn activate_worker(&self, worker: &Agent) -> Result<bool> {
        let mut candidate = self
            .assignment
            .get_agent_tasks(&worker.id)
            .await?
            .into_iter()
            .find(|task| task.assignment_status() == AssignmentStatus::Assigned);
        if candidate.is_none() {
            candidate = self
                .assignment
                .get_unassigned_tasks()
                .await?
                .into_iter()
                .next();
        }
        let Some(task) = candidate else {
            return Ok(false);
        };
        let task = &task;

        let (path, branch) = self.resolve_worktree(worker, task).await?;

        let receipt = self
            .dispatch
            .dispatch(
                &task.id,
                &worker.id,
                DispatchOptions {
                    note: None,
                    assign: AssignOptions {
                        branch: Some(branch.clone()),
                        worktree: Some(path.clone()),
                    },
                },
            )
            .await?;
        self.emit(DaemonEvent::TaskDispatched {
            task_id: task.id.clone(),
            agent_id: worker.id.clone(),
        });

        let prompt = build_task_prompt(&receipt.task, &branch);
        let session = self
            .sessions
            .start_session(
                &worker.id,
                StartOptions {
                    working_dir: path.clone(),
                    worktree: Some(path),
                    prompt: Some(prompt),
                },
            )
            .await?;
        self.assignment
            .start_task(&task.id, Some(&session.id))
            .await?;
        self.emit(DaemonEvent::AgentSpawned {
            agent_id: worker.id.clone(),
            session_id: session.id,
        });
        Ok(true)
    }

    /// Resolve the worktree path and branch for a worker/task pair.
    ///
    /// Priority: handoff metadata, then prior assignment metadata, then a
    /// newly created worktree. A stored path whose checkout no longer
    /// exists is recreated.
    async fn resolve_worktree(&self, worker: &Agent, task: &Task) -> Result<(String, String)> {
        let handoff = task.last_handoff();
        let stored_path = handoff
            .and_then(|entry| entry.worktree.clone())
            .or_else(|| task.work.worktree_path.clone());
        let stored_branch = handoff
            .and_then(|entry| entry.branch.clone())
            .or_else(|| task.work.branch.clone());

        if let (Some(path), Some(branch)) = (stored_path, stored_branch) {
            if self.worktrees.worktree_exists(&path).await? {
                return Ok((path, branch));
            }
            debug!(task_id = %task.id, path, "stored worktree missing; recreating");
        }

        let info = self
            .worktrees
            .create_worktree(&worker.name, &task.id, &task.title)
            .await?;
        Ok((info.path, info.branch))
    }

    /// Route unread inbox items per agent, honoring the role-dependent
    /// drop/hold asymmetry for undeliverable non-dispatch messages.
    pub async fn poll_inbox(&self) -> PollOutcome {
        let started = Instant::now();
        let mut outcome = PollOutcome::default();

        let (agents, items) = match (self.agents.list().await, self.inbox.list().await) {
            (Ok(agents), Ok(items)) => (agents, items),
            (Err(err), _) | (_, Err(err)) => {
                outcome.record_error("list inbox", &err);
                outcome.duration_ms = duration_ms(started);
                return outcome;
            }
        };

        for agent in agents.iter().filter(|agent| agent.active) {
            let mut pending: Vec<&InboxItem> = items
                .iter()
                .filter(|item| item.agent_id == agent.id && item.status == InboxStatus::Unread)
                .collect();
            pending.sort_by_key(|item| item.created_at);
            pending.truncate(self.config.inbox_batch_size);
            if pending.is_empty() {
                continue;
            }

            let session = self.sessions.get_active_session(&agent.id).await;
            for item in pending {
                match self.route_item(agent, item, session.as_ref().map(|s| s.id.as_str())).await {
                    Ok(routed) => {
                        if routed {
                            outcome.processed += 1;
                        }
                    }
                    Err(err) => outcome.record_error(&format!("message {}", item.message_id), &err),
                }
            }
        }

        outcome.duration_ms = duration_ms(started);
        outcome
    }

    /// Apply the routing matrix to one unread item.
    ///
    /// Returns whether the item was handled (forwarded or intentionally
    /// retired); held messages return `false`.
    async fn route_item(
        &self,
        agent: &Agent,
        item: &InboxItem,
        session_id: Option<&str>,
    ) -> Result<bool> {
        match (item.kind, session_id) {
            // Dispatch messages for idle agents were already handled by
            // the availability poll; just retire them.
            (MessageKind::Dispatch, None) => {
                self.mark_read(item).await?;
                Ok(true)
            }
            (_, Some(session_id)) => {
                self.sessions.send_input(session_id, &item.body).await?;
                self.mark_read(item).await?;
                self.emit(DaemonEvent::MessageForwarded {
                    agent_id: agent.id.clone(),
                    message_id: item.message_id.clone(),
                });
                Ok(true)
            }
            (MessageKind::Chat, None) => {
                if agent.retains_inbox() {
                    // Persistent roles must never lose a message; it stays
                    // unread for the next session.
                    Ok(false)
                } else {
                    info!(
                        agent_id = %agent.id,
                        message_id = %item.message_id,
                        "dropping undeliverable message for ephemeral recipient"
                    );
                    self.mark_read(item).await?;
                    Ok(true)
                }
            }
        }
    }

    async fn mark_read(&self, item: &InboxItem) -> Result<()> {
        let mut updated = item.clone();
        updated.status = InboxStatus::Read;
        self.inbox.update(&item.id, updated).await?;
        Ok(())
    }

    /// Ensure the steward scheduler is running, fire due cron jobs, and
    /// run a fleet health check.
    pub async fn poll_steward_triggers(&self) -> PollOutcome {
        let started = Instant::now();
        let mut outcome = PollOutcome::default();

        if !self.scheduler.is_running() {
            self.scheduler.start();
        }

        match self.scheduler.poll_due(Utc::now()).await {
            Ok(records) => outcome.processed += records.len(),
            Err(err) => outcome.record_error("cron poll", &err),
        }
        debug!(
            running_executions = self.scheduler.running_executions(),
            "steward scheduler polled"
        );

        match self.health.run_health_check().await {
            Ok(report) => {
                if !report.new_issues.is_empty() {
                    info!(new_issues = report.new_issues.len(), "health check raised issues");
                }
            }
            Err(err) => outcome.record_error("health check", &err),
        }

        outcome.duration_ms = duration_ms(started);
        outcome
    }

    /// Match idle stewards to unassigned tasks tagged for their focus.
    pub async fn poll_workflow_tasks(&self) -> PollOutcome {
        let started = Instant::now();
        let mut outcome = PollOutcome::default();

        let stewards = match self.agents.list().await {
            Ok(agents) => agents,
            Err(err) => {
                outcome.record_error("list agents", &err);
                outcome.duration_ms = duration_ms(started);
                return outcome;
            }
        };

        for steward in stewards
            .iter()
            .filter(|agent| agent.active && agent.role == AgentRole::Steward)
        {
            if self.sessions.get_active_session(&steward.id).await.is_some() {
                continue;
            }
            match self.dispatch_workflow_task(steward).await {
                Ok(true) => outcome.processed += 1,
                Ok(false) => {}
                Err(err) => outcome.record_error(&format!("steward {}", steward.id), &err),
            }
        }

        outcome.duration_ms = duration_ms(started);
        outcome
    }

    /// Dispatch the best matching workflow task to one idle steward.
    async fn dispatch_workflow_task(&self, steward: &Agent) -> Result<bool> {
        let Some(profile) = &steward.steward else {
            return Ok(false);
        };
        let focus_tag = profile.focus.clone();
        let steward_tag = format!("steward-{focus_tag}");

        let unassigned = self.assignment.get_unassigned_tasks().await?;
        let Some(task) = unassigned.iter().find(|task| {
            task.tags
                .iter()
                .any(|tag| *tag == focus_tag || *tag == steward_tag || tag == "workflow")
        }) else {
            return Ok(false);
        };

        self.dispatch
            .dispatch(&task.id, &steward.id, DispatchOptions::default())
            .await?;
        self.emit(DaemonEvent::TaskDispatched {
            task_id: task.id.clone(),
            agent_id: steward.id.clone(),
        });
        Ok(true)
    }
}

fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Assemble the task-context prompt delivered to a freshly spawned
/// worker session.
fn build_task_prompt(task: &Task, branch: &str) -> String {
    let mut prompt = format!(
        "You are assigned task {}: {}.\nWork on branch {branch} in the current directory.",
        task.id, task.title
    );
    if let Some(handoff) = task.last_handoff() {
        prompt.push_str(&format!(
            "\nPrevious assignee handed off with: {}",
            handoff.message
        ));
    }
    if !task.tags.is_empty() {
        prompt.push_str(&format!("\nTags: {}", task.tags.join(", ")));
    }
    prompt
}
