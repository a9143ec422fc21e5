//! Dispatch service: assignment and notification as one operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, info_span};

use crate::capabilities::{
    CapabilityScorer, Delivery, Notifier, NotifyMeta, RankedCandidate, Store,
};
use crate::config::DispatchConfig;
use crate::models::agent::Agent;
use crate::models::inbox::MessageKind;
use crate::models::task::Task;
use crate::orchestrator::assignment::{AssignOptions, TaskAssignmentService};
use crate::{AppError, Result};

/// Everything a dispatch produced.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// The task after assignment.
    pub task: Task,
    /// The agent it went to.
    pub agent: Agent,
    /// Delivery receipt for the notification message.
    pub notification: Delivery,
    /// Whether this dispatch created the assignment (as opposed to
    /// re-notifying the current assignee).
    pub is_new_assignment: bool,
    /// When the dispatch happened.
    pub dispatched_at: DateTime<Utc>,
}

/// Options for `dispatch`.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Extra context appended to the notification message.
    pub note: Option<String>,
    /// Branch/worktree overrides forwarded to assignment.
    pub assign: AssignOptions,
}

/// Options for `smart_dispatch`.
#[derive(Debug, Clone, Default)]
pub struct SmartDispatchOptions {
    /// Agent excluded from candidacy (e.g. the unhealthy current one).
    pub exclude_agent: Option<String>,
}

/// Composes assignment, candidate selection, and notification.
pub struct DispatchService {
    assignment: Arc<TaskAssignmentService>,
    tasks: Arc<dyn Store<Task>>,
    agents: Arc<dyn Store<Agent>>,
    notifier: Arc<dyn Notifier>,
    scorer: Arc<dyn CapabilityScorer>,
    config: DispatchConfig,
}

impl DispatchService {
    /// Create the service over its collaborators.
    #[must_use]
    pub fn new(
        assignment: Arc<TaskAssignmentService>,
        tasks: Arc<dyn Store<Task>>,
        agents: Arc<dyn Store<Agent>>,
        notifier: Arc<dyn Notifier>,
        scorer: Arc<dyn CapabilityScorer>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            assignment,
            tasks,
            agents,
            notifier,
            scorer,
            config,
        }
    }

    /// Assign (when not already assigned to this agent) and notify.
    ///
    /// Re-dispatching the same task to its current assignee does not
    /// duplicate the assignment but still sends a fresh notification.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task or agent, or
    /// `AppError::Notify` when the notification cannot be delivered.
    pub async fn dispatch(
        &self,
        task_id: &str,
        agent_id: &str,
        opts: DispatchOptions,
    ) -> Result<DispatchReceipt> {
        let span = info_span!("dispatch", task_id, agent_id);
        let _guard = span.enter();

        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))?;
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))?;

        let is_new_assignment = task.assignee.as_deref() != Some(agent_id);
        let task = if is_new_assignment {
            self.assignment
                .assign_to_agent(task_id, agent_id, opts.assign)
                .await?
        } else {
            task
        };

        let mut content = format!(
            "Task dispatched: {} — {} (priority {:?})",
            task.id, task.title, task.priority
        );
        if let Some(branch) = &task.work.branch {
            content.push_str(&format!("\nBranch: {branch}"));
        }
        if let Some(note) = &opts.note {
            content.push_str(&format!("\n{note}"));
        }

        let notification = self
            .notifier
            .notify_agent(
                agent_id,
                &content,
                &NotifyMeta {
                    kind: MessageKind::Dispatch,
                    task_id: Some(task.id.clone()),
                },
            )
            .await?;

        info!(is_new_assignment, "task dispatched");
        Ok(DispatchReceipt {
            task,
            agent,
            notification,
            is_new_assignment,
            dispatched_at: Utc::now(),
        })
    }

    /// The filtered candidate ranking for a task, best first.
    ///
    /// Applies the scorer's eligibility flag, the configured minimum
    /// score, and a capacity check — the same filter `smart_dispatch`
    /// uses, exposed for UI preview.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task.
    pub async fn get_candidates(
        &self,
        task_id: &str,
        opts: &SmartDispatchOptions,
    ) -> Result<Vec<RankedCandidate>> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))?;
        let agents = self.agents.list().await?;

        let ranked = self.scorer.rank(&task, &agents);
        let mut candidates = Vec::new();
        for candidate in ranked {
            if !candidate.eligible || candidate.score < self.config.min_score {
                continue;
            }
            if opts.exclude_agent.as_deref() == Some(candidate.agent.id.as_str()) {
                continue;
            }
            if !self.assignment.agent_has_capacity(&candidate.agent.id).await? {
                continue;
            }
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    /// Dispatch to the best-ranked eligible candidate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoEligibleAgents` when the filtered candidate
    /// set is empty, otherwise the errors of [`Self::dispatch`].
    pub async fn smart_dispatch(
        &self,
        task_id: &str,
        opts: SmartDispatchOptions,
    ) -> Result<DispatchReceipt> {
        let span = info_span!("smart_dispatch", task_id);
        let _guard = span.enter();

        let candidates = self.get_candidates(task_id, &opts).await?;
        let Some(best) = candidates.first() else {
            return Err(AppError::NoEligibleAgents(format!(
                "no eligible agents for task {task_id}"
            )));
        };

        info!(agent_id = %best.agent.id, score = best.score, "smart dispatch selected candidate");
        self.dispatch(task_id, &best.agent.id.clone(), DispatchOptions::default())
            .await
    }
}
