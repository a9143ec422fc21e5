//! Task assignment service: ownership and metadata bookkeeping per task.
//!
//! All operations are synchronous bookkeeping against the element store
//! with no retries; retries belong to callers. Missing tasks or agents
//! fail with `NotFound`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn};

use crate::capabilities::{MergeGateway, Store};
use crate::models::agent::Agent;
use crate::models::task::{
    AssignmentStatus, HandoffEntry, MergeStatus, Task, TaskStatus,
};
use crate::{AppError, Result};

/// Reduce arbitrary text to a lowercase, dash-separated slug.
#[must_use]
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.truncate(40);
    out.trim_end_matches('-').to_owned()
}

/// Deterministic branch name for an agent/task pair.
#[must_use]
pub fn branch_name(agent_name: &str, task_id: &str, task_title: &str) -> String {
    format!("{}/{}-{}", slug(agent_name), task_id, slug(task_title))
}

/// Deterministic worktree directory name for an agent/task pair.
#[must_use]
pub fn worktree_dir_name(agent_name: &str, task_id: &str) -> String {
    format!("{}-{}", slug(agent_name), task_id)
}

/// Explicit overrides for `assign_to_agent`.
#[derive(Debug, Clone, Default)]
pub struct AssignOptions {
    /// Branch override; takes priority over all stored metadata.
    pub branch: Option<String>,
    /// Worktree override; takes priority over all stored metadata.
    pub worktree: Option<String>,
}

/// Options for `complete_task`.
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    /// Open a merge request for the task's branch.
    pub open_merge_request: bool,
    /// Base branch the merge request targets.
    pub base_branch: Option<String>,
}

/// Per-agent workload counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentWorkload {
    /// Tasks assigned but not started.
    pub assigned: usize,
    /// Tasks in progress.
    pub in_progress: usize,
}

/// Ownership and metadata bookkeeping for tasks.
pub struct TaskAssignmentService {
    tasks: Arc<dyn Store<Task>>,
    agents: Arc<dyn Store<Agent>>,
    merges: Option<Arc<dyn MergeGateway>>,
}

impl TaskAssignmentService {
    /// Create the service over the task and agent stores.
    #[must_use]
    pub fn new(
        tasks: Arc<dyn Store<Task>>,
        agents: Arc<dyn Store<Agent>>,
        merges: Option<Arc<dyn MergeGateway>>,
    ) -> Self {
        Self {
            tasks,
            agents,
            merges,
        }
    }

    async fn fetch_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))
    }

    async fn fetch_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .get(agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))
    }

    async fn put_task(&self, mut task: Task) -> Result<Task> {
        task.updated_at = Utc::now();
        let id = task.id.clone();
        self.tasks.update(&id, task).await
    }

    /// Assign a task to an agent, resolving branch/worktree names.
    ///
    /// Name resolution priority: explicit override, then the most recent
    /// handoff entry, then prior assignment metadata, then newly generated
    /// deterministic names.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task or agent.
    pub async fn assign_to_agent(
        &self,
        task_id: &str,
        agent_id: &str,
        opts: AssignOptions,
    ) -> Result<Task> {
        let span = info_span!("assign_to_agent", task_id, agent_id);
        let _guard = span.enter();

        let mut task = self.fetch_task(task_id).await?;
        let agent = self.fetch_agent(agent_id).await?;

        let handoff = task.last_handoff().cloned();
        let branch = opts
            .branch
            .or_else(|| handoff.as_ref().and_then(|h| h.branch.clone()))
            .or_else(|| task.work.branch.clone())
            .unwrap_or_else(|| branch_name(&agent.name, &task.id, &task.title));
        let worktree = opts
            .worktree
            .or_else(|| handoff.as_ref().and_then(|h| h.worktree.clone()))
            .or_else(|| task.work.worktree_path.clone())
            .unwrap_or_else(|| worktree_dir_name(&agent.name, &task.id));

        task.assignee = Some(agent.id.clone());
        task.work.assigned_agent = Some(agent.id.clone());
        task.work.branch = Some(branch);
        task.work.worktree_path = Some(worktree);

        let task = self.put_task(task).await?;
        info!(
            branch = task.work.branch.as_deref().unwrap_or_default(),
            "task assigned"
        );
        Ok(task)
    }

    /// Remove the task's assignee and any in-flight work markers.
    ///
    /// Branch and worktree metadata are preserved so a later assignment
    /// can pick the work back up.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task.
    pub async fn unassign_task(&self, task_id: &str) -> Result<Task> {
        let mut task = self.fetch_task(task_id).await?;
        task.assignee = None;
        task.work.assigned_agent = None;
        task.work.session_id = None;
        task.work.started_at = None;
        if task.status == TaskStatus::InProgress {
            task.status = TaskStatus::Open;
        }
        let task = self.put_task(task).await?;
        info!(task_id, "task unassigned");
        Ok(task)
    }

    /// Mark assigned work as started.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task.
    pub async fn start_task(&self, task_id: &str, session_id: Option<&str>) -> Result<Task> {
        let mut task = self.fetch_task(task_id).await?;
        task.status = TaskStatus::InProgress;
        task.work.started_at = Some(Utc::now());
        if let Some(session_id) = session_id {
            task.work.session_id = Some(session_id.to_owned());
        }
        self.put_task(task).await
    }

    /// Close a task, recording completion metadata and optionally opening
    /// a merge request against a base branch.
    ///
    /// Merge-request failure is logged and never fails completion.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task.
    pub async fn complete_task(&self, task_id: &str, opts: CompleteOptions) -> Result<Task> {
        let span = info_span!("complete_task", task_id);
        let _guard = span.enter();

        let mut task = self.fetch_task(task_id).await?;
        task.status = TaskStatus::Closed;
        task.work.completed_at = Some(Utc::now());

        if opts.open_merge_request {
            task.work.merge_status = Some(MergeStatus::Pending);
            let base = opts.base_branch.as_deref().unwrap_or("main");
            match (&self.merges, &task.work.branch) {
                (Some(gateway), Some(branch)) => {
                    match gateway.open_merge_request(branch, base, &task.title).await {
                        Ok(mr) => info!(task_id, merge_request = %mr, "merge request opened"),
                        Err(err) => {
                            warn!(task_id, %err, "merge request failed; completion unaffected");
                        }
                    }
                }
                (None, _) => warn!(task_id, "no merge gateway configured; merge left pending"),
                (_, None) => warn!(task_id, "task has no branch; merge left pending"),
            }
        }

        let task = self.put_task(task).await?;
        info!(task_id, "task completed");
        Ok(task)
    }

    /// Release a task for a future assignee while preserving its branch
    /// and worktree, appending a handoff-history entry.
    ///
    /// History is append-only: existing entries are never rewritten.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task.
    pub async fn handoff_task(
        &self,
        task_id: &str,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<Task> {
        let span = info_span!("handoff_task", task_id);
        let _guard = span.enter();

        let mut task = self.fetch_task(task_id).await?;
        task.work.handoff_history.push(HandoffEntry {
            session_id: session_id.map(ToOwned::to_owned),
            message: message.to_owned(),
            branch: task.work.branch.clone(),
            worktree: task.work.worktree_path.clone(),
            handoff_at: Utc::now(),
        });
        task.assignee = None;
        task.work.assigned_agent = None;
        task.work.session_id = None;
        task.work.started_at = None;
        if task.status == TaskStatus::InProgress {
            task.status = TaskStatus::Open;
        }

        let task = self.put_task(task).await?;
        info!(
            task_id,
            handoffs = task.work.handoff_history.len(),
            "task handed off"
        );
        Ok(task)
    }

    /// Record the session currently working the task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing task.
    pub async fn update_session_id(&self, task_id: &str, session_id: &str) -> Result<Task> {
        let mut task = self.fetch_task(task_id).await?;
        task.work.session_id = Some(session_id.to_owned());
        self.put_task(task).await
    }

    /// Tasks currently assigned to the agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the listing fails.
    pub async fn get_agent_tasks(&self, agent_id: &str) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|task| task.assignee.as_deref() == Some(agent_id))
            .collect())
    }

    /// Assigned/in-progress counts for the agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the listing fails.
    pub async fn get_agent_workload(&self, agent_id: &str) -> Result<AgentWorkload> {
        let tasks = self.get_agent_tasks(agent_id).await?;
        let in_progress = tasks
            .iter()
            .filter(|task| task.assignment_status() == AssignmentStatus::InProgress)
            .count();
        Ok(AgentWorkload {
            assigned: tasks.len() - in_progress,
            in_progress,
        })
    }

    /// Whether the agent can accept another task.
    ///
    /// Compares the in-progress count against the agent's configured
    /// maximum (default 1 when unset).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing agent.
    pub async fn agent_has_capacity(&self, agent_id: &str) -> Result<bool> {
        let agent = self.fetch_agent(agent_id).await?;
        let workload = self.get_agent_workload(agent_id).await?;
        Ok(workload.in_progress < agent.max_concurrent_tasks() as usize)
    }

    /// Open, unassigned tasks ordered best-dispatch-first (priority
    /// descending, then oldest first).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the listing fails.
    pub async fn get_unassigned_tasks(&self) -> Result<Vec<Task>> {
        let mut open: Vec<Task> = self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(Task::is_assignable)
            .collect();
        open.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(open)
    }

    /// Tasks filtered by derived assignment status (all tasks when `None`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the listing fails.
    pub async fn list_assignments(&self, status: Option<AssignmentStatus>) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|task| status.map_or(true, |wanted| task.assignment_status() == wanted))
            .collect())
    }

    /// Completed tasks whose merge is still pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the listing fails.
    pub async fn get_tasks_awaiting_merge(&self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|task| task.work.merge_status == Some(MergeStatus::Pending))
            .collect())
    }
}
