//! Consumed-capability contracts.
//!
//! The orchestration runtime consumes storage, process spawning, worktree
//! management, notification delivery, candidate scoring, and steward
//! execution through the traits in this module. Default single-process
//! adapters live in the sibling modules; the transport layer may swap in
//! real implementations.

pub mod memory;
pub mod notify;
pub mod process;
pub mod scorer;
pub mod steward_runner;
pub mod worktree;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::agent::Agent;
use crate::models::steward::StewardTrigger;
use crate::models::task::Task;
use crate::Result;

/// Entities addressable by a stable string key.
pub trait Keyed {
    /// The entity's unique identifier.
    fn key(&self) -> &str;
}

impl Keyed for crate::models::agent::Agent {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for crate::models::task::Task {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for crate::models::inbox::InboxItem {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Generic element storage.
///
/// Implementations must provide read-after-write consistency within one
/// process: a `get` issued after a completed `create`/`update` observes
/// that write.
#[async_trait]
pub trait Store<T: Keyed + Clone + Send + Sync>: Send + Sync {
    /// Fetch one entity by identifier.
    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// List all entities in stable key order.
    async fn list(&self) -> Result<Vec<T>>;

    /// Insert a new entity; fails if the key is already present.
    async fn create(&self, item: T) -> Result<T>;

    /// Replace an existing entity; fails with `NotFound` when absent.
    async fn update(&self, id: &str, item: T) -> Result<T>;
}

/// Options for spawning one agent process.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Directory the process runs in.
    pub working_dir: String,
    /// Worktree path when the session is rooted in one.
    pub worktree: Option<String>,
    /// Initial prompt delivered to the agent.
    pub prompt: Option<String>,
    /// External handle of a prior session to resume.
    pub resume_handle: Option<String>,
}

/// Handle to a spawned process.
#[derive(Debug, Clone)]
pub struct SpawnedProcess {
    /// Spawner-scoped handle for later control calls.
    pub handle: String,
    /// OS process id, when known.
    pub pid: Option<u32>,
    /// External session handle usable for resumption.
    pub resume_handle: Option<String>,
}

/// Structured events emitted by a running agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line of structured output.
    Output(String),
    /// A line of error output.
    Error(String),
    /// The process exited.
    Exit {
        /// Exit code; `None` when killed by a signal.
        code: Option<i32>,
    },
}

/// Process spawning and control for agent executables.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Start a process for the agent.
    async fn start(&self, agent: &Agent, opts: SpawnOptions) -> Result<SpawnedProcess>;

    /// Stop the process, waiting for exit.
    async fn stop(&self, handle: &str) -> Result<()>;

    /// Write input to the process.
    async fn send_input(&self, handle: &str, text: &str) -> Result<()>;

    /// Resize the attached pseudo-terminal.
    async fn resize(&self, handle: &str, cols: u16, rows: u16) -> Result<()>;

    /// Best-effort interrupt signal; must not imply termination.
    async fn interrupt(&self, handle: &str) -> Result<()>;

    /// Take the process event stream. Yields at most once per handle.
    async fn take_events(&self, handle: &str) -> Result<mpsc::Receiver<ProcessEvent>>;
}

/// Result of creating a worktree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Filesystem path of the checkout.
    pub path: String,
    /// Branch checked out in it.
    pub branch: String,
    /// Whether the branch was created rather than reused.
    pub branch_created: bool,
}

/// Isolated-checkout management.
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    /// Create (or reuse) a worktree for the agent/task pair.
    async fn create_worktree(
        &self,
        agent_name: &str,
        task_id: &str,
        task_title: &str,
    ) -> Result<WorktreeInfo>;

    /// Remove a worktree.
    async fn remove_worktree(&self, path: &str, force: bool) -> Result<()>;

    /// Whether the worktree path still exists.
    async fn worktree_exists(&self, path: &str) -> Result<bool>;

    /// List known worktree paths.
    async fn list_worktrees(&self) -> Result<Vec<String>>;
}

/// Delivery receipt from the notification channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    /// Identifier of the delivered message.
    pub message_id: String,
    /// Channel the message was posted in.
    pub channel_id: String,
}

/// Metadata accompanying a notification.
#[derive(Debug, Clone)]
pub struct NotifyMeta {
    /// Routing class recorded on the resulting inbox item.
    pub kind: crate::models::inbox::MessageKind,
    /// Related task, when the message is a dispatch.
    pub task_id: Option<String>,
}

/// Message delivery to an agent's channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a message to the agent's channel.
    async fn notify_agent(&self, agent_id: &str, content: &str, meta: &NotifyMeta)
        -> Result<Delivery>;
}

/// One ranked dispatch candidate.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    /// The candidate agent.
    pub agent: Agent,
    /// Scorer value; higher is better.
    pub score: f64,
    /// Whether the scorer considers the agent suitable at all.
    pub eligible: bool,
}

/// Capability/skill scoring used to rank dispatch candidates.
///
/// Implementations must be pure: no side effects, same inputs → same
/// ranking.
pub trait CapabilityScorer: Send + Sync {
    /// Rank the agents for the task, best first.
    fn rank(&self, task: &Task, agents: &[Agent]) -> Vec<RankedCandidate>;
}

/// External execution logic for steward agents.
#[async_trait]
pub trait StewardRunner: Send + Sync {
    /// Run the steward's maintenance logic, returning a summary.
    async fn run(&self, steward: &Agent, trigger: &StewardTrigger) -> Result<String>;
}

/// Merge-request creation against a base branch.
#[async_trait]
pub trait MergeGateway: Send + Sync {
    /// Open a merge request; returns its identifier.
    async fn open_merge_request(&self, branch: &str, base: &str, title: &str) -> Result<String>;
}
