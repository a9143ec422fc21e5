//! Shared test helpers for orchestration integration tests.
//!
//! Provides an in-memory harness wiring every service over fake
//! capability adapters so individual test modules can focus on
//! behaviour rather than boilerplate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use agent_foreman::capabilities::memory::MemoryStore;
use agent_foreman::capabilities::notify::InboxNotifier;
use agent_foreman::capabilities::scorer::SkillScorer;
use agent_foreman::capabilities::{
    ProcessEvent, SpawnOptions, SpawnedProcess, Spawner, StewardRunner, Store, WorktreeInfo,
    WorktreeManager,
};
use agent_foreman::config::{DaemonConfig, DispatchConfig, HealthConfig, StewardConfig};
use agent_foreman::models::agent::{Agent, StewardProfile, WorkerMode};
use agent_foreman::models::inbox::InboxItem;
use agent_foreman::models::steward::StewardTrigger;
use agent_foreman::models::task::{Task, TaskPriority};
use agent_foreman::orchestrator::assignment::TaskAssignmentService;
use agent_foreman::orchestrator::daemon::DispatchDaemon;
use agent_foreman::orchestrator::dispatch::DispatchService;
use agent_foreman::orchestrator::health::{ActivityLog, HealthSteward};
use agent_foreman::orchestrator::scheduler::StewardScheduler;
use agent_foreman::orchestrator::session_manager::SessionManager;
use agent_foreman::{AppError, Result};

/// One fake process tracked by [`FakeSpawner`].
struct FakeProcess {
    agent_id: String,
    event_tx: mpsc::Sender<ProcessEvent>,
    events: Option<mpsc::Receiver<ProcessEvent>>,
    inputs: Vec<String>,
    interrupts: u32,
}

/// Spawner double: processes are bookkeeping entries whose event streams
/// the test drives by hand.
#[derive(Default)]
pub struct FakeSpawner {
    procs: Mutex<HashMap<String, FakeProcess>>,
    fail_next: Mutex<bool>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start` call fail.
    pub async fn fail_next_start(&self) {
        *self.fail_next.lock().await = true;
    }

    /// Handle of the most recent process started for the agent.
    pub async fn handle_for(&self, agent_id: &str) -> Option<String> {
        self.procs
            .lock()
            .await
            .iter()
            .find(|(_, proc)| proc.agent_id == agent_id)
            .map(|(handle, _)| handle.clone())
    }

    /// Inputs delivered to the process so far.
    pub async fn inputs(&self, handle: &str) -> Vec<String> {
        self.procs
            .lock()
            .await
            .get(handle)
            .map(|proc| proc.inputs.clone())
            .unwrap_or_default()
    }

    /// Interrupt signals delivered to the process so far.
    pub async fn interrupts(&self, handle: &str) -> u32 {
        self.procs
            .lock()
            .await
            .get(handle)
            .map_or(0, |proc| proc.interrupts)
    }

    /// Push a process event, as if the agent produced it.
    pub async fn emit(&self, handle: &str, event: ProcessEvent) {
        let tx = self
            .procs
            .lock()
            .await
            .get(handle)
            .map(|proc| proc.event_tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn start(&self, agent: &Agent, _opts: SpawnOptions) -> Result<SpawnedProcess> {
        if std::mem::take(&mut *self.fail_next.lock().await) {
            return Err(AppError::Spawn("injected spawn failure".into()));
        }
        let handle = Uuid::new_v4().to_string();
        let (event_tx, events) = mpsc::channel(64);
        self.procs.lock().await.insert(
            handle.clone(),
            FakeProcess {
                agent_id: agent.id.clone(),
                event_tx,
                events: Some(events),
                inputs: Vec::new(),
                interrupts: 0,
            },
        );
        Ok(SpawnedProcess {
            resume_handle: Some(format!("resume-{handle}")),
            handle,
            pid: Some(4242),
        })
    }

    async fn stop(&self, handle: &str) -> Result<()> {
        let tx = self
            .procs
            .lock()
            .await
            .get(handle)
            .map(|proc| proc.event_tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(ProcessEvent::Exit { code: Some(0) }).await;
        }
        Ok(())
    }

    async fn send_input(&self, handle: &str, text: &str) -> Result<()> {
        let mut procs = self.procs.lock().await;
        let proc = procs
            .get_mut(handle)
            .ok_or_else(|| AppError::NotFound(format!("no process {handle}")))?;
        proc.inputs.push(text.to_owned());
        Ok(())
    }

    async fn resize(&self, _handle: &str, _cols: u16, _rows: u16) -> Result<()> {
        Ok(())
    }

    async fn interrupt(&self, handle: &str) -> Result<()> {
        let mut procs = self.procs.lock().await;
        if let Some(proc) = procs.get_mut(handle) {
            proc.interrupts += 1;
        }
        Ok(())
    }

    async fn take_events(&self, handle: &str) -> Result<mpsc::Receiver<ProcessEvent>> {
        let mut procs = self.procs.lock().await;
        let proc = procs
            .get_mut(handle)
            .ok_or_else(|| AppError::NotFound(format!("no process {handle}")))?;
        proc.events
            .take()
            .ok_or_else(|| AppError::Spawn("event stream already taken".into()))
    }
}

/// Worktree manager double backed by a path set.
#[derive(Default)]
pub struct FakeWorktrees {
    existing: Mutex<std::collections::HashSet<String>>,
    pub created: Mutex<Vec<String>>,
}

impl FakeWorktrees {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a checkout disappearing from disk.
    pub async fn forget(&self, path: &str) {
        self.existing.lock().await.remove(path);
    }
}

#[async_trait]
impl WorktreeManager for FakeWorktrees {
    async fn create_worktree(
        &self,
        agent_name: &str,
        task_id: &str,
        task_title: &str,
    ) -> Result<WorktreeInfo> {
        let path = format!("/fake/worktrees/{agent_name}-{task_id}");
        self.existing.lock().await.insert(path.clone());
        self.created.lock().await.push(path.clone());
        Ok(WorktreeInfo {
            path,
            branch: agent_foreman::orchestrator::assignment::branch_name(
                agent_name, task_id, task_title,
            ),
            branch_created: true,
        })
    }

    async fn remove_worktree(&self, path: &str, _force: bool) -> Result<()> {
        self.existing.lock().await.remove(path);
        Ok(())
    }

    async fn worktree_exists(&self, path: &str) -> Result<bool> {
        Ok(self.existing.lock().await.contains(path))
    }

    async fn list_worktrees(&self) -> Result<Vec<String>> {
        Ok(self.existing.lock().await.iter().cloned().collect())
    }
}

/// Steward runner double recording invocations.
#[derive(Default)]
pub struct FakeStewardRunner {
    pub runs: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
    fail: Mutex<bool>,
}

impl FakeStewardRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = Some(delay);
    }

    pub async fn fail_runs(&self) {
        *self.fail.lock().await = true;
    }

    pub async fn run_count(&self) -> usize {
        self.runs.lock().await.len()
    }
}

#[async_trait]
impl StewardRunner for FakeStewardRunner {
    async fn run(&self, steward: &Agent, trigger: &StewardTrigger) -> Result<String> {
        if let Some(delay) = *self.delay.lock().await {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock().await {
            return Err(AppError::Scheduler("injected runner failure".into()));
        }
        self.runs
            .lock()
            .await
            .push((steward.id.clone(), trigger.label().to_owned()));
        Ok(format!("{} ran", steward.id))
    }
}

/// Fully wired in-memory orchestration stack.
pub struct Harness {
    pub agents: Arc<dyn Store<Agent>>,
    pub tasks: Arc<dyn Store<Task>>,
    pub inbox: Arc<dyn Store<InboxItem>>,
    pub spawner: Arc<FakeSpawner>,
    pub worktrees: Arc<FakeWorktrees>,
    pub runner: Arc<FakeStewardRunner>,
    pub activity: Arc<ActivityLog>,
    pub sessions: Arc<SessionManager>,
    pub assignment: Arc<TaskAssignmentService>,
    pub dispatch: Arc<DispatchService>,
    pub health: Arc<HealthSteward>,
    pub scheduler: Arc<StewardScheduler>,
    pub daemon: Arc<DispatchDaemon>,
}

/// Health thresholds tight enough for tests that wait on real time.
pub fn test_health_config() -> HealthConfig {
    HealthConfig {
        no_output_threshold_seconds: 1,
        error_window_seconds: 60,
        error_count_threshold: 3,
        max_ping_attempts: 2,
        ..HealthConfig::default()
    }
}

pub fn test_steward_config() -> StewardConfig {
    StewardConfig {
        execution_timeout_seconds: 5,
        max_history_per_steward: 5,
        start_immediately: false,
    }
}

/// Build the full stack over fakes.
pub async fn harness() -> Harness {
    harness_with(test_health_config(), test_steward_config()).await
}

/// Build the full stack with explicit health/steward settings.
pub async fn harness_with(health_config: HealthConfig, steward_config: StewardConfig) -> Harness {
    let agents: Arc<dyn Store<Agent>> = Arc::new(MemoryStore::new());
    let tasks: Arc<dyn Store<Task>> = Arc::new(MemoryStore::new());
    let inbox: Arc<dyn Store<InboxItem>> = Arc::new(MemoryStore::new());

    let spawner = Arc::new(FakeSpawner::new());
    let worktrees = Arc::new(FakeWorktrees::new());
    let runner = Arc::new(FakeStewardRunner::new());
    let notifier = Arc::new(InboxNotifier::new(Arc::clone(&inbox), "C_FLEET"));

    let activity = Arc::new(ActivityLog::new());
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&agents),
        Arc::clone(&spawner) as Arc<dyn Spawner>,
        Arc::clone(&activity),
        Duration::from_secs(3_600),
    ));
    let assignment = Arc::new(TaskAssignmentService::new(
        Arc::clone(&tasks),
        Arc::clone(&agents),
        None,
    ));
    let dispatch = Arc::new(DispatchService::new(
        Arc::clone(&assignment),
        Arc::clone(&tasks),
        Arc::clone(&agents),
        notifier.clone(),
        Arc::new(SkillScorer),
        DispatchConfig::default(),
    ));
    let health = Arc::new(HealthSteward::new(
        health_config,
        Arc::clone(&activity),
        Arc::clone(&agents),
        Arc::clone(&sessions),
        Arc::clone(&assignment),
        Arc::clone(&dispatch),
        notifier,
    ));
    let scheduler = Arc::new(StewardScheduler::new(
        steward_config,
        Arc::clone(&agents),
        Arc::clone(&runner) as Arc<dyn StewardRunner>,
    ));
    let daemon = Arc::new(DispatchDaemon::new(
        DaemonConfig::default(),
        Arc::clone(&agents),
        Arc::clone(&inbox),
        Arc::clone(&sessions),
        Arc::clone(&assignment),
        Arc::clone(&dispatch),
        Arc::clone(&health),
        Arc::clone(&scheduler),
        Arc::clone(&worktrees) as Arc<dyn WorktreeManager>,
    ));

    Harness {
        agents,
        tasks,
        inbox,
        spawner,
        worktrees,
        runner,
        activity,
        sessions,
        assignment,
        dispatch,
        health,
        scheduler,
        daemon,
    }
}

/// Register an ephemeral worker.
pub async fn add_worker(harness: &Harness, id: &str, mode: WorkerMode) -> Agent {
    let agent = Agent::worker(id, format!("{id}-name"), mode);
    harness.agents.create(agent).await.expect("create worker")
}

/// Register a steward with the given focus and optional cron schedule.
pub async fn add_steward(harness: &Harness, id: &str, focus: &str, schedule: Option<&str>) -> Agent {
    let agent = Agent::steward(
        id,
        format!("{id}-name"),
        StewardProfile {
            focus: focus.to_owned(),
            schedule: schedule.map(ToOwned::to_owned),
            events: Vec::new(),
        },
    );
    harness.agents.create(agent).await.expect("create steward")
}

/// Create an open task.
pub async fn add_task(harness: &Harness, id: &str, title: &str, priority: TaskPriority) -> Task {
    let task = Task::new(id, title, priority);
    harness.tasks.create(task).await.expect("create task")
}

/// Let spawned forwarder tasks catch up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
