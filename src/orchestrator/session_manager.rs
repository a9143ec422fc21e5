//! Session lifecycle management: start, resume, suspend, stop, interrupt.
//!
//! Owns the in-process session registry and the per-session event
//! fan-out. A forwarder task bridges each spawned process's event stream
//! into the session emitter, the health activity log, and the manager's
//! exit stream. Stopping is the only authoritative terminal transition;
//! interrupting is a best-effort signal with no state-machine effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, info_span, warn};

use crate::capabilities::{ProcessEvent, SpawnOptions, Spawner, Store};
use crate::models::agent::Agent;
use crate::models::session::{Session, SessionStatus, TerminationReason};
use crate::orchestrator::health::ActivityLog;
use crate::{AppError, Result};

/// Typed event published to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A line of structured output from the agent.
    Output(String),
    /// A line of error output.
    Error(String),
    /// The session reached the terminal state.
    Exit {
        /// Process exit code; `None` when killed by a signal.
        code: Option<i32>,
    },
}

/// Terminal notification delivered on the manager's exit stream.
#[derive(Debug, Clone)]
pub struct SessionExit {
    /// Terminated session.
    pub session_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Why it terminated.
    pub reason: TerminationReason,
    /// Process exit code when the process ended itself.
    pub exit_code: Option<i32>,
}

/// Publish/subscribe fan-out owned by one session.
///
/// Subscribers attach and detach independently; `unsubscribe` is
/// idempotent and all subscribers are detached on every exit path.
pub struct SessionEvents {
    subscribers: std::sync::Mutex<HashMap<u64, mpsc::Sender<SessionEvent>>>,
    next_id: AtomicU64,
}

impl SessionEvents {
    fn new() -> Self {
        Self {
            subscribers: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a subscriber, returning its id and receiving end.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, tx);
        }
        (id, rx)
    }

    /// Detach a subscriber. Safe to call redundantly.
    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.remove(&id);
        }
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }

    fn publish(&self, event: &SessionEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            // Drop subscribers whose receiver has gone away or stopped
            // draining; a slow consumer must not block the forwarder.
            subs.retain(|_, tx| tx.try_send(event.clone()).is_ok());
        }
    }

    fn detach_all(&self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.clear();
        }
    }
}

struct SessionEntry {
    session: Session,
    emitter: Arc<SessionEvents>,
    handle: String,
}

/// Options for starting a session.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Directory the process runs in.
    pub working_dir: String,
    /// Worktree the session is rooted in.
    pub worktree: Option<String>,
    /// Initial prompt delivered to the agent.
    pub prompt: Option<String>,
}

/// Owns the lifecycle of spawned agent processes.
pub struct SessionManager {
    agents: Arc<dyn Store<Agent>>,
    spawner: Arc<dyn Spawner>,
    activity: Arc<ActivityLog>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    exit_tx: mpsc::Sender<SessionExit>,
    exit_rx: Mutex<Option<mpsc::Receiver<SessionExit>>>,
    retention: Duration,
}

impl SessionManager {
    /// Create a manager over the given spawner and agent registry.
    #[must_use]
    pub fn new(
        agents: Arc<dyn Store<Agent>>,
        spawner: Arc<dyn Spawner>,
        activity: Arc<ActivityLog>,
        retention: Duration,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::channel(64);
        Self {
            agents,
            spawner,
            activity,
            sessions: RwLock::new(HashMap::new()),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
            retention,
        }
    }

    /// Take the terminal-notification stream. Yields at most once.
    pub async fn take_exit_stream(&self) -> Option<mpsc::Receiver<SessionExit>> {
        self.exit_rx.lock().await.take()
    }

    /// The agent's current non-terminated session, if any.
    pub async fn get_active_session(&self, agent_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .values()
            .map(|entry| &entry.session)
            .find(|session| session.agent_id == agent_id && session.is_active())
            .cloned()
    }

    /// Fetch one session record.
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    /// All session records, including terminated ones awaiting pruning.
    pub async fn list_sessions(&self) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Non-terminated sessions.
    pub async fn list_active(&self) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .map(|entry| &entry.session)
            .filter(|session| session.is_active())
            .cloned()
            .collect()
    }

    /// Start a new session for an agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown agent,
    /// `AppError::SessionExists` when a non-terminated session already
    /// exists, or `AppError::Spawn` when the spawner fails — in which
    /// case a terminated session record is still kept.
    pub async fn start_session(self: &Arc<Self>, agent_id: &str, opts: StartOptions) -> Result<Session> {
        let span = info_span!("start_session", agent_id);
        let _guard = span.enter();

        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))?;

        if let Some(existing) = self.get_active_session(agent_id).await {
            return Err(AppError::SessionExists(format!(
                "agent {agent_id} already has session {}",
                existing.id
            )));
        }

        let session = Session::new(
            agent.id.clone(),
            agent.role,
            agent.worker_mode,
            opts.working_dir.clone(),
            opts.worktree.clone(),
        );

        self.launch(agent, session, opts, None).await
    }

    /// Resume the agent's most recent resumable session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionExists` when a session is already
    /// active, or `AppError::NoResumableSession` when no terminated
    /// session with a resume handle exists.
    pub async fn resume_session(self: &Arc<Self>, agent_id: &str) -> Result<Session> {
        let span = info_span!("resume_session", agent_id);
        let _guard = span.enter();

        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))?;

        if let Some(existing) = self.get_active_session(agent_id).await {
            return Err(AppError::SessionExists(format!(
                "agent {agent_id} already has session {}",
                existing.id
            )));
        }

        let prior = self
            .sessions
            .read()
            .await
            .values()
            .map(|entry| &entry.session)
            .filter(|session| {
                session.agent_id == agent_id
                    && !session.is_active()
                    && session.resume_handle.is_some()
            })
            .max_by_key(|session| session.last_activity_at)
            .cloned()
            .ok_or_else(|| {
                AppError::NoResumableSession(format!("agent {agent_id} has no prior session"))
            })?;

        let opts = StartOptions {
            working_dir: prior.working_dir.clone(),
            worktree: prior.worktree.clone(),
            prompt: None,
        };
        let session = Session::new(
            agent.id.clone(),
            agent.role,
            agent.worker_mode,
            prior.working_dir.clone(),
            prior.worktree.clone(),
        );
        info!(prior_session = %prior.id, "resuming from prior session");

        self.launch(agent, session, opts, prior.resume_handle).await
    }

    async fn launch(
        self: &Arc<Self>,
        agent: Agent,
        mut session: Session,
        opts: StartOptions,
        resume_handle: Option<String>,
    ) -> Result<Session> {
        let spawn_opts = SpawnOptions {
            working_dir: opts.working_dir,
            worktree: opts.worktree,
            prompt: opts.prompt,
            resume_handle,
        };

        let spawned = match self.spawner.start(&agent, spawn_opts).await {
            Ok(spawned) => spawned,
            Err(err) => {
                session.status = SessionStatus::Terminated;
                session.terminated_at = Some(Utc::now());
                session.termination_reason = Some(TerminationReason::SpawnFailed);
                let entry = SessionEntry {
                    emitter: Arc::new(SessionEvents::new()),
                    handle: String::new(),
                    session: session.clone(),
                };
                self.sessions.write().await.insert(session.id.clone(), entry);
                warn!(agent_id = %agent.id, %err, "spawn failed; session recorded terminated");
                return Err(err);
            }
        };

        session.pid = spawned.pid;
        session.resume_handle = spawned.resume_handle.clone();
        session.status = SessionStatus::Running;

        let events = self.spawner.take_events(&spawned.handle).await?;
        let emitter = Arc::new(SessionEvents::new());
        let entry = SessionEntry {
            emitter: Arc::clone(&emitter),
            handle: spawned.handle,
            session: session.clone(),
        };
        self.sessions.write().await.insert(session.id.clone(), entry);

        let manager = Arc::clone(self);
        let session_id = session.id.clone();
        let agent_id = agent.id.clone();
        tokio::spawn(async move {
            manager.forward_events(session_id, agent_id, events, emitter).await;
        });

        info!(
            session_id = %session.id,
            agent_id = %agent.id,
            pid = session.pid.unwrap_or(0),
            "session running"
        );
        Ok(session)
    }

    /// Bridge spawner events into subscribers, the activity log, and the
    /// exit stream. Runs until the process exits or the session entry is
    /// torn down, and detaches all subscribers on exit.
    async fn forward_events(
        &self,
        session_id: String,
        agent_id: String,
        mut events: mpsc::Receiver<ProcessEvent>,
        emitter: Arc<SessionEvents>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output(text) => {
                    self.activity.record_output(&agent_id);
                    self.touch(&session_id).await;
                    emitter.publish(&SessionEvent::Output(text));
                }
                ProcessEvent::Error(text) => {
                    self.activity.record_error(&agent_id);
                    self.touch(&session_id).await;
                    emitter.publish(&SessionEvent::Error(text));
                }
                ProcessEvent::Exit { code } => {
                    let reason = if code == Some(0) {
                        TerminationReason::Exited
                    } else {
                        TerminationReason::Crashed
                    };
                    let transitioned = self.mark_terminated(&session_id, reason, false).await;
                    emitter.publish(&SessionEvent::Exit { code });
                    emitter.detach_all();
                    if transitioned {
                        let _ = self
                            .exit_tx
                            .send(SessionExit {
                                session_id: session_id.clone(),
                                agent_id: agent_id.clone(),
                                reason,
                                exit_code: code,
                            })
                            .await;
                    }
                    break;
                }
            }
        }
        // Stream closed without an exit event (spawner torn down): make
        // sure no subscriber is left attached.
        emitter.detach_all();
        debug!(session_id, "event forwarder finished");
    }

    async fn touch(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().await.get_mut(session_id) {
            entry.session.last_activity_at = Utc::now();
        }
    }

    /// Apply a terminal transition. Returns whether this call performed
    /// it; `authoritative` overwrites the recorded reason even when the
    /// session already terminated (used by `stop`/`suspend`).
    async fn mark_terminated(
        &self,
        session_id: &str,
        reason: TerminationReason,
        authoritative: bool,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(session_id) else {
            return false;
        };
        if entry.session.status == SessionStatus::Terminated {
            if authoritative {
                entry.session.termination_reason = Some(reason);
            }
            entry.emitter.detach_all();
            return false;
        }
        entry.session.status = SessionStatus::Terminated;
        entry.session.terminated_at = Some(Utc::now());
        entry.session.termination_reason = Some(reason);
        entry.emitter.detach_all();
        true
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        if !entry.session.status.can_transition_to(status) {
            return Err(AppError::Storage(format!(
                "invalid session status transition {:?} -> {status:?}",
                entry.session.status
            )));
        }
        entry.session.status = status;
        Ok(entry.session.clone())
    }

    async fn handle_of(&self, session_id: &str) -> Result<(String, String)> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        Ok((entry.handle.clone(), entry.session.agent_id.clone()))
    }

    /// Stop a session: the only authoritative terminal transition.
    ///
    /// Clears the agent's health activity counters.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or
    /// `AppError::Storage` for an invalid transition.
    pub async fn stop_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("stop_session", session_id);
        let _guard = span.enter();

        let (handle, agent_id) = self.handle_of(session_id).await?;
        self.set_status(session_id, SessionStatus::Terminating).await?;

        if let Err(err) = self.spawner.stop(&handle).await {
            warn!(session_id, %err, "spawner stop failed");
        }
        self.mark_terminated(session_id, TerminationReason::Stopped, true)
            .await;
        self.activity.clear(&agent_id);

        info!(session_id, "session stopped");
        self.get_session(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
    }

    /// Suspend a session, retaining its resume handle for a later
    /// `resume_session`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or
    /// `AppError::Storage` for an invalid transition.
    pub async fn suspend_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("suspend_session", session_id);
        let _guard = span.enter();

        let (handle, _) = self.handle_of(session_id).await?;
        self.set_status(session_id, SessionStatus::Suspended).await?;

        if let Err(err) = self.spawner.stop(&handle).await {
            warn!(session_id, %err, "spawner stop failed during suspend");
        }
        self.mark_terminated(session_id, TerminationReason::Suspended, true)
            .await;

        info!(session_id, "session suspended");
        self.get_session(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
    }

    /// Best-effort interrupt of the underlying process.
    ///
    /// Does not change the recorded session status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn interrupt_session(&self, session_id: &str) -> Result<()> {
        let (handle, _) = self.handle_of(session_id).await?;
        self.spawner.interrupt(&handle).await
    }

    /// Forward input text into the session's process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session or
    /// `AppError::Spawn` when delivery fails.
    pub async fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        let (handle, _) = self.handle_of(session_id).await?;
        self.spawner.send_input(&handle, text).await
    }

    /// Resize the session's pseudo-terminal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let (handle, _) = self.handle_of(session_id).await?;
        self.spawner.resize(&handle, cols, rows).await
    }

    /// Attach a subscriber to the session's event stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn subscribe(&self, session_id: &str) -> Result<(u64, mpsc::Receiver<SessionEvent>)> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        Ok(entry.emitter.subscribe())
    }

    /// Detach a subscriber. Idempotent; unknown sessions are a no-op.
    pub async fn unsubscribe(&self, session_id: &str, subscriber_id: u64) {
        if let Some(entry) = self.sessions.read().await.get(session_id) {
            entry.emitter.unsubscribe(subscriber_id);
        }
    }

    /// Evict terminated sessions older than the retention window.
    ///
    /// Returns the number of sessions pruned.
    pub async fn prune_inactive_sessions(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.session.is_active()
                || entry
                    .session
                    .terminated_at
                    .map_or(true, |at| at > cutoff)
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, "terminated sessions pruned");
        }
        pruned
    }
}
