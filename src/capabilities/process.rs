//! Agent process spawner over `tokio::process`.
//!
//! Spawns host CLI processes for agent sessions. Each process gets
//! `kill_on_drop(true)` for safety, piped stdio, and environment variables
//! identifying the agent and session. Output and error lines are framed
//! into [`ProcessEvent`]s; process exit is observed when both pipes close.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ProcessEvent, SpawnedProcess, SpawnOptions, Spawner};
use crate::models::agent::Agent;
use crate::{AppError, Result};

/// Grace period before a stopped process is force-killed.
const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

struct ManagedProcess {
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    events: Option<mpsc::Receiver<ProcessEvent>>,
    pid: Option<u32>,
}

/// Default [`Spawner`] running agents as host CLI child processes.
pub struct CommandSpawner {
    cli: String,
    cli_args: Vec<String>,
    procs: Mutex<HashMap<String, ManagedProcess>>,
}

impl CommandSpawner {
    /// Create a spawner for the given host CLI binary and default args.
    #[must_use]
    pub fn new(cli: impl Into<String>, cli_args: Vec<String>) -> Self {
        Self {
            cli: cli.into(),
            cli_args,
            procs: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Spawner for CommandSpawner {
    async fn start(&self, agent: &Agent, opts: SpawnOptions) -> Result<SpawnedProcess> {
        let handle = Uuid::new_v4().to_string();

        let mut cmd = Command::new(&self.cli);
        cmd.args(&self.cli_args)
            .env("FOREMAN_AGENT_ID", &agent.id)
            .env("FOREMAN_SESSION_HANDLE", &handle)
            .current_dir(&opts.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref worktree) = opts.worktree {
            cmd.env("FOREMAN_WORKTREE", worktree);
        }
        if let Some(ref resume) = opts.resume_handle {
            cmd.arg("--resume").arg(resume);
        }
        if let Some(ref prompt) = opts.prompt {
            cmd.arg(prompt);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn {}: {err}", self.cli)))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("child stderr not captured".into()))?;

        info!(
            agent_id = %agent.id,
            pid = pid.unwrap_or(0),
            cli = %self.cli,
            "agent process spawned"
        );

        let (event_tx, event_rx) = mpsc::channel::<ProcessEvent>(256);
        let child = Arc::new(Mutex::new(child));

        // Pump both pipes into framed events; when both close the process
        // has exited and can be reaped for its status code.
        let pump_child = Arc::clone(&child);
        let pump_handle = handle.clone();
        tokio::spawn(async move {
            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut out_open = true;
            let mut err_open = true;

            while out_open || err_open {
                tokio::select! {
                    line = out_lines.next_line(), if out_open => match line {
                        Ok(Some(text)) => {
                            let _ = event_tx.send(ProcessEvent::Output(text)).await;
                        }
                        Ok(None) => out_open = false,
                        Err(err) => {
                            warn!(handle = %pump_handle, %err, "stdout read failed");
                            out_open = false;
                        }
                    },
                    line = err_lines.next_line(), if err_open => match line {
                        Ok(Some(text)) => {
                            let _ = event_tx.send(ProcessEvent::Error(text)).await;
                        }
                        Ok(None) => err_open = false,
                        Err(err) => {
                            warn!(handle = %pump_handle, %err, "stderr read failed");
                            err_open = false;
                        }
                    },
                }
            }

            let code = match pump_child.lock().await.wait().await {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(handle = %pump_handle, %err, "failed to reap child process");
                    None
                }
            };
            debug!(handle = %pump_handle, ?code, "agent process exited");
            let _ = event_tx.send(ProcessEvent::Exit { code }).await;
        });

        let managed = ManagedProcess {
            child,
            stdin: Arc::new(Mutex::new(stdin)),
            events: Some(event_rx),
            pid,
        };
        self.procs.lock().await.insert(handle.clone(), managed);

        Ok(SpawnedProcess {
            resume_handle: Some(handle.clone()),
            handle,
            pid,
        })
    }

    async fn stop(&self, handle: &str) -> Result<()> {
        let managed = self
            .procs
            .lock()
            .await
            .remove(handle)
            .ok_or_else(|| AppError::NotFound(format!("no process with handle {handle}")))?;

        // Close stdin so the agent sees EOF and can exit on its own.
        managed.stdin.lock().await.take();

        let mut child = managed.child.lock().await;
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(exit)) => {
                info!(handle, ?exit, "agent process exited within grace period");
            }
            Ok(Err(err)) => {
                warn!(handle, %err, "error waiting for agent process");
            }
            Err(_) => {
                warn!(handle, "agent process did not exit within grace period, forcing kill");
                if let Err(err) = child.kill().await {
                    warn!(handle, %err, "failed to force-kill agent process");
                }
            }
        }
        Ok(())
    }

    async fn send_input(&self, handle: &str, text: &str) -> Result<()> {
        let procs = self.procs.lock().await;
        let managed = procs
            .get(handle)
            .ok_or_else(|| AppError::NotFound(format!("no process with handle {handle}")))?;
        let stdin = Arc::clone(&managed.stdin);
        drop(procs);

        let mut guard = stdin.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| AppError::Spawn("process stdin already closed".into()))?;
        writer
            .write_all(format!("{text}\n").as_bytes())
            .await
            .map_err(|err| AppError::Spawn(format!("stdin write failed: {err}")))?;
        writer
            .flush()
            .await
            .map_err(|err| AppError::Spawn(format!("stdin flush failed: {err}")))?;
        Ok(())
    }

    async fn resize(&self, handle: &str, cols: u16, rows: u16) -> Result<()> {
        // Plain-pipe transport has no PTY to resize; accept and log so the
        // call remains best-effort for transports that do.
        debug!(handle, cols, rows, "resize ignored (no pty)");
        Ok(())
    }

    async fn interrupt(&self, handle: &str) -> Result<()> {
        let procs = self.procs.lock().await;
        let managed = procs
            .get(handle)
            .ok_or_else(|| AppError::NotFound(format!("no process with handle {handle}")))?;
        let pid = managed.pid;
        drop(procs);

        #[cfg(unix)]
        if let Some(pid) = pid {
            let target = nix::unistd::Pid::from_raw(
                i32::try_from(pid).map_err(|_| AppError::Spawn("pid out of range".into()))?,
            );
            if let Err(err) = nix::sys::signal::kill(target, nix::sys::signal::Signal::SIGINT) {
                warn!(handle, %err, "interrupt signal failed");
            }
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            debug!(handle, "interrupt unsupported on this platform");
        }

        Ok(())
    }

    async fn take_events(&self, handle: &str) -> Result<mpsc::Receiver<ProcessEvent>> {
        let mut procs = self.procs.lock().await;
        let managed = procs
            .get_mut(handle)
            .ok_or_else(|| AppError::NotFound(format!("no process with handle {handle}")))?;
        managed
            .events
            .take()
            .ok_or_else(|| AppError::Spawn("event stream already taken".into()))
    }
}
