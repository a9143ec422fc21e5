#![forbid(unsafe_code)]

//! `agent-foremand` — fleet orchestration daemon binary.
//!
//! Bootstraps configuration, wires the default capability adapters, and
//! runs the dispatch daemon until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_foreman::capabilities::memory::MemoryStore;
use agent_foreman::capabilities::notify::InboxNotifier;
use agent_foreman::capabilities::process::CommandSpawner;
use agent_foreman::capabilities::scorer::SkillScorer;
use agent_foreman::capabilities::steward_runner::SessionStewardRunner;
use agent_foreman::capabilities::worktree::GitWorktrees;
use agent_foreman::capabilities::Store;
use agent_foreman::config::GlobalConfig;
use agent_foreman::models::agent::Agent;
use agent_foreman::models::inbox::InboxItem;
use agent_foreman::models::task::Task;
use agent_foreman::orchestrator::assignment::TaskAssignmentService;
use agent_foreman::orchestrator::daemon::DispatchDaemon;
use agent_foreman::orchestrator::dispatch::DispatchService;
use agent_foreman::orchestrator::health::{spawn_crash_consumer, ActivityLog, HealthSteward};
use agent_foreman::orchestrator::scheduler::StewardScheduler;
use agent_foreman::orchestrator::session_manager::SessionManager;
use agent_foreman::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-foremand", about = "Agent fleet orchestration daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace root worktrees are created under.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-foremand bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.workspace_root = canonical;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Stores and capability adapters ──────────────────
    let agents: Arc<dyn Store<Agent>> = Arc::new(MemoryStore::new());
    let tasks: Arc<dyn Store<Task>> = Arc::new(MemoryStore::new());
    let inbox: Arc<dyn Store<InboxItem>> = Arc::new(MemoryStore::new());

    let workspace_root = config.workspace_root.to_string_lossy().into_owned();
    // A workspace without git support is structurally unusable for
    // dispatch; abort rather than run without isolation.
    let worktrees = Arc::new(GitWorktrees::open(&config.workspace_root).await?);
    let spawner = Arc::new(CommandSpawner::new(
        config.worker_cli.clone(),
        config.worker_cli_args.clone(),
    ));
    let notifier = Arc::new(InboxNotifier::new(Arc::clone(&inbox), "fleet"));
    info!("capability adapters ready");

    // ── Orchestration services ──────────────────────────
    let activity = Arc::new(ActivityLog::new());
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&agents),
        spawner,
        Arc::clone(&activity),
        config.session_retention(),
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
        config.dispatch.clone(),
    ));
    let health = Arc::new(HealthSteward::new(
        config.health.clone(),
        Arc::clone(&activity),
        Arc::clone(&agents),
        Arc::clone(&sessions),
        Arc::clone(&assignment),
        Arc::clone(&dispatch),
        notifier.clone(),
    ));
    let runner = Arc::new(SessionStewardRunner::new(
        Arc::clone(&sessions),
        workspace_root,
    ));
    let scheduler = Arc::new(StewardScheduler::new(
        config.steward.clone(),
        Arc::clone(&agents),
        runner,
    ));
    if config.steward.start_immediately {
        let registered = scheduler.register_all_stewards().await?;
        scheduler.start();
        info!(registered, "steward scheduler started immediately");
    }

    // ── Background tasks ────────────────────────────────
    let ct = CancellationToken::new();

    let crash_handle = match sessions.take_exit_stream().await {
        Some(exits) => Some(spawn_crash_consumer(exits, Arc::clone(&health), ct.clone())),
        None => {
            error!("session exit stream already taken");
            None
        }
    };

    let daemon = Arc::new(DispatchDaemon::new(
        config.daemon.clone(),
        Arc::clone(&agents),
        Arc::clone(&inbox),
        Arc::clone(&sessions),
        assignment,
        dispatch,
        health,
        scheduler,
        worktrees,
    ));
    let daemon_handle = Arc::clone(&daemon).spawn(ct.clone());
    info!("dispatch daemon running");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Stop live sessions so agent processes exit ──────
    for session in sessions.list_active().await {
        if let Err(err) = sessions.stop_session(&session.id).await {
            error!(session_id = %session.id, %err, "failed to stop session during shutdown");
        }
    }

    let _ = daemon_handle.await;
    if let Some(handle) = crash_handle {
        let _ = handle.await;
    }
    info!("agent-foremand shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
