//! Session-backed steward runner.
//!
//! Executes a steward by forwarding the trigger prompt into its running
//! session, starting one in the workspace root when none is active.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::StewardRunner;
use crate::models::agent::Agent;
use crate::models::steward::StewardTrigger;
use crate::orchestrator::session_manager::{SessionManager, StartOptions};
use crate::Result;

/// Default [`StewardRunner`] delivering trigger prompts via sessions.
pub struct SessionStewardRunner {
    sessions: Arc<SessionManager>,
    workspace_root: String,
}

impl SessionStewardRunner {
    /// Create a runner starting sessions in the given directory.
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>, workspace_root: impl Into<String>) -> Self {
        Self {
            sessions,
            workspace_root: workspace_root.into(),
        }
    }

    fn trigger_prompt(steward: &Agent, trigger: &StewardTrigger) -> String {
        let focus = steward
            .steward
            .as_ref()
            .map_or("maintenance", |profile| profile.focus.as_str());
        format!(
            "Run your {focus} routine now ({} trigger).",
            trigger.label()
        )
    }
}

#[async_trait]
impl StewardRunner for SessionStewardRunner {
    async fn run(&self, steward: &Agent, trigger: &StewardTrigger) -> Result<String> {
        let prompt = Self::trigger_prompt(steward, trigger);

        if let Some(session) = self.sessions.get_active_session(&steward.id).await {
            self.sessions.send_input(&session.id, &prompt).await?;
            info!(steward_id = %steward.id, session_id = %session.id, "trigger forwarded to session");
            return Ok(format!("forwarded trigger to session {}", session.id));
        }

        let session = self
            .sessions
            .start_session(
                &steward.id,
                StartOptions {
                    working_dir: self.workspace_root.clone(),
                    worktree: None,
                    prompt: Some(prompt),
                },
            )
            .await?;
        info!(steward_id = %steward.id, session_id = %session.id, "steward session started");
        Ok(format!("started session {}", session.id))
    }
}
