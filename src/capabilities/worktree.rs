//! Git-backed worktree manager.
//!
//! Shells out to `git worktree` under the configured repository root.
//! Construction probes the root; a workspace without git support is a
//! structural failure the caller must decide on (disable the feature or
//! abort), so `open` is the only constructor and it is fallible.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{WorktreeInfo, WorktreeManager};
use crate::orchestrator::assignment::{branch_name, worktree_dir_name};
use crate::{AppError, Result};

/// Default [`WorktreeManager`] shelling out to the git CLI.
pub struct GitWorktrees {
    repo_root: PathBuf,
    worktree_base: PathBuf,
}

impl GitWorktrees {
    /// Open the manager against a git repository root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worktree` if `root` is not inside a git work
    /// tree — a constructor-time fatal condition.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let repo_root = root.as_ref().to_path_buf();
        let probe = Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(&repo_root)
            .output()
            .await
            .map_err(|err| AppError::Worktree(format!("git unavailable: {err}")))?;
        if !probe.status.success() {
            return Err(AppError::Worktree(format!(
                "{} is not a git work tree",
                repo_root.display()
            )));
        }
        let worktree_base = repo_root.join(".worktrees");
        Ok(Self {
            repo_root,
            worktree_base,
        })
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|err| AppError::Worktree(format!("git invocation failed: {err}")))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(AppError::Worktree(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn branch_exists(&self, branch: &str) -> bool {
        let refname = format!("refs/heads/{branch}");
        self.git(&["show-ref", "--verify", "--quiet", &refname])
            .await
            .is_ok()
    }
}

#[async_trait]
impl WorktreeManager for GitWorktrees {
    async fn create_worktree(
        &self,
        agent_name: &str,
        task_id: &str,
        task_title: &str,
    ) -> Result<WorktreeInfo> {
        let branch = branch_name(agent_name, task_id, task_title);
        let dir = worktree_dir_name(agent_name, task_id);
        let path = self.worktree_base.join(dir);
        let path_str = path.to_string_lossy().into_owned();

        if path.exists() {
            debug!(path = %path_str, "worktree already present");
            return Ok(WorktreeInfo {
                path: path_str,
                branch,
                branch_created: false,
            });
        }

        let branch_created = !self.branch_exists(&branch).await;
        if branch_created {
            self.git(&["worktree", "add", "-b", &branch, &path_str])
                .await?;
        } else {
            self.git(&["worktree", "add", &path_str, &branch]).await?;
        }

        info!(path = %path_str, branch, branch_created, "worktree created");
        Ok(WorktreeInfo {
            path: path_str,
            branch,
            branch_created,
        })
    }

    async fn remove_worktree(&self, path: &str, force: bool) -> Result<()> {
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path);
        self.git(&args).await?;
        info!(path, "worktree removed");
        Ok(())
    }

    async fn worktree_exists(&self, path: &str) -> Result<bool> {
        Ok(Path::new(path).is_dir())
    }

    async fn list_worktrees(&self) -> Result<Vec<String>> {
        let listing = self.git(&["worktree", "list", "--porcelain"]).await?;
        Ok(listing
            .lines()
            .filter_map(|line| line.strip_prefix("worktree "))
            .map(ToOwned::to_owned)
            .collect())
    }
}
