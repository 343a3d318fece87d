//! Git worktree lifecycle management.
//!
//! Two kinds of worktree live here: the disposable temp worktree the merge
//! worker rebases in, and the long-lived per-agent worktrees managed behind
//! the [`WorktreeProvider`] seam.

use crate::git::GitOps;
use anyhow::{Context, Result};
use async_trait::async_trait;
use mainline_core::task::{RepoName, TaskId};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Disposable worktree for one repo of one merge attempt.
///
/// Removal is expected to happen explicitly through [`TempWorktree::remove`]
/// on every normal exit path; `Drop` is the last-resort fallback (panic,
/// early `?`) and shells out synchronously like any best-effort teardown.
pub struct TempWorktree {
    pub path: PathBuf,
    repo_path: PathBuf,
    removed: bool,
}

impl TempWorktree {
    /// Register a guard for an already-added worktree.
    pub fn new(repo_path: &Path, path: PathBuf) -> Self {
        Self {
            path,
            repo_path: repo_path.to_path_buf(),
            removed: false,
        }
    }

    /// Remove the worktree through the git seam. Never propagates teardown
    /// problems — they are logged so they cannot mask the merge result.
    pub async fn remove(&mut self, git: &dyn GitOps) {
        if self.removed {
            return;
        }
        if let Err(e) = git.worktree_remove(&self.repo_path, &self.path).await {
            tracing::warn!(
                worktree = %self.path.display(),
                error = %e,
                "temp worktree removal failed"
            );
        }
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(
                    worktree = %self.path.display(),
                    error = %e,
                    "temp worktree directory removal failed"
                );
            }
        }
        self.removed = true;
    }
}

impl Drop for TempWorktree {
    fn drop(&mut self) {
        if self.removed || !self.path.exists() {
            return;
        }
        tracing::warn!(
            worktree = %self.path.display(),
            "temp worktree not explicitly removed; cleaning up in drop"
        );
        let output = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(&self.path)
            .current_dir(&self.repo_path)
            .output();
        match output {
            Ok(out) if out.status.success() => {}
            _ => {
                let _ = std::fs::remove_dir_all(&self.path);
            }
        }
        let _ = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_path)
            .output();
    }
}

/// Long-lived agent worktrees, keyed by (repo, agent, task).
///
/// The merge pipeline only ever calls `remove` (after a successful merge);
/// provisioning belongs to the agent runtime. Removal is idempotent — a
/// worktree that is already gone is not an error.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    async fn create(
        &self,
        repo: &Path,
        repo_name: &RepoName,
        agent: &str,
        task: &TaskId,
        branch: &str,
    ) -> Result<PathBuf>;

    async fn remove(&self, repo: &Path, repo_name: &RepoName, agent: &str, task: &TaskId)
        -> Result<()>;
}

/// Filesystem layout: `<base_dir>/<agent>/<task>-<repo>`.
pub struct AgentWorktrees {
    base_dir: PathBuf,
}

impl AgentWorktrees {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, repo_name: &RepoName, agent: &str, task: &TaskId) -> PathBuf {
        self.base_dir.join(agent).join(format!("{task}-{repo_name}"))
    }
}

#[async_trait]
impl WorktreeProvider for AgentWorktrees {
    async fn create(
        &self,
        repo: &Path,
        repo_name: &RepoName,
        agent: &str,
        task: &TaskId,
        branch: &str,
    ) -> Result<PathBuf> {
        let path = self.path_for(repo_name, agent, task);
        std::fs::create_dir_all(path.parent().context("worktree path has no parent")?)
            .context("failed to create agent worktree base directory")?;

        let git = crate::git::GitCli::default();
        git.worktree_add(repo, &path, branch).await?;
        tracing::info!(worktree = %path.display(), agent, branch, "created agent worktree");
        Ok(path)
    }

    async fn remove(
        &self,
        repo: &Path,
        repo_name: &RepoName,
        agent: &str,
        task: &TaskId,
    ) -> Result<()> {
        let path = self.path_for(repo_name, agent, task);
        if !path.exists() {
            return Ok(()); // idempotent
        }
        let git = crate::git::GitCli::default();
        git.worktree_remove(repo, &path).await?;
        if path.exists() {
            std::fs::remove_dir_all(&path).context("agent worktree directory removal failed")?;
        }
        tracing::info!(worktree = %path.display(), agent, "removed agent worktree");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_worktree_remove_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let provider = AgentWorktrees::new(base.path());
        // Nothing was ever created; removal must still succeed.
        provider
            .remove(
                Path::new("/nonexistent-repo"),
                &RepoName::new("myrepo"),
                "alice",
                &TaskId(1),
            )
            .await
            .unwrap();
    }

    #[test]
    fn paths_are_scoped_per_agent_and_task() {
        let provider = AgentWorktrees::new("/work");
        let p = provider.path_for(&RepoName::new("myrepo"), "alice", &TaskId(7));
        assert_eq!(p, PathBuf::from("/work/alice/T0007-myrepo"));
    }
}
