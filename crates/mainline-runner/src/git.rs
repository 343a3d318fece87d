//! Git plumbing behind one narrow seam.
//!
//! Every git operation the merge pipeline performs is a method on
//! [`GitOps`], so tests substitute a fake instead of shelling out. The
//! production implementation, [`GitCli`], drives the `git` binary through
//! argv subprocess calls with bounded timeouts.

use crate::subprocess::{run_argv, SubprocessOutput};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Result of replaying a branch onto main.
#[derive(Debug, Clone)]
pub enum RebaseOutcome {
    Completed,
    /// Rebase hit conflicts; it has already been aborted and the branch is
    /// back at its pre-attempt tip. Carries the captured git output.
    Conflict(String),
}

/// The exact git surface the merge pipeline needs, and nothing more.
#[async_trait]
pub trait GitOps: Send + Sync {
    /// `git worktree add --force <path> <branch>` — forced, so a stray
    /// checkout of the same branch elsewhere cannot block progress.
    async fn worktree_add(&self, repo: &Path, worktree: &Path, branch: &str) -> Result<()>;

    /// `git worktree remove <path> --force` followed by `worktree prune`.
    async fn worktree_remove(&self, repo: &Path, worktree: &Path) -> Result<()>;

    /// `git rebase --onto main <base_sha>` inside the worktree. On failure
    /// the implementation must issue `rebase --abort` before returning
    /// [`RebaseOutcome::Conflict`].
    async fn rebase_onto_main(&self, worktree: &Path, base_sha: &str) -> Result<RebaseOutcome>;

    /// Resolve a ref to a SHA. Callers pass full ref paths
    /// (`refs/heads/...`) to avoid short-name ambiguity.
    async fn rev_parse(&self, repo: &Path, refname: &str) -> Result<String>;

    /// `git merge-base --is-ancestor <ancestor> <descendant>`.
    async fn is_ancestor(&self, repo: &Path, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Commits in `old..new`, newest first.
    async fn rev_list(&self, repo: &Path, old: &str, new: &str) -> Result<Vec<String>>;

    /// `git update-ref <refname> <new> <old>` — atomic compare-and-swap.
    /// Returns false when the ref no longer holds `old` (a concurrent
    /// writer won); the ref is left at whatever the winner set.
    async fn update_ref_cas(&self, repo: &Path, refname: &str, new: &str, old: &str)
        -> Result<bool>;

    /// `git branch -d <branch>`.
    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Short name of the branch HEAD points at, or None when detached.
    async fn head_branch(&self, repo: &Path) -> Result<Option<String>>;

    /// Whether the working directory has no uncommitted changes.
    async fn is_clean(&self, repo: &Path) -> Result<bool>;

    /// Bring a clean working tree in line with its (already advanced) HEAD
    /// ref. Used only after a CAS update of a checked-out, clean main.
    async fn reset_to_head(&self, repo: &Path) -> Result<()>;
}

/// Production [`GitOps`] over the `git` binary.
pub struct GitCli {
    /// Timeout for individual plumbing calls. Rebase of a large series can
    /// take a while; everything else is near-instant.
    timeout: Duration,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<SubprocessOutput> {
        run_argv("git", args, cwd, self.timeout).await
    }

    async fn git_ok(&self, cwd: &Path, args: &[&str]) -> Result<SubprocessOutput> {
        let out = self.git(cwd, args).await?;
        if !out.success() {
            bail!("git {} failed: {}", args.join(" "), out.combined());
        }
        Ok(out)
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl GitOps for GitCli {
    async fn worktree_add(&self, repo: &Path, worktree: &Path, branch: &str) -> Result<()> {
        let path = worktree
            .to_str()
            .context("worktree path is not valid UTF-8")?;
        self.git_ok(repo, &["worktree", "add", "--force", path, branch])
            .await?;
        tracing::debug!(worktree = %worktree.display(), branch, "created temp worktree");
        Ok(())
    }

    async fn worktree_remove(&self, repo: &Path, worktree: &Path) -> Result<()> {
        let path = worktree
            .to_str()
            .context("worktree path is not valid UTF-8")?;
        let out = self
            .git(repo, &["worktree", "remove", path, "--force"])
            .await?;
        if !out.success() {
            // Directory removal is the caller's fallback; prune regardless
            // so stale registrations never accumulate.
            tracing::warn!(worktree = path, "git worktree remove failed: {}", out.combined());
        }
        let _ = self.git(repo, &["worktree", "prune"]).await;
        Ok(())
    }

    async fn rebase_onto_main(&self, worktree: &Path, base_sha: &str) -> Result<RebaseOutcome> {
        let out = self
            .git(worktree, &["rebase", "--onto", "main", base_sha])
            .await?;
        if out.success() {
            return Ok(RebaseOutcome::Completed);
        }
        // Leave nothing half-rebased: abort restores the branch tip.
        let abort = self.git(worktree, &["rebase", "--abort"]).await;
        if let Err(e) = abort {
            tracing::warn!(error = %e, "rebase --abort failed after conflict");
        }
        Ok(RebaseOutcome::Conflict(out.combined()))
    }

    async fn rev_parse(&self, repo: &Path, refname: &str) -> Result<String> {
        let out = self.git_ok(repo, &["rev-parse", refname]).await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn is_ancestor(&self, repo: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        let out = self
            .git(repo, &["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        // Exit 0 = ancestor, 1 = not; anything else is a real error.
        match out.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => bail!("merge-base --is-ancestor exited {code}: {}", out.combined()),
        }
    }

    async fn rev_list(&self, repo: &Path, old: &str, new: &str) -> Result<Vec<String>> {
        let range = format!("{old}..{new}");
        let out = self.git_ok(repo, &["rev-list", &range]).await?;
        Ok(out
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn update_ref_cas(
        &self,
        repo: &Path,
        refname: &str,
        new: &str,
        old: &str,
    ) -> Result<bool> {
        let out = self.git(repo, &["update-ref", refname, new, old]).await?;
        Ok(out.success())
    }

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.git_ok(repo, &["branch", "-d", branch]).await?;
        Ok(())
    }

    async fn head_branch(&self, repo: &Path) -> Result<Option<String>> {
        let out = self.git(repo, &["symbolic-ref", "-q", "--short", "HEAD"]).await?;
        if out.success() {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    async fn is_clean(&self, repo: &Path) -> Result<bool> {
        let out = self.git_ok(repo, &["status", "--porcelain"]).await?;
        Ok(out.stdout.trim().is_empty())
    }

    async fn reset_to_head(&self, repo: &Path) -> Result<()> {
        self.git_ok(repo, &["reset", "--hard"]).await?;
        Ok(())
    }
}
