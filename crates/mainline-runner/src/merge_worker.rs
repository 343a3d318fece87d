//! Serialized merge execution.
//!
//! One task at a time: rebase the task's branch onto main in a disposable
//! worktree, run the pre-merge check there, then fast-forward main with an
//! atomic compare-and-swap ref update. The persistent clone's working
//! directory is never touched except to catch up a clean, checked-out main
//! after its ref has advanced.

use crate::git::{GitOps, RebaseOutcome};
use crate::notify::{notify_best_effort, Notifier};
use crate::premerge;
use crate::subprocess::run_shell;
use crate::event_bus::EventBus;
use crate::worktree::{TempWorktree, WorktreeProvider};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use mainline_core::event::EventKind;
use mainline_core::merge::{FailureReason, MergeOutcome};
use mainline_core::repo::{RepoConfig, ReposConfig};
use mainline_core::task::{Task, TaskId, TaskStatus};
use mainline_db::task_store::TaskStore;
use redb::Database;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Result of merging one repo of a task.
enum RepoMerge {
    Merged {
        merge_base: String,
        merge_tip: String,
        /// The exact commits that landed, newest first.
        commits: Vec<String>,
    },
    Failed(MergeOutcome),
}

pub struct MergeWorker {
    repos: Arc<ReposConfig>,
    git: Arc<dyn GitOps>,
    notifier: Arc<dyn Notifier>,
    worktrees: Arc<dyn WorktreeProvider>,
    bus: EventBus,
    /// Parent directory for disposable merge worktrees.
    tmp_dir: PathBuf,
}

impl MergeWorker {
    pub fn new(
        repos: Arc<ReposConfig>,
        git: Arc<dyn GitOps>,
        notifier: Arc<dyn Notifier>,
        worktrees: Arc<dyn WorktreeProvider>,
        bus: EventBus,
        tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repos,
            git,
            notifier,
            worktrees,
            bus,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Attempt to merge a task into main across all of its repos.
    ///
    /// Validation failures (no branch, unknown repo, missing base_sha)
    /// return a failed outcome without touching task status. Everything
    /// past validation moves the task to `merging` first, then routes the
    /// result: rework failures land in `conflict`, transient failures go
    /// back to `in_approval` for a later tick, success lands in `done`.
    ///
    /// Multi-repo tasks merge repo by repo with no cross-repo rollback. A
    /// failure partway leaves earlier repos merged; the recorded
    /// merge_base/merge_tip per repo say exactly how far the task got.
    pub async fn merge_task(&self, db: &Database, task_id: &TaskId) -> Result<MergeOutcome> {
        let store = TaskStore::new(db);
        let mut task = store
            .get(task_id)?
            .context(format!("task {task_id} not found"))?;

        if let Some(outcome) = self.validate(&task) {
            tracing::warn!(task = %task_id, reason = ?outcome.reason, "merge rejected in validation");
            return Ok(outcome);
        }
        let branch = task.branch.clone().context("validated task lost branch")?;

        task.merge_attempts += 1;
        task.updated_at = Utc::now();
        store.update(&task)?;
        let attempt = task.merge_attempts;

        let mut task = self
            .set_status(
                &store,
                &task,
                TaskStatus::Merging,
                &format!("merge attempt {attempt}"),
            )?;
        self.bus.emit(EventKind::MergeStarted {
            task_id: *task_id,
            branch: branch.clone(),
        });
        tracing::info!(task = %task_id, %branch, attempt, "merge started");

        for repo_name in task.repos.clone() {
            let cfg = self
                .repos
                .get(&repo_name)
                .context(format!("repo {repo_name} disappeared from config"))?;
            let base_sha = task
                .base_sha
                .get(&repo_name)
                .cloned()
                .context(format!("base_sha for {repo_name} disappeared"))?;

            match self.merge_repo(&task, cfg, &branch, &base_sha).await {
                Ok(RepoMerge::Merged {
                    merge_base,
                    merge_tip,
                    commits,
                }) => {
                    task.merge_base.insert(repo_name.clone(), merge_base.clone());
                    task.merge_tip.insert(repo_name.clone(), merge_tip.clone());
                    task.commits.insert(repo_name.clone(), commits);
                    task.updated_at = Utc::now();
                    store.update(&task)?;
                    self.bus.emit(EventKind::RepoMerged {
                        task_id: *task_id,
                        repo: repo_name.clone(),
                        merge_base: merge_base.clone(),
                        merge_tip: merge_tip.clone(),
                    });
                    tracing::info!(task = %task_id, repo = %repo_name, %merge_tip, "repo merged");
                }
                Ok(RepoMerge::Failed(outcome)) => {
                    return self.finish_failed(&store, &task, outcome).await;
                }
                Err(e) => {
                    // Infrastructure error we could not classify. Requeue
                    // so a later tick retries, then surface the error.
                    let detail = format!("internal error during merge: {e:#}");
                    if let Err(se) =
                        self.set_status(&store, &task, TaskStatus::InApproval, &detail)
                    {
                        tracing::error!(task = %task_id, error = %se, "failed to requeue after internal error");
                    }
                    return Err(e);
                }
            }
        }

        let task = self.set_status(&store, &task, TaskStatus::Done, "merged")?;
        let outcome = MergeOutcome::ok(format!(
            "merged {} onto main in {} repo(s)",
            branch,
            task.repos.len()
        ));
        self.bus.emit(EventKind::MergeFinished {
            task_id: *task_id,
            success: true,
            reason: None,
            message: outcome.message.clone(),
        });
        tracing::info!(task = %task_id, %branch, "merge finished");

        self.cleanup(&store, &task, &branch).await;
        Ok(outcome)
    }

    /// Pre-flight checks that fail without a status transition.
    fn validate(&self, task: &Task) -> Option<MergeOutcome> {
        if task.branch.is_none() {
            return Some(MergeOutcome::fail(
                FailureReason::MissingBranch,
                format!("{} has no branch recorded", task.id),
            ));
        }
        for repo in &task.repos {
            if self.repos.get(repo).is_none() {
                return Some(MergeOutcome::fail(
                    FailureReason::MissingRepo,
                    format!("{} references unconfigured repo {repo}", task.id),
                ));
            }
            if !task.base_sha.contains_key(repo) {
                return Some(MergeOutcome::fail(
                    FailureReason::MissingBaseSha,
                    format!("{} has no base_sha recorded for {repo}", task.id),
                ));
            }
        }
        None
    }

    fn set_status(
        &self,
        store: &TaskStore<'_>,
        task: &Task,
        to: TaskStatus,
        detail: &str,
    ) -> Result<Task> {
        let from = task.status;
        let updated = store.change_status(&task.id, to, Some(detail))?;
        self.bus.emit(EventKind::TaskStatusChanged {
            task_id: task.id,
            from,
            to,
            detail: detail.to_string(),
        });
        Ok(updated)
    }

    /// Merge one repo: disposable worktree, rebase, pre-merge check, CAS
    /// fast-forward. The worktree is removed on every path; the result of
    /// the attempt is captured first so teardown can never mask it.
    async fn merge_repo(
        &self,
        task: &Task,
        cfg: &RepoConfig,
        branch: &str,
        base_sha: &str,
    ) -> Result<RepoMerge> {
        let wt_path = self.tmp_dir.join(format!(
            "{}-{}-attempt{}",
            task.id, cfg.name, task.merge_attempts
        ));
        if let Err(e) = std::fs::create_dir_all(&self.tmp_dir) {
            return Ok(RepoMerge::Failed(MergeOutcome::fail(
                FailureReason::WorktreeError,
                format!("cannot create worktree parent directory: {e}"),
            )));
        }
        if let Err(e) = self.git.worktree_add(&cfg.path, &wt_path, branch).await {
            return Ok(RepoMerge::Failed(MergeOutcome::fail(
                FailureReason::WorktreeError,
                format!("worktree add failed for {}: {e:#}", cfg.name),
            )));
        }
        let mut guard = TempWorktree::new(&cfg.path, wt_path.clone());

        let result = self
            .rebase_and_fast_forward(cfg, branch, base_sha, &wt_path)
            .await;
        guard.remove(self.git.as_ref()).await;
        result
    }

    async fn rebase_and_fast_forward(
        &self,
        cfg: &RepoConfig,
        branch: &str,
        base_sha: &str,
        wt_path: &std::path::Path,
    ) -> Result<RepoMerge> {
        // A completed rebase rewrites refs/heads/<branch>; every failure
        // past that point must put the tip back so a failed attempt leaves
        // the branch exactly as it found it.
        let branch_ref = format!("refs/heads/{branch}");
        let original_tip = self.git.rev_parse(&cfg.path, &branch_ref).await?;

        match self.git.rebase_onto_main(wt_path, base_sha).await? {
            RebaseOutcome::Completed => {}
            RebaseOutcome::Conflict(output) => {
                // rebase --abort already restored the tip.
                return Ok(RepoMerge::Failed(MergeOutcome::fail(
                    FailureReason::RebaseConflict,
                    format!("rebase of {branch} onto main in {}:\n{output}", cfg.name),
                )));
            }
        }

        let plan = premerge::resolve(cfg.premerge_cmd.as_deref(), wt_path);
        if let Some(cmd) = &plan.command {
            let timeout = Duration::from_secs(cfg.premerge_timeout_secs);
            let out = run_shell(cmd, wt_path, timeout).await?;
            if !out.success() {
                let message = if out.timed_out {
                    format!(
                        "pre-merge command `{cmd}` timed out after {}s in {}",
                        cfg.premerge_timeout_secs, cfg.name
                    )
                } else {
                    format!(
                        "pre-merge command `{cmd}` exited {} in {}:\n{}",
                        out.exit_code,
                        cfg.name,
                        out.combined()
                    )
                };
                self.restore_branch_tip(cfg, &branch_ref, &original_tip).await;
                return Ok(RepoMerge::Failed(MergeOutcome::fail(
                    FailureReason::PreMergeFailed,
                    message,
                )));
            }
            tracing::debug!(repo = %cfg.name, %cmd, "pre-merge check passed");
        } else {
            tracing::debug!(repo = %cfg.name, reason = %plan.reason, "pre-merge check skipped");
        }

        // Refuse to advance main under uncommitted work in the persistent
        // clone. Checked before any ref mutation.
        let main_checked_out = self.git.head_branch(&cfg.path).await?.as_deref() == Some("main");
        if main_checked_out && !self.git.is_clean(&cfg.path).await? {
            self.restore_branch_tip(cfg, &branch_ref, &original_tip).await;
            return Ok(RepoMerge::Failed(MergeOutcome::fail(
                FailureReason::DirtyMain,
                format!(
                    "main is checked out with uncommitted changes in {}",
                    cfg.path.display()
                ),
            )));
        }

        // Full ref paths: a branch named "main" elsewhere must not alias.
        let old_main = self.git.rev_parse(&cfg.path, "refs/heads/main").await?;
        let new_tip = self.git.rev_parse(&cfg.path, &branch_ref).await?;

        if !self.git.is_ancestor(&cfg.path, &old_main, &new_tip).await? {
            self.restore_branch_tip(cfg, &branch_ref, &original_tip).await;
            return Ok(RepoMerge::Failed(MergeOutcome::fail(
                FailureReason::RefUpdateRace,
                format!("main moved in {} since rebase; will retry", cfg.name),
            )));
        }
        if !self
            .git
            .update_ref_cas(&cfg.path, "refs/heads/main", &new_tip, &old_main)
            .await?
        {
            self.restore_branch_tip(cfg, &branch_ref, &original_tip).await;
            return Ok(RepoMerge::Failed(MergeOutcome::fail(
                FailureReason::RefUpdateRace,
                format!(
                    "concurrent update of main in {} won the ref race; will retry",
                    cfg.name
                ),
            )));
        }

        // The ref advanced; if main is checked out and still clean, catch
        // the working directory up so it does not look behind.
        if main_checked_out {
            match self.git.is_clean(&cfg.path).await {
                Ok(true) => {
                    if let Err(e) = self.git.reset_to_head(&cfg.path).await {
                        tracing::warn!(repo = %cfg.name, error = %e, "post-merge reset failed");
                    }
                }
                Ok(false) => {
                    tracing::warn!(repo = %cfg.name, "working directory became dirty mid-merge; leaving it behind HEAD");
                }
                Err(e) => {
                    tracing::warn!(repo = %cfg.name, error = %e, "post-merge cleanliness check failed");
                }
            }
        }

        let commits = self.git.rev_list(&cfg.path, &old_main, &new_tip).await?;
        Ok(RepoMerge::Merged {
            merge_base: old_main,
            merge_tip: new_tip,
            commits,
        })
    }

    /// Move a rebased branch ref back to its pre-attempt tip. Best-effort:
    /// the failure outcome is already decided, so problems here only warn.
    async fn restore_branch_tip(&self, cfg: &RepoConfig, branch_ref: &str, original_tip: &str) {
        let rebased = match self.git.rev_parse(&cfg.path, branch_ref).await {
            Ok(sha) => sha,
            Err(e) => {
                tracing::warn!(repo = %cfg.name, branch_ref, error = %e, "cannot read branch tip for restore");
                return;
            }
        };
        if rebased == original_tip {
            return;
        }
        match self
            .git
            .update_ref_cas(&cfg.path, branch_ref, original_tip, &rebased)
            .await
        {
            Ok(true) => {
                tracing::info!(repo = %cfg.name, branch_ref, tip = original_tip, "branch restored to pre-attempt tip");
            }
            Ok(false) => {
                tracing::warn!(repo = %cfg.name, branch_ref, "branch moved during restore; leaving it");
            }
            Err(e) => {
                tracing::warn!(repo = %cfg.name, branch_ref, error = %e, "branch restore failed");
            }
        }
    }

    /// Route a failed attempt: rework failures land the task in `conflict`
    /// and page the DRI; transient failures requeue it for a later tick.
    async fn finish_failed(
        &self,
        store: &TaskStore<'_>,
        task: &Task,
        outcome: MergeOutcome,
    ) -> Result<MergeOutcome> {
        let reason = outcome.reason.unwrap_or(FailureReason::WorktreeError);
        tracing::warn!(task = %task.id, %reason, message = %outcome.message, "merge failed");

        if reason.needs_rework() {
            self.set_status(store, task, TaskStatus::Conflict, &outcome.message)?;
            notify_best_effort("merge conflict", self.notifier.notify_conflict(task, &outcome))
                .await;
        } else {
            self.set_status(store, task, TaskStatus::InApproval, &outcome.message)?;
        }

        self.bus.emit(EventKind::MergeFinished {
            task_id: task.id,
            success: false,
            reason: outcome.reason,
            message: outcome.message.clone(),
        });
        Ok(outcome)
    }

    /// Post-success teardown: delete the task branch in every repo and the
    /// DRI's agent worktrees. Entirely best-effort and skipped wholesale
    /// when another live task still references the same branch.
    async fn cleanup(&self, store: &TaskStore<'_>, task: &Task, branch: &str) {
        let shared = match store.branch_in_use_elsewhere(branch, &task.id) {
            Ok(shared) => shared,
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "branch sharing check failed; keeping branch");
                true
            }
        };
        if shared {
            tracing::info!(task = %task.id, branch, "branch still in use; skipping cleanup");
            return;
        }

        for repo_name in &task.repos {
            let Some(cfg) = self.repos.get(repo_name) else {
                continue;
            };
            if let Err(e) = self.git.delete_branch(&cfg.path, branch).await {
                tracing::warn!(repo = %repo_name, branch, error = %e, "branch deletion failed");
            }
            if let Some(dri) = &task.dri {
                if let Err(e) = self
                    .worktrees
                    .remove(&cfg.path, repo_name, dri, &task.id)
                    .await
                {
                    tracing::warn!(repo = %repo_name, agent = dri, error = %e, "agent worktree removal failed");
                }
            }
        }
    }
}

/// Guard against constructing a worker with an empty repo set by accident.
pub fn require_repos(config: &ReposConfig) -> Result<()> {
    if config.repo.is_empty() {
        bail!("no repositories configured");
    }
    Ok(())
}
