//! In-memory fakes for the pipeline's seams.
//!
//! [`FakeGit`] models just enough ref semantics to drive the merge worker:
//! refs per repo path, configurable rebase results, ancestry pairs, and a
//! one-shot race injection that moves a ref between the worker's read and
//! its compare-and-swap.

use crate::git::{GitOps, RebaseOutcome};
use crate::worktree::WorktreeProvider;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mainline_core::merge::MergeOutcome;
use mainline_core::task::{RepoName, Task, TaskId};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
struct GitState {
    /// (repo path, full refname) -> sha.
    refs: HashMap<(PathBuf, String), String>,
    /// (ancestor, descendant) pairs that hold.
    ancestors: HashSet<(String, String)>,
    /// worktree path -> (repo path, branch) registered by worktree_add.
    worktrees: HashMap<PathBuf, (PathBuf, String)>,
    /// branch -> tip after a successful rebase (any repo).
    rebase_tips: HashMap<String, String>,
    /// (repo path, branch) -> tip, takes precedence over rebase_tips.
    rebase_tips_by_repo: HashMap<(PathBuf, String), String>,
    /// branches whose rebase conflicts (any repo).
    conflicts: HashSet<String>,
    conflicts_by_repo: HashSet<(PathBuf, String)>,
    heads: HashMap<PathBuf, Option<String>>,
    clean: HashMap<PathBuf, bool>,
    /// One-shot: before the next CAS on this ref, move it to the value.
    races: HashMap<(PathBuf, String), String>,
    deleted: Vec<String>,
    resets: Vec<PathBuf>,
}

pub struct FakeGit {
    state: Mutex<GitState>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GitState::default()),
        }
    }

    pub fn set_ref(&self, repo: &Path, refname: &str, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .refs
            .insert((repo.to_path_buf(), refname.to_string()), sha.to_string());
    }

    pub fn ref_value(&self, repo: &Path, refname: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .refs
            .get(&(repo.to_path_buf(), refname.to_string()))
            .cloned()
    }

    /// Declare `ancestor` reachable from `descendant`.
    pub fn mark_ancestor(&self, ancestor: &str, descendant: &str) {
        self.state
            .lock()
            .unwrap()
            .ancestors
            .insert((ancestor.to_string(), descendant.to_string()));
    }

    /// Tip the branch lands on after a successful rebase, in any repo.
    pub fn set_rebase_tip(&self, branch: &str, tip: &str) {
        self.state
            .lock()
            .unwrap()
            .rebase_tips
            .insert(branch.to_string(), tip.to_string());
    }

    pub fn set_rebase_tip_for(&self, repo: &Path, branch: &str, tip: &str) {
        self.state
            .lock()
            .unwrap()
            .rebase_tips_by_repo
            .insert((repo.to_path_buf(), branch.to_string()), tip.to_string());
    }

    /// Make rebases of this branch conflict in every repo.
    pub fn conflict_on(&self, branch: &str) {
        self.state
            .lock()
            .unwrap()
            .conflicts
            .insert(branch.to_string());
    }

    pub fn conflict_on_in(&self, repo: &Path, branch: &str) {
        self.state
            .lock()
            .unwrap()
            .conflicts_by_repo
            .insert((repo.to_path_buf(), branch.to_string()));
    }

    pub fn set_head(&self, repo: &Path, branch: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .heads
            .insert(repo.to_path_buf(), branch.map(String::from));
    }

    pub fn set_clean(&self, repo: &Path, clean: bool) {
        self.state
            .lock()
            .unwrap()
            .clean
            .insert(repo.to_path_buf(), clean);
    }

    /// Arrange for the next CAS on `refname` to lose: the ref jumps to
    /// `winner_sha` just before the compare, exactly as if another process
    /// committed first.
    pub fn inject_race(&self, repo: &Path, refname: &str, winner_sha: &str) {
        self.state.lock().unwrap().races.insert(
            (repo.to_path_buf(), refname.to_string()),
            winner_sha.to_string(),
        );
    }

    pub fn deleted_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn resets(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().resets.clone()
    }
}

impl Default for FakeGit {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitOps for FakeGit {
    async fn worktree_add(&self, repo: &Path, worktree: &Path, branch: &str) -> Result<()> {
        // Real worktree_add materializes a directory; premerge detection
        // and command execution need one too.
        std::fs::create_dir_all(worktree)?;
        self.state.lock().unwrap().worktrees.insert(
            worktree.to_path_buf(),
            (repo.to_path_buf(), branch.to_string()),
        );
        Ok(())
    }

    async fn worktree_remove(&self, _repo: &Path, worktree: &Path) -> Result<()> {
        self.state.lock().unwrap().worktrees.remove(worktree);
        let _ = std::fs::remove_dir_all(worktree);
        Ok(())
    }

    async fn rebase_onto_main(&self, worktree: &Path, _base_sha: &str) -> Result<RebaseOutcome> {
        let mut state = self.state.lock().unwrap();
        let (repo, branch) = state
            .worktrees
            .get(worktree)
            .cloned()
            .context("rebase in unregistered worktree")?;

        let repo_key = (repo.clone(), branch.clone());
        if state.conflicts.contains(&branch) || state.conflicts_by_repo.contains(&repo_key) {
            return Ok(RebaseOutcome::Conflict(
                "CONFLICT (content): merge conflict".to_string(),
            ));
        }

        let tip = state
            .rebase_tips_by_repo
            .get(&repo_key)
            .or_else(|| state.rebase_tips.get(&branch))
            .cloned()
            .context(format!("no rebase tip configured for {branch}"))?;
        state.refs.insert((repo, format!("refs/heads/{branch}")), tip);
        Ok(RebaseOutcome::Completed)
    }

    async fn rev_parse(&self, repo: &Path, refname: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        match state.refs.get(&(repo.to_path_buf(), refname.to_string())) {
            Some(sha) => Ok(sha.clone()),
            None => bail!("unknown ref {refname} in {}", repo.display()),
        }
    }

    async fn is_ancestor(&self, _repo: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(ancestor == descendant
            || state
                .ancestors
                .contains(&(ancestor.to_string(), descendant.to_string())))
    }

    async fn rev_list(&self, _repo: &Path, _old: &str, new: &str) -> Result<Vec<String>> {
        // One synthetic commit per merge: the tip itself.
        Ok(vec![new.to_string()])
    }

    async fn update_ref_cas(
        &self,
        repo: &Path,
        refname: &str,
        new: &str,
        old: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let key = (repo.to_path_buf(), refname.to_string());
        if let Some(winner) = state.races.remove(&key) {
            state.refs.insert(key.clone(), winner);
        }
        if state.refs.get(&key).map(String::as_str) == Some(old) {
            state.refs.insert(key, new.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deleted.push(branch.to_string());
        state
            .refs
            .remove(&(repo.to_path_buf(), format!("refs/heads/{branch}")));
        Ok(())
    }

    async fn head_branch(&self, repo: &Path) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.heads.get(repo).cloned().unwrap_or(None))
    }

    async fn is_clean(&self, repo: &Path) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.clean.get(repo).copied().unwrap_or(true))
    }

    async fn reset_to_head(&self, repo: &Path) -> Result<()> {
        self.state.lock().unwrap().resets.push(repo.to_path_buf());
        Ok(())
    }
}

/// Notifier that records every delivery.
#[derive(Default)]
pub struct FakeNotifier {
    conflicts: Mutex<Vec<(TaskId, MergeOutcome)>>,
    rejections: Mutex<Vec<(TaskId, String)>>,
}

impl FakeNotifier {
    pub fn conflicts(&self) -> Vec<(TaskId, MergeOutcome)> {
        self.conflicts.lock().unwrap().clone()
    }

    pub fn rejections(&self) -> Vec<(TaskId, String)> {
        self.rejections.lock().unwrap().clone()
    }
}

#[async_trait]
impl crate::notify::Notifier for FakeNotifier {
    async fn notify_conflict(&self, task: &Task, outcome: &MergeOutcome) -> Result<()> {
        self.conflicts
            .lock()
            .unwrap()
            .push((task.id, outcome.clone()));
        Ok(())
    }

    async fn notify_rejection(&self, task: &Task, summary: &str) -> Result<()> {
        self.rejections
            .lock()
            .unwrap()
            .push((task.id, summary.to_string()));
        Ok(())
    }
}

/// Worktree provider that only records removal requests.
#[derive(Default)]
pub struct RecordingWorktrees {
    removed: Mutex<Vec<(RepoName, TaskId)>>,
}

impl RecordingWorktrees {
    pub fn removed(&self) -> Vec<(RepoName, TaskId)> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorktreeProvider for RecordingWorktrees {
    async fn create(
        &self,
        _repo: &Path,
        _repo_name: &RepoName,
        _agent: &str,
        _task: &TaskId,
        _branch: &str,
    ) -> Result<PathBuf> {
        bail!("provisioning is not modeled by this fake")
    }

    async fn remove(
        &self,
        _repo: &Path,
        repo_name: &RepoName,
        _agent: &str,
        task: &TaskId,
    ) -> Result<()> {
        self.removed
            .lock()
            .unwrap()
            .push((repo_name.clone(), *task));
        Ok(())
    }
}
