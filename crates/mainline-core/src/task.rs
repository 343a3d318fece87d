use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{:04}", self.0)
    }
}

/// Which repository a task touches.
///
/// Fully dynamic — any repo name is valid. Stored and compared in lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RepoName(pub String);

impl<'de> Deserialize<'de> for RepoName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(RepoName::new(s))
    }
}

impl RepoName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RepoName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RepoName::new(s))
    }
}

/// Validation failures for status values and transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("invalid status: {0:?}")]
    InvalidStatus(String),
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Task status as a state machine.
///
/// Transitions:
///   Todo -> InProgress -> InReview -> InApproval -> Merging -> Done | Conflict
///   InReview -> InProgress (reviewer sends work back)
///   InApproval -> InProgress (rejected, rework)
///   Merging -> InApproval (ref-update race, retried on a later tick)
///   Conflict -> InProgress (rework after rebase/test failure)
///   Done is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    InApproval,
    Merging,
    Done,
    Conflict,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::InApproval,
        TaskStatus::Merging,
        TaskStatus::Done,
        TaskStatus::Conflict,
    ];

    /// Short label for display and storage filters.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::InApproval => "in_approval",
            TaskStatus::Merging => "merging",
            TaskStatus::Done => "done",
            TaskStatus::Conflict => "conflict",
        }
    }

    /// The allowed-target table — single source of truth for transitions.
    ///
    /// A terminal status has an empty (not missing) target set, so "known
    /// terminal" and "unknown status" stay distinct failure modes.
    pub fn allowed_targets(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Todo => &[TaskStatus::InProgress],
            TaskStatus::InProgress => &[TaskStatus::InReview],
            TaskStatus::InReview => &[TaskStatus::InApproval, TaskStatus::InProgress],
            TaskStatus::InApproval => &[TaskStatus::Merging, TaskStatus::InProgress],
            TaskStatus::Merging => &[
                TaskStatus::Done,
                TaskStatus::Conflict,
                TaskStatus::InApproval,
            ],
            TaskStatus::Conflict => &[TaskStatus::InProgress],
            TaskStatus::Done => &[],
        }
    }

    /// Validate a transition against the allowed-target table.
    pub fn validate_transition(&self, to: TaskStatus) -> Result<(), StatusError> {
        if self.allowed_targets().contains(&to) {
            Ok(())
        } else {
            Err(StatusError::InvalidTransition { from: *self, to })
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .iter()
            .find(|status| status.label() == s)
            .copied()
            .ok_or_else(|| StatusError::InvalidStatus(s.to_string()))
    }
}

/// A unit of agent work being integrated into main.
///
/// Git fields are keyed by repository name because one task may span
/// multiple repositories sharing a single branch name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    /// Free-text diagnostic for the current status (conflict output, etc).
    #[serde(default)]
    pub status_detail: String,
    /// Directly-responsible individual. Set once on first assignment and
    /// never changed — it anchors the branch name.
    #[serde(default)]
    pub dri: Option<String>,
    /// Current owner; may change over the task's life.
    #[serde(default)]
    pub assignee: Option<String>,
    pub repos: Vec<RepoName>,
    /// Single branch name shared across all of this task's repos.
    #[serde(default)]
    pub branch: Option<String>,
    /// Commit each repo's branch diverged from main, recorded at creation
    /// and immutable. A merge without it is a hard failure, never defaulted.
    #[serde(default)]
    pub base_sha: HashMap<RepoName, String>,
    #[serde(default)]
    pub commits: HashMap<RepoName, Vec<String>>,
    /// main's tip immediately before this task's merge, per repo.
    #[serde(default)]
    pub merge_base: HashMap<RepoName, String>,
    /// main's tip immediately after this task's merge, per repo.
    #[serde(default)]
    pub merge_tip: HashMap<RepoName, String>,
    /// How many review rounds this task has entered (0 = never reviewed).
    #[serde(default)]
    pub review_attempt: u32,
    #[serde(default)]
    pub merge_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new task in `todo`.
    pub fn new(title: impl Into<String>, repos: Vec<RepoName>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId(0), // assigned by the store
            title: title.into(),
            status: TaskStatus::Todo,
            status_detail: String::new(),
            dri: None,
            assignee: None,
            repos,
            branch: None,
            base_sha: HashMap::new(),
            commits: HashMap::new(),
            merge_base: HashMap::new(),
            merge_tip: HashMap::new(),
            review_attempt: 0,
            merge_attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Deterministic branch name: `<dri>/T<NNNN>`.
    ///
    /// Two tasks referencing the same logical branch are detected by name
    /// equality, so the derivation must depend on nothing mutable.
    pub fn derived_branch(&self) -> Option<String> {
        self.dri.as_ref().map(|dri| format!("{}/{}", dri, self.id))
    }

    /// Assign the task. The first assignment also fixes the DRI and the
    /// branch name; later assignments only move the current owner.
    pub fn assign(&mut self, agent: impl Into<String>) {
        let agent = agent.into();
        if self.dri.is_none() {
            self.dri = Some(agent.clone());
            self.branch = self.derived_branch();
        }
        self.assignee = Some(agent);
        self.updated_at = Utc::now();
    }
}
