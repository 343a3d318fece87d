use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Review-gate validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("invalid verdict: {0:?} (expected approved or rejected)")]
    InvalidVerdict(String),
    #[error("no review found for task {task} attempt {attempt}")]
    NotFound { task: TaskId, attempt: u32 },
}

/// The decision recorded for one review attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approved,
    Rejected,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Approved => f.write_str("approved"),
            Verdict::Rejected => f.write_str("rejected"),
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Verdict::Approved),
            "rejected" => Ok(Verdict::Rejected),
            other => Err(ReviewError::InvalidVerdict(other.to_string())),
        }
    }
}

/// One review round for a task.
///
/// Attempt numbers are 1-based, monotonic per task, and never reused —
/// re-submitting rejected work creates a new attempt so the full review
/// history survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub task_id: TaskId,
    pub attempt: u32,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub reviewer: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

impl Review {
    /// A fresh pending review for the given attempt.
    pub fn pending(task_id: TaskId, attempt: u32, reviewer: Option<String>) -> Self {
        Self {
            task_id,
            attempt,
            verdict: None,
            summary: String::new(),
            reviewer,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    /// Empty placeholder returned when a task has never been reviewed.
    pub fn placeholder(task_id: TaskId) -> Self {
        Self {
            task_id,
            attempt: 0,
            verdict: None,
            summary: String::new(),
            reviewer: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.verdict.is_some()
    }
}

/// Inline comment scoped to (task, attempt, file, optional line).
///
/// Never mutated by the merge pipeline; read-only input to human/agent
/// decisions. Comments from prior attempts stay visible forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub task_id: TaskId,
    pub attempt: u32,
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}
