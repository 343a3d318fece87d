//! Pipeline event types for observability.
//!
//! Events are emitted as tasks move through the lifecycle and merge queue.
//! Consumers (logger, notifier sinks, future dashboards) subscribe and
//! render them. Pure data — the broadcast bus lives in `mainline-runner`.

use crate::merge::FailureReason;
use crate::task::{RepoName, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timestamped pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl PipelineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// The specific kind of pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    /// Task status changed (one per validated transition).
    TaskStatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        detail: String,
    },

    /// Merge worker picked up a task.
    MergeStarted { task_id: TaskId, branch: String },

    /// One repo of a task fast-forwarded onto main.
    RepoMerged {
        task_id: TaskId,
        repo: RepoName,
        merge_base: String,
        merge_tip: String,
    },

    /// Merge attempt finished, success or not.
    MergeFinished {
        task_id: TaskId,
        success: bool,
        reason: Option<FailureReason>,
        message: String,
    },

    /// A review verdict was recorded.
    ReviewDecided {
        task_id: TaskId,
        attempt: u32,
        approved: bool,
    },

    /// Human-attention notification (conflict, rejection).
    Notification { task_id: TaskId, message: String },

    /// Scanner tick summary.
    ScanCompleted {
        pending: usize,
        eligible: usize,
        merged: usize,
    },

    /// Engine-level log message.
    EngineLog { level: LogLevel, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes() {
        let event = PipelineEvent::new(EventKind::MergeFinished {
            task_id: TaskId(7),
            success: false,
            reason: Some(FailureReason::RebaseConflict),
            message: "conflict in src/lib.rs".into(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("rebase_conflict"));
        let back: PipelineEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back.kind,
            EventKind::MergeFinished { success: false, .. }
        ));
    }
}
