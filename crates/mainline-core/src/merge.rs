use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on outcome messages. Notification payloads embed these, so
/// captured test output must not balloon them.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Why a merge attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// `rebase --onto main <base_sha>` hit conflicts and was aborted.
    RebaseConflict,
    /// The pre-merge command exited non-zero or timed out.
    PreMergeFailed,
    /// The persistent clone has main checked out with uncommitted changes.
    DirtyMain,
    /// Another process moved main between our read and the CAS ref update.
    RefUpdateRace,
    /// Task has no branch recorded.
    MissingBranch,
    /// Task references a repo with no configuration.
    MissingRepo,
    /// Task has no base_sha recorded for a repo it touches.
    MissingBaseSha,
    /// Temp worktree creation or teardown infrastructure failure.
    WorktreeError,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::RebaseConflict => "rebase_conflict",
            FailureReason::PreMergeFailed => "pre_merge_failed",
            FailureReason::DirtyMain => "dirty_main",
            FailureReason::RefUpdateRace => "ref_update_race",
            FailureReason::MissingBranch => "missing_branch",
            FailureReason::MissingRepo => "missing_repo",
            FailureReason::MissingBaseSha => "missing_base_sha",
            FailureReason::WorktreeError => "worktree_error",
        };
        f.write_str(s)
    }
}

impl FailureReason {
    /// Whether this failure needs human rework before another attempt.
    ///
    /// Races retry on a later scanner tick without intervention; validation
    /// failures surface to the caller without touching task status.
    pub fn needs_rework(&self) -> bool {
        matches!(
            self,
            FailureReason::RebaseConflict
                | FailureReason::PreMergeFailed
                | FailureReason::DirtyMain
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FailureReason::MissingBranch
                | FailureReason::MissingRepo
                | FailureReason::MissingBaseSha
        )
    }
}

/// Structured result of one merge attempt, success or not.
///
/// Every exit path of the merge worker produces one of these; nothing
/// escapes the pipeline as an unhandled error under normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub success: bool,
    pub reason: Option<FailureReason>,
    /// Human-readable diagnostic, truncated to [`MAX_MESSAGE_LEN`].
    pub message: String,
}

impl MergeOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            reason: None,
            message: truncate(message.into()),
        }
    }

    pub fn fail(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            message: truncate(message.into()),
        }
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_MESSAGE_LEN {
        // Cut on a char boundary, then mark the truncation.
        let mut end = MAX_MESSAGE_LEN;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push_str("…[truncated]");
    }
    s
}
