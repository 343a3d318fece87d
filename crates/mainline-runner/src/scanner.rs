//! Merge queue scanner.
//!
//! Periodically walks the tasks waiting in `in_approval`, decides per
//! repo approval policy which are eligible, and feeds them one at a time
//! through the merge worker. A single-permit semaphore serializes merges
//! even if scans ever overlap.

use crate::event_bus::EventBus;
use crate::merge_worker::MergeWorker;
use anyhow::Result;
use mainline_core::event::EventKind;
use mainline_core::repo::{ApprovalMode, ReposConfig};
use mainline_core::review::Verdict;
use mainline_core::task::Task;
use mainline_db::review_store::ReviewStore;
use mainline_db::task_store::TaskStore;
use redb::Database;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Per-task eligibility decision for one scanner tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eligibility {
    /// All gates passed; merge now.
    Ready,
    /// Waiting on an approval; re-evaluated next tick.
    NotReady,
    /// Unrecognized approval mode on some repo; skipped with a warning.
    Skipped,
}

/// Counters from one scanner tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub pending: usize,
    pub eligible: usize,
    pub merged: usize,
    pub failed: usize,
}

pub struct Scanner {
    worker: MergeWorker,
    repos: Arc<ReposConfig>,
    bus: EventBus,
    merge_gate: Arc<Semaphore>,
}

impl Scanner {
    pub fn new(worker: MergeWorker, repos: Arc<ReposConfig>, bus: EventBus) -> Self {
        Self {
            worker,
            repos,
            bus,
            merge_gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// One pass over the approval queue, FIFO by task id.
    pub async fn scan_once(&self, db: &Database) -> Result<ScanSummary> {
        let store = TaskStore::new(db);
        let queue = store.in_approval()?;
        let mut summary = ScanSummary {
            pending: queue.len(),
            ..Default::default()
        };

        for task in queue {
            match self.eligibility(db, &task)? {
                Eligibility::Skipped | Eligibility::NotReady => continue,
                Eligibility::Ready => {}
            }
            summary.eligible += 1;

            let _permit = self.merge_gate.acquire().await?;
            match self.worker.merge_task(db, &task.id).await {
                Ok(outcome) if outcome.success => summary.merged += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(task = %task.id, error = %e, "merge attempt errored");
                }
            }
        }

        self.bus.emit(EventKind::ScanCompleted {
            pending: summary.pending,
            eligible: summary.eligible,
            merged: summary.merged,
        });
        tracing::debug!(
            pending = summary.pending,
            eligible = summary.eligible,
            merged = summary.merged,
            failed = summary.failed,
            "scan completed"
        );
        Ok(summary)
    }

    /// A task is eligible when every repo it touches allows the merge:
    /// `auto` repos always do, `manual` repos need the current review
    /// round approved, and any unrecognized mode parks the task.
    fn eligibility(&self, db: &Database, task: &Task) -> Result<Eligibility> {
        let mut needs_approval = false;
        for repo in &task.repos {
            // Unconfigured repos pass through; the worker reports them as
            // a validation failure with full context.
            let Some(cfg) = self.repos.get(repo) else {
                continue;
            };
            match cfg.approval {
                ApprovalMode::Auto => {}
                ApprovalMode::Manual => needs_approval = true,
                ApprovalMode::Unknown => {
                    tracing::warn!(task = %task.id, repo = %repo, "unknown approval mode; task skipped");
                    return Ok(Eligibility::Skipped);
                }
            }
        }

        if needs_approval {
            let verdict = ReviewStore::new(db).current_verdict(&task.id)?;
            if verdict != Some(Verdict::Approved) {
                return Ok(Eligibility::NotReady);
            }
        }
        Ok(Eligibility::Ready)
    }

    /// Poll loop. Scans immediately, then on every interval tick, until
    /// the token is cancelled; in-flight work finishes before returning.
    pub async fn run(
        &self,
        db: &Database,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        tracing::info!(?poll_interval, "merge queue scanner started");
        loop {
            if let Err(e) = self.scan_once(db).await {
                tracing::error!(error = %e, "scan failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        tracing::info!("merge queue scanner stopped");
        Ok(())
    }
}
