//! Human-attention notifications, fire-and-forget.
//!
//! The merge pipeline calls these on conflict and rejection. A notifier's
//! own failures are logged and swallowed — they never flow back into the
//! merge result.

use crate::event_bus::EventBus;
use anyhow::Result;
use async_trait::async_trait;
use mainline_core::event::EventKind;
use mainline_core::merge::MergeOutcome;
use mainline_core::task::Task;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A merge attempt failed in a way that needs human rework.
    async fn notify_conflict(&self, task: &Task, outcome: &MergeOutcome) -> Result<()>;

    /// A review round rejected the task.
    async fn notify_rejection(&self, task: &Task, summary: &str) -> Result<()>;
}

/// Notifier that publishes onto the broadcast bus, where delivery-side
/// collaborators (mail, chat, dashboards) pick notifications up.
pub struct BusNotifier {
    bus: EventBus,
}

impl BusNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Notifier for BusNotifier {
    async fn notify_conflict(&self, task: &Task, outcome: &MergeOutcome) -> Result<()> {
        let reason = outcome
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".into());
        self.bus.emit(EventKind::Notification {
            task_id: task.id,
            message: format!("merge of {} failed ({reason}): {}", task.id, outcome.message),
        });
        Ok(())
    }

    async fn notify_rejection(&self, task: &Task, summary: &str) -> Result<()> {
        self.bus.emit(EventKind::Notification {
            task_id: task.id,
            message: format!("review rejected {}: {summary}", task.id),
        });
        Ok(())
    }
}

/// Log-and-swallow wrapper used at every notifier call site.
pub async fn notify_best_effort<F>(what: &str, fut: F)
where
    F: std::future::Future<Output = Result<()>>,
{
    if let Err(e) = fut.await {
        tracing::warn!(error = %e, what, "notification delivery failed");
    }
}
