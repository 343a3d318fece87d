//! Append-only audit log of task status transitions.
//!
//! One record per validated transition — the ingest point for any external
//! event-log collaborator. Records are never rewritten or deleted.

use anyhow::Result;
use chrono::{DateTime, Utc};
use mainline_core::task::{TaskId, TaskStatus};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

/// Audit table: monotonic i64 record ID -> JSON-serialized AuditRecord.
pub const AUDIT_TABLE: TableDefinition<i64, &str> = TableDefinition::new("audit_log");

const NEXT_AUDIT_ID_KEY: &str = "next_audit_id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub detail: String,
    pub at: DateTime<Utc>,
}

pub struct AuditStore<'a> {
    db: &'a Database,
}

impl<'a> AuditStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append one transition record, assigning a monotonic ID.
    pub fn append(
        &self,
        task_id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
        detail: &str,
    ) -> Result<AuditRecord> {
        let record;
        let write_txn = self.db.begin_write()?;
        {
            let mut counter = write_txn.open_table(crate::task_store::COUNTER_TABLE)?;
            let next_id = counter
                .get(NEXT_AUDIT_ID_KEY)?
                .map(|v| v.value())
                .unwrap_or(1);
            counter.insert(NEXT_AUDIT_ID_KEY, next_id + 1)?;

            record = AuditRecord {
                id: next_id,
                task_id: *task_id,
                from,
                to,
                detail: detail.to_string(),
                at: Utc::now(),
            };
            let json = serde_json::to_string(&record)?;
            let mut table = write_txn.open_table(AUDIT_TABLE)?;
            table.insert(next_id, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(record)
    }

    /// All records for one task, in transition order.
    pub fn for_task(&self, task_id: &TaskId) -> Result<Vec<AuditRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_TABLE)?;
        let mut records = Vec::new();

        let iter = table.iter()?;
        for entry in iter {
            let (_, value) = entry?;
            let record: AuditRecord = serde_json::from_str(value.value())?;
            if record.task_id == *task_id {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let dir = tempfile::tempdir().unwrap();
        crate::open_db(&dir.path().join("test.redb")).unwrap()
    }

    #[test]
    fn append_assigns_monotonic_ids() {
        let db = test_db();
        let audit = AuditStore::new(&db);

        let r1 = audit
            .append(&TaskId(1), TaskStatus::Todo, TaskStatus::InProgress, "")
            .unwrap();
        let r2 = audit
            .append(&TaskId(1), TaskStatus::InProgress, TaskStatus::InReview, "")
            .unwrap();
        assert!(r2.id > r1.id);
    }

    #[test]
    fn for_task_filters_and_orders() {
        let db = test_db();
        let audit = AuditStore::new(&db);

        audit
            .append(&TaskId(1), TaskStatus::Todo, TaskStatus::InProgress, "")
            .unwrap();
        audit
            .append(&TaskId(2), TaskStatus::Todo, TaskStatus::InProgress, "")
            .unwrap();
        audit
            .append(&TaskId(1), TaskStatus::InProgress, TaskStatus::InReview, "ok")
            .unwrap();

        let records = audit.for_task(&TaskId(1)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].to, TaskStatus::InProgress);
        assert_eq!(records[1].to, TaskStatus::InReview);
        assert_eq!(records[1].detail, "ok");
    }
}
