use crate::audit_store::AuditStore;
use anyhow::{Context, Result};
use chrono::Utc;
use mainline_core::task::{RepoName, Task, TaskId, TaskStatus};
use redb::{Database, ReadableTable, TableDefinition};

/// Tasks table: i64 task ID -> JSON-serialized Task.
pub const TASKS_TABLE: TableDefinition<i64, &str> = TableDefinition::new("tasks");

/// Auto-increment counter table: counter name -> next i64.
pub const COUNTER_TABLE: TableDefinition<&str, i64> = TableDefinition::new("counters");

const NEXT_TASK_ID_KEY: &str = "next_task_id";

pub struct TaskStore<'a> {
    db: &'a Database,
}

impl<'a> TaskStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Access the underlying database reference.
    pub fn db(&self) -> &'a Database {
        self.db
    }

    /// Insert a new task, assigning it an auto-incremented ID.
    pub fn insert(&self, mut task: Task) -> Result<Task> {
        let write_txn = self.db.begin_write()?;
        {
            let mut counter = write_txn.open_table(COUNTER_TABLE)?;
            let next_id = counter
                .get(NEXT_TASK_ID_KEY)?
                .map(|v| v.value())
                .unwrap_or(1);
            task.id = TaskId(next_id);
            counter.insert(NEXT_TASK_ID_KEY, next_id + 1)?;

            let json = serde_json::to_string(&task)?;
            let mut tasks = write_txn.open_table(TASKS_TABLE)?;
            tasks.insert(next_id, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(task)
    }

    /// Update an existing task.
    pub fn update(&self, task: &Task) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut tasks = write_txn.open_table(TASKS_TABLE)?;
            // Verify it exists
            tasks
                .get(task.id.0)?
                .context(format!("task {} not found", task.id))?;
            let json = serde_json::to_string(task)?;
            tasks.insert(task.id.0, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a task by ID.
    pub fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let read_txn = self.db.begin_read()?;
        let tasks = read_txn.open_table(TASKS_TABLE)?;
        match tasks.get(id.0)? {
            Some(guard) => {
                let task: Task = serde_json::from_str(guard.value())?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Validated status transition.
    ///
    /// Checks the allowed-target table, stamps `updated_at` (and
    /// `completed_at` on entering the terminal success state), and appends
    /// one audit record. This is a plain read-modify-write: two callers
    /// racing on the same task can both pass validation before either
    /// writes. The git-level CAS, not this store, is the real concurrency
    /// boundary.
    pub fn change_status(
        &self,
        id: &TaskId,
        new_status: TaskStatus,
        detail: Option<&str>,
    ) -> Result<Task> {
        let mut task = self
            .get(id)?
            .context(format!("task {id} not found"))?;

        task.status.validate_transition(new_status)?;

        let from = task.status;
        task.status = new_status;
        task.status_detail = detail.unwrap_or("").to_string();
        task.updated_at = Utc::now();
        if new_status == TaskStatus::Done {
            task.completed_at = Some(task.updated_at);
        }
        self.update(&task)?;

        AuditStore::new(self.db).append(id, from, new_status, &task.status_detail)?;

        tracing::debug!(task = %id, %from, to = %new_status, "status changed");
        Ok(task)
    }

    /// List all tasks, optionally filtered by status and/or repo.
    pub fn list(
        &self,
        status_filter: Option<TaskStatus>,
        repo_filter: Option<&RepoName>,
    ) -> Result<Vec<Task>> {
        let read_txn = self.db.begin_read()?;
        let tasks = read_txn.open_table(TASKS_TABLE)?;
        let mut result = Vec::new();

        let iter = tasks.iter()?;
        for entry in iter {
            let (_, value) = entry?;
            let task: Task = serde_json::from_str(value.value())?;

            if let Some(status) = status_filter {
                if task.status != status {
                    continue;
                }
            }
            if let Some(repo) = repo_filter {
                if !task.repos.contains(repo) {
                    continue;
                }
            }
            result.push(task);
        }

        Ok(result)
    }

    /// All tasks waiting in the approval stage (FIFO by ID).
    pub fn in_approval(&self) -> Result<Vec<Task>> {
        self.list(Some(TaskStatus::InApproval), None)
    }

    /// Whether any *other* task in a non-terminal status references the
    /// same branch name. Branch identity is checked by name equality across
    /// all tasks, so a shared branch is not deleted out from under the
    /// slower task.
    pub fn branch_in_use_elsewhere(&self, branch: &str, excluding: &TaskId) -> Result<bool> {
        for task in self.list(None, None)? {
            if task.id == *excluding {
                continue;
            }
            if task.branch.as_deref() == Some(branch) && !task.status.is_terminal() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Count tasks by status label.
    pub fn status_counts(&self) -> Result<std::collections::HashMap<String, usize>> {
        let read_txn = self.db.begin_read()?;
        let tasks = read_txn.open_table(TASKS_TABLE)?;
        let mut counts = std::collections::HashMap::new();

        let iter = tasks.iter()?;
        for entry in iter {
            let (_, value) = entry?;
            let task: Task = serde_json::from_str(value.value())?;
            *counts.entry(task.status.label().to_string()).or_insert(0) += 1;
        }

        Ok(counts)
    }
}
