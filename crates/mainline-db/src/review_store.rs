//! Per-attempt review rows and inline comments.
//!
//! Reviews are keyed `"{task_id}:{attempt:06}"` so a prefix scan yields a
//! task's attempts in order; the numeric attempt counter on the task is the
//! authoritative way to address a review. Comments are keyed by a global
//! monotonic ID under the same task prefix, which makes creation order the
//! iteration order. Nothing here is ever deleted.

use anyhow::{Context, Result};
use chrono::Utc;
use mainline_core::review::{Review, ReviewComment, ReviewError, Verdict};
use mainline_core::task::{Task, TaskId};
use redb::{Database, ReadableTable, TableDefinition};

/// Reviews table: "{task_id}:{attempt:06}" -> JSON-serialized Review.
pub const REVIEWS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("reviews");

/// Comments table: "{task_id}:{comment_id:012}" -> JSON-serialized ReviewComment.
pub const COMMENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("review_comments");

const NEXT_COMMENT_ID_KEY: &str = "next_comment_id";

pub struct ReviewStore<'a> {
    db: &'a Database,
}

impl<'a> ReviewStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn review_key(task_id: &TaskId, attempt: u32) -> String {
        format!("{}:{:06}", task_id.0, attempt)
    }

    /// Open a new review round for a task entering the approval stage.
    ///
    /// Inserts a pending row at `task.review_attempt + 1` and bumps the
    /// task's counter, in one transaction. The caller's `task` is updated
    /// in place so it stays consistent with the store.
    pub fn create_review(&self, task: &mut Task, reviewer: Option<&str>) -> Result<Review> {
        let attempt = task.review_attempt + 1;
        let review = Review::pending(task.id, attempt, reviewer.map(String::from));

        let write_txn = self.db.begin_write()?;
        {
            let mut reviews = write_txn.open_table(REVIEWS_TABLE)?;
            let key = Self::review_key(&task.id, attempt);
            let json = serde_json::to_string(&review)?;
            reviews.insert(key.as_str(), json.as_str())?;

            let mut tasks = write_txn.open_table(crate::task_store::TASKS_TABLE)?;
            task.review_attempt = attempt;
            task.updated_at = Utc::now();
            let task_json = serde_json::to_string(task)?;
            tasks.insert(task.id.0, task_json.as_str())?;
        }
        write_txn.commit()?;

        tracing::debug!(task = %task.id, attempt, "review round opened");
        Ok(review)
    }

    /// Record a verdict for a specific attempt.
    ///
    /// The attempt number addresses the row directly; anything but
    /// approved/rejected is refused before the store is touched.
    pub fn set_verdict(
        &self,
        task_id: &TaskId,
        attempt: u32,
        verdict: &str,
        summary: &str,
        reviewer: &str,
    ) -> Result<Review> {
        let verdict: Verdict = verdict.parse()?;

        let mut review = self
            .get(task_id, attempt)?
            .ok_or(ReviewError::NotFound {
                task: *task_id,
                attempt,
            })?;

        review.verdict = Some(verdict);
        review.summary = summary.to_string();
        review.reviewer = Some(reviewer.to_string());
        review.decided_at = Some(Utc::now());

        let write_txn = self.db.begin_write()?;
        {
            let mut reviews = write_txn.open_table(REVIEWS_TABLE)?;
            let key = Self::review_key(task_id, attempt);
            let json = serde_json::to_string(&review)?;
            reviews.insert(key.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(review)
    }

    /// Get one review row.
    pub fn get(&self, task_id: &TaskId, attempt: u32) -> Result<Option<Review>> {
        let read_txn = self.db.begin_read()?;
        let reviews = read_txn.open_table(REVIEWS_TABLE)?;
        let key = Self::review_key(task_id, attempt);
        match reviews.get(key.as_str())? {
            Some(guard) => Ok(Some(serde_json::from_str(guard.value())?)),
            None => Ok(None),
        }
    }

    /// The highest-attempt review plus its comments, or an empty
    /// placeholder if the task has never been reviewed.
    pub fn get_current_review(&self, task_id: &TaskId) -> Result<(Review, Vec<ReviewComment>)> {
        let prefix = format!("{}:", task_id.0);
        let read_txn = self.db.begin_read()?;
        let reviews = read_txn.open_table(REVIEWS_TABLE)?;

        let mut current: Option<Review> = None;
        let iter = reviews.iter()?;
        for entry in iter {
            let (key, value) = entry?;
            if key.value().starts_with(&prefix) {
                let review: Review = serde_json::from_str(value.value())?;
                if current.as_ref().map_or(true, |c| review.attempt > c.attempt) {
                    current = Some(review);
                }
            }
        }

        match current {
            Some(review) => {
                let attempt = review.attempt;
                let comments = self.get_comments(task_id, Some(attempt))?;
                Ok((review, comments))
            }
            None => Ok((Review::placeholder(*task_id), Vec::new())),
        }
    }

    /// The current verdict, if any attempt exists and has been decided.
    pub fn current_verdict(&self, task_id: &TaskId) -> Result<Option<Verdict>> {
        let (review, _) = self.get_current_review(task_id)?;
        Ok(review.verdict)
    }

    /// Append an inline comment.
    pub fn add_comment(&self, comment: &ReviewComment) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut counter = write_txn.open_table(crate::task_store::COUNTER_TABLE)?;
            let next_id = counter
                .get(NEXT_COMMENT_ID_KEY)?
                .map(|v| v.value())
                .unwrap_or(1);
            counter.insert(NEXT_COMMENT_ID_KEY, next_id + 1)?;

            let key = format!("{}:{:012}", comment.task_id.0, next_id);
            let json = serde_json::to_string(comment)?;
            let mut comments = write_txn.open_table(COMMENTS_TABLE)?;
            comments.insert(key.as_str(), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Comments for a task, ordered by creation time. `attempt = None`
    /// returns all attempts' comments — prior rounds stay visible.
    pub fn get_comments(
        &self,
        task_id: &TaskId,
        attempt: Option<u32>,
    ) -> Result<Vec<ReviewComment>> {
        let prefix = format!("{}:", task_id.0);
        let read_txn = self.db.begin_read()?;
        let comments = read_txn.open_table(COMMENTS_TABLE)?;
        let mut result = Vec::new();

        let iter = comments.iter()?;
        for entry in iter {
            let (key, value) = entry?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let comment: ReviewComment = serde_json::from_str(value.value())?;
            if let Some(attempt) = attempt {
                if comment.attempt != attempt {
                    continue;
                }
            }
            result.push(comment);
        }
        Ok(result)
    }

    /// All review rows for a task, oldest attempt first.
    pub fn history(&self, task_id: &TaskId) -> Result<Vec<Review>> {
        let prefix = format!("{}:", task_id.0);
        let read_txn = self.db.begin_read()?;
        let reviews = read_txn.open_table(REVIEWS_TABLE)?;
        let mut result = Vec::new();

        let iter = reviews.iter()?;
        for entry in iter {
            let (key, value) = entry?;
            if key.value().starts_with(&prefix) {
                result.push(serde_json::from_str(value.value())?);
            }
        }
        Ok(result)
    }
}

// Convenience used by tests and the CLI when only the task id is at hand.
pub fn create_review_for(
    db: &Database,
    task_id: &TaskId,
    reviewer: Option<&str>,
) -> Result<Review> {
    let task_store = crate::task_store::TaskStore::new(db);
    let mut task = task_store
        .get(task_id)?
        .context(format!("task {task_id} not found"))?;
    ReviewStore::new(db).create_review(&mut task, reviewer)
}
