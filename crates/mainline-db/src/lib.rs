pub mod audit_store;
pub mod review_store;
pub mod task_store;

use anyhow::Result;
use redb::Database;
use std::path::Path;

/// Open (or create) the mainline database at the given path.
pub fn open_db(path: &Path) -> Result<Database> {
    let db = Database::create(path)?;
    // Ensure all tables exist by doing a write transaction
    let write_txn = db.begin_write()?;
    {
        let _tasks = write_txn.open_table(task_store::TASKS_TABLE)?;
        let _counter = write_txn.open_table(task_store::COUNTER_TABLE)?;
        let _reviews = write_txn.open_table(review_store::REVIEWS_TABLE)?;
        let _comments = write_txn.open_table(review_store::COMMENTS_TABLE)?;
        let _audit = write_txn.open_table(audit_store::AUDIT_TABLE)?;
    }
    write_txn.commit()?;
    Ok(db)
}
