//! Full task lifecycle driven through the stores: creation, assignment,
//! review rounds with rejection rework, approval, merge bookkeeping, and
//! the audit trail left behind.

use mainline_core::review::Verdict;
use mainline_core::task::{RepoName, Task, TaskStatus};
use mainline_db::audit_store::AuditStore;
use mainline_db::review_store::ReviewStore;
use mainline_db::task_store::TaskStore;
use redb::Database;
use tempfile::TempDir;

fn test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = mainline_db::open_db(&dir.path().join("lifecycle.redb")).unwrap();
    (dir, db)
}

#[test]
fn happy_path_with_one_rejection_round() {
    let (_dir, db) = test_db();
    let tasks = TaskStore::new(&db);
    let reviews = ReviewStore::new(&db);

    // Created, picked up by alice.
    let task = tasks
        .insert(Task::new("Add login page", vec![RepoName::new("webapp")]))
        .unwrap();
    tasks
        .change_status(&task.id, TaskStatus::InProgress, Some("claimed"))
        .unwrap();
    let mut task = tasks.get(&task.id).unwrap().unwrap();
    task.assign("alice");
    task.base_sha
        .insert(RepoName::new("webapp"), "abc123".to_string());
    tasks.update(&task).unwrap();
    assert_eq!(task.branch.as_deref(), Some("alice/T0001"));

    // First review round ends in rejection; the task goes back to work.
    tasks
        .change_status(&task.id, TaskStatus::InReview, None)
        .unwrap();
    let mut task = tasks.get(&task.id).unwrap().unwrap();
    let review = reviews.create_review(&mut task, Some("bob")).unwrap();
    assert_eq!(review.attempt, 1);
    reviews
        .set_verdict(&task.id, 1, "rejected", "missing tests", "bob")
        .unwrap();
    tasks
        .change_status(&task.id, TaskStatus::InProgress, Some("review rejected"))
        .unwrap();

    // Second round approves.
    tasks
        .change_status(&task.id, TaskStatus::InReview, None)
        .unwrap();
    let mut task = tasks.get(&task.id).unwrap().unwrap();
    let review = reviews.create_review(&mut task, Some("bob")).unwrap();
    assert_eq!(review.attempt, 2);
    reviews
        .set_verdict(&task.id, 2, "approved", "lgtm", "bob")
        .unwrap();
    assert_eq!(
        reviews.current_verdict(&task.id).unwrap(),
        Some(Verdict::Approved)
    );

    // Approval queue, merge, done.
    tasks
        .change_status(&task.id, TaskStatus::InApproval, None)
        .unwrap();
    assert_eq!(tasks.in_approval().unwrap().len(), 1);
    tasks
        .change_status(&task.id, TaskStatus::Merging, Some("merge attempt 1"))
        .unwrap();
    let mut task = tasks.get(&task.id).unwrap().unwrap();
    task.merge_base
        .insert(RepoName::new("webapp"), "abc123".to_string());
    task.merge_tip
        .insert(RepoName::new("webapp"), "def456".to_string());
    tasks.update(&task).unwrap();
    tasks
        .change_status(&task.id, TaskStatus::Done, Some("merged"))
        .unwrap();

    let done = tasks.get(&task.id).unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    assert!(done.completed_at.is_some());
    assert_eq!(done.review_attempt, 2);

    // Review history keeps both rounds in order.
    let history = reviews.history(&task.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].verdict, Some(Verdict::Rejected));
    assert_eq!(history[1].verdict, Some(Verdict::Approved));

    // Every transition left an audit record.
    let audit = AuditStore::new(&db).for_task(&task.id).unwrap();
    let path: Vec<_> = audit.iter().map(|r| r.to).collect();
    assert_eq!(
        path,
        vec![
            TaskStatus::InProgress,
            TaskStatus::InReview,
            TaskStatus::InProgress,
            TaskStatus::InReview,
            TaskStatus::InApproval,
            TaskStatus::Merging,
            TaskStatus::Done,
        ]
    );
}

#[test]
fn conflict_rework_loop() {
    let (_dir, db) = test_db();
    let tasks = TaskStore::new(&db);

    let task = tasks
        .insert(Task::new("Refactor parser", vec![RepoName::new("myrepo")]))
        .unwrap();
    for status in [
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::InApproval,
        TaskStatus::Merging,
    ] {
        tasks.change_status(&task.id, status, None).unwrap();
    }

    // Merge fails on a rebase conflict; the agent reworks and the task
    // walks the whole pipeline again.
    tasks
        .change_status(&task.id, TaskStatus::Conflict, Some("CONFLICT in lib.rs"))
        .unwrap();
    let stuck = tasks.get(&task.id).unwrap().unwrap();
    assert_eq!(stuck.status_detail, "CONFLICT in lib.rs");

    for status in [
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::InApproval,
        TaskStatus::Merging,
        TaskStatus::Done,
    ] {
        tasks.change_status(&task.id, status, None).unwrap();
    }
    assert_eq!(
        tasks.get(&task.id).unwrap().unwrap().status,
        TaskStatus::Done
    );
}

#[test]
fn merge_race_requeues_without_losing_place() {
    let (_dir, db) = test_db();
    let tasks = TaskStore::new(&db);

    let task = tasks
        .insert(Task::new("Racy change", vec![RepoName::new("myrepo")]))
        .unwrap();
    for status in [
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::InApproval,
        TaskStatus::Merging,
    ] {
        tasks.change_status(&task.id, status, None).unwrap();
    }

    // Lost the ref race; straight back into the approval queue.
    tasks
        .change_status(&task.id, TaskStatus::InApproval, Some("main moved; will retry"))
        .unwrap();
    assert_eq!(tasks.in_approval().unwrap().len(), 1);

    // And the retry can proceed.
    tasks
        .change_status(&task.id, TaskStatus::Merging, Some("merge attempt 2"))
        .unwrap();
    tasks
        .change_status(&task.id, TaskStatus::Done, None)
        .unwrap();
}
