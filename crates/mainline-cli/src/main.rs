use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mainline_core::event::EventKind;
use mainline_core::repo::ReposConfig;
use mainline_core::review::ReviewComment;
use mainline_core::task::{RepoName, Task, TaskId, TaskStatus};
use mainline_core::telemetry::{init_telemetry, TelemetryConfig};
use mainline_db::review_store::{create_review_for, ReviewStore};
use mainline_db::task_store::TaskStore;
use mainline_runner::merge_worker::require_repos;
use mainline_runner::notify::{BusNotifier, Notifier};
use mainline_runner::worktree::AgentWorktrees;
use mainline_runner::{EventBus, MergeWorker, Scanner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "mainline",
    about = "Merge orchestrator for parallel agent branches"
)]
struct Cli {
    /// Path to the database file.
    #[arg(long, default_value = "mainline.redb")]
    db: PathBuf,

    /// Path to repos.toml configuration.
    #[arg(long, default_value = "configs/repos.toml")]
    config: PathBuf,

    /// Output JSON-structured logs to console.
    #[arg(long)]
    json_logs: bool,

    /// Log filter, overridden by RUST_LOG when set.
    #[arg(long, default_value = "mainline=info")]
    log_filter: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the merge queue scanner until interrupted.
    Run {
        /// Seconds between scans of the approval queue.
        #[arg(long, default_value = "30")]
        poll_secs: u64,
        /// Base directory for per-agent worktrees.
        #[arg(long, default_value = "worktrees")]
        worktree_dir: PathBuf,
    },
    /// Manage tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Manage code reviews.
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// Merge one task now, bypassing the poll interval.
    Merge { id: i64 },
    /// Show task counts by status.
    Status,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Add a new task.
    Add {
        #[arg(long)]
        title: String,
        /// Repositories the task touches (repeatable).
        #[arg(long = "repo", required = true)]
        repos: Vec<String>,
    },
    /// List tasks.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        repo: Option<String>,
    },
    /// Show detailed info about a task.
    Show { id: i64 },
    /// Assign a task to an agent (first assignment fixes DRI and branch).
    Assign {
        id: i64,
        #[arg(long)]
        agent: String,
    },
    /// Move a task to a new status (validated against the state machine).
    SetStatus {
        id: i64,
        #[arg(long)]
        status: String,
    },
    /// Record the commit a repo's branch diverged from main.
    SetBase {
        id: i64,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        sha: String,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// Open a new review round (moves the task to in_review).
    Open {
        id: i64,
        #[arg(long)]
        reviewer: Option<String>,
    },
    /// Approve the current review round; the task enters the merge queue.
    Approve {
        id: i64,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long)]
        reviewer: String,
    },
    /// Reject the current review round; the task goes back to work.
    Reject {
        id: i64,
        #[arg(long)]
        summary: String,
        #[arg(long)]
        reviewer: String,
    },
    /// Attach an inline comment to the current review round.
    Comment {
        id: i64,
        #[arg(long)]
        file: String,
        #[arg(long)]
        line: Option<u32>,
        #[arg(long)]
        body: String,
        #[arg(long)]
        author: String,
    },
    /// Show the current review round with its comments.
    Show { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        json_logs: cli.json_logs,
        log_filter: cli.log_filter.clone(),
    });

    let db = mainline_db::open_db(&cli.db)?;

    match cli.command {
        Commands::Run {
            poll_secs,
            worktree_dir,
        } => {
            let repos = Arc::new(ReposConfig::load(&cli.config)?);
            cmd_run(&db, repos, poll_secs, worktree_dir).await
        }
        Commands::Task { action } => cmd_task(&db, action),
        Commands::Review { action } => cmd_review(&db, action).await,
        Commands::Merge { id } => {
            let repos = Arc::new(ReposConfig::load(&cli.config)?);
            cmd_merge(&db, repos, id).await
        }
        Commands::Status => cmd_status(&db),
    }
}

fn pipeline(repos: Arc<ReposConfig>, worktree_dir: PathBuf) -> Result<(MergeWorker, EventBus)> {
    require_repos(&repos)?;
    let bus = EventBus::new();
    let worker = MergeWorker::new(
        repos,
        Arc::new(mainline_runner::git::GitCli::default()),
        Arc::new(BusNotifier::new(bus.clone())),
        Arc::new(AgentWorktrees::new(worktree_dir)),
        bus.clone(),
        std::env::temp_dir().join("mainline-merges"),
    );
    Ok((worker, bus))
}

async fn cmd_run(
    db: &redb::Database,
    repos: Arc<ReposConfig>,
    poll_secs: u64,
    worktree_dir: PathBuf,
) -> Result<()> {
    let (worker, bus) = pipeline(repos.clone(), worktree_dir)?;

    // Mirror every pipeline event into the log stream.
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            tracing::info!(event = ?event.kind, "pipeline event");
        }
    });

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing current work");
            signal_cancel.cancel();
        }
    });

    let scanner = Scanner::new(worker, repos, bus);
    scanner
        .run(db, Duration::from_secs(poll_secs), cancel)
        .await
}

async fn cmd_merge(db: &redb::Database, repos: Arc<ReposConfig>, id: i64) -> Result<()> {
    let (worker, _bus) = pipeline(repos, PathBuf::from("worktrees"))?;
    let outcome = worker.merge_task(db, &TaskId(id)).await?;
    if outcome.success {
        println!("Merged {}: {}", TaskId(id), outcome.message);
    } else {
        let reason = outcome
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".into());
        println!("Merge of {} failed ({reason}): {}", TaskId(id), outcome.message);
    }
    Ok(())
}

fn cmd_task(db: &redb::Database, action: TaskAction) -> Result<()> {
    let store = TaskStore::new(db);

    match action {
        TaskAction::Add { title, repos } => {
            let repos = repos.into_iter().map(RepoName::new).collect();
            let task = store.insert(Task::new(title, repos))?;
            println!("Created {}: {}", task.id, task.title);
        }
        TaskAction::List { status, repo } => {
            let status_filter = status
                .map(|s| s.parse::<TaskStatus>())
                .transpose()?;
            let repo_filter = repo.map(RepoName::new);
            let tasks = store.list(status_filter, repo_filter.as_ref())?;
            if tasks.is_empty() {
                println!("No tasks found.");
            } else {
                println!(
                    "{:<8} {:<12} {:<10} {:<18} {:<4} TITLE",
                    "ID", "STATUS", "ASSIGNEE", "BRANCH", "TRY"
                );
                println!("{}", "-".repeat(78));
                for t in tasks {
                    println!(
                        "{:<8} {:<12} {:<10} {:<18} {:<4} {}",
                        t.id.to_string(),
                        t.status.label(),
                        t.assignee.as_deref().unwrap_or("-"),
                        t.branch.as_deref().unwrap_or("-"),
                        t.merge_attempts,
                        t.title
                    );
                }
            }
        }
        TaskAction::Show { id } => {
            let task = store
                .get(&TaskId(id))?
                .context(format!("task {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::Assign { id, agent } => {
            let mut task = store
                .get(&TaskId(id))?
                .context(format!("task {id} not found"))?;
            task.assign(&agent);
            store.update(&task)?;
            if task.status == TaskStatus::Todo {
                store.change_status(
                    &task.id,
                    TaskStatus::InProgress,
                    Some(&format!("assigned to {agent}")),
                )?;
            }
            println!(
                "Assigned {} to {agent} (branch {})",
                task.id,
                task.branch.as_deref().unwrap_or("-")
            );
        }
        TaskAction::SetStatus { id, status } => {
            let status: TaskStatus = status.parse()?;
            let task = store.change_status(&TaskId(id), status, Some("set via cli"))?;
            println!("Set {} to '{}'", task.id, task.status.label());
        }
        TaskAction::SetBase { id, repo, sha } => {
            let mut task = store
                .get(&TaskId(id))?
                .context(format!("task {id} not found"))?;
            let repo = RepoName::new(repo);
            if !task.repos.contains(&repo) {
                anyhow::bail!("task {} does not touch repo {repo}", task.id);
            }
            task.base_sha.insert(repo.clone(), sha.clone());
            task.updated_at = chrono::Utc::now();
            store.update(&task)?;
            println!("Recorded base {sha} for {} in {repo}", task.id);
        }
    }

    Ok(())
}

async fn cmd_review(db: &redb::Database, action: ReviewAction) -> Result<()> {
    // One-shot command: subscribe before acting, then mirror whatever the
    // action emitted into the log stream before the process exits.
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    run_review_action(db, action, &bus).await?;
    while let Ok(event) = rx.try_recv() {
        tracing::info!(event = ?event.kind, "pipeline event");
    }
    Ok(())
}

async fn run_review_action(db: &redb::Database, action: ReviewAction, bus: &EventBus) -> Result<()> {
    let store = TaskStore::new(db);
    let reviews = ReviewStore::new(db);

    match action {
        ReviewAction::Open { id, reviewer } => {
            let task = store
                .get(&TaskId(id))?
                .context(format!("task {id} not found"))?;
            if task.status != TaskStatus::InReview {
                store.change_status(&task.id, TaskStatus::InReview, None)?;
            }
            let review = create_review_for(db, &task.id, reviewer.as_deref())?;
            println!("Opened review round {} for {}", review.attempt, task.id);
        }
        ReviewAction::Approve {
            id,
            summary,
            reviewer,
        } => {
            let task = store
                .get(&TaskId(id))?
                .context(format!("task {id} not found"))?;
            reviews.set_verdict(&task.id, task.review_attempt, "approved", &summary, &reviewer)?;
            store.change_status(&task.id, TaskStatus::InApproval, Some("review approved"))?;
            bus.emit(EventKind::ReviewDecided {
                task_id: task.id,
                attempt: task.review_attempt,
                approved: true,
            });
            println!("Approved {}; queued for merge", task.id);
        }
        ReviewAction::Reject {
            id,
            summary,
            reviewer,
        } => {
            let task = store
                .get(&TaskId(id))?
                .context(format!("task {id} not found"))?;
            reviews.set_verdict(&task.id, task.review_attempt, "rejected", &summary, &reviewer)?;
            let task =
                store.change_status(&task.id, TaskStatus::InProgress, Some(&summary))?;
            bus.emit(EventKind::ReviewDecided {
                task_id: task.id,
                attempt: task.review_attempt,
                approved: false,
            });

            let notifier = BusNotifier::new(bus.clone());
            if let Err(e) = notifier.notify_rejection(&task, &summary).await {
                tracing::warn!(error = %e, "rejection notification failed");
            }
            println!("Rejected {}; sent back to work", task.id);
        }
        ReviewAction::Comment {
            id,
            file,
            line,
            body,
            author,
        } => {
            let task = store
                .get(&TaskId(id))?
                .context(format!("task {id} not found"))?;
            let comment = ReviewComment {
                task_id: task.id,
                attempt: task.review_attempt,
                file,
                line,
                body,
                author: Some(author),
                created_at: chrono::Utc::now(),
            };
            reviews.add_comment(&comment)?;
            println!("Comment recorded on {} round {}", task.id, task.review_attempt);
        }
        ReviewAction::Show { id } => {
            let (review, comments) = reviews.get_current_review(&TaskId(id))?;
            println!("{}", serde_json::to_string_pretty(&review)?);
            for c in comments {
                let line = c.line.map(|l| format!(":{l}")).unwrap_or_default();
                let author = c.author.as_deref().unwrap_or("-");
                println!("  {}{} [{author}] {}", c.file, line, c.body);
            }
        }
    }

    Ok(())
}


fn cmd_status(db: &redb::Database) -> Result<()> {
    let store = TaskStore::new(db);
    let counts = store.status_counts()?;

    println!("=== Mainline Status ===\n");
    println!("Task counts:");
    for status in TaskStatus::ALL {
        if let Some(count) = counts.get(status.label()) {
            println!("  {:<14} {count}", status.label());
        }
    }
    let total: usize = counts.values().sum();
    println!("  {:<14} {total}", "total");

    Ok(())
}
