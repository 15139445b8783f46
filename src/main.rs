use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use foreman::cmd;
use foreman::config::Config;
use foreman::logs::PhaseLogStore;
use foreman::model::{SourceType, TaskStatus};
use foreman::store::TaskStore;
use foreman::worker::{ProcessWorker, WorkerGateway};
use foreman::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version, about = "Task lifecycle engine for AI-driven development work")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to the current directory).
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new task
    Create {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Source of the task: manual, ideation, or roadmap
        #[arg(long, default_value = "manual")]
        source: String,
    },
    /// List all tasks with derived status and progress
    List,
    /// Show one task in detail
    Show { task: String },
    /// Adopt the planner's plan.json from the task's spec directory
    Plan { task: String },
    /// Start the execution worker for a task
    Start { task: String },
    /// Stop the execution worker for a task
    Stop { task: String },
    /// Reset a stuck task (recorded in_progress, no live worker)
    Recover {
        task: String,
        /// Explicit status to reset to (defaults to the derived next status)
        #[arg(long)]
        target: Option<String>,
        /// Restart the worker immediately after resetting
        #[arg(long)]
        restart: bool,
    },
    /// Restart a task whose worker crashed during planning
    Resume { task: String },
    /// Record a review verdict for a task in ai_review or human_review
    Review {
        task: String,
        /// Reject instead of approving (requires --feedback)
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Merge a task's workspace into the base branch and mark it done
    Merge {
        task: String,
        /// Stage the changes without committing
        #[arg(long)]
        no_commit: bool,
    },
    /// Discard a task's workspace and all uncommitted work
    Discard {
        task: String,
        #[arg(long)]
        force: bool,
    },
    /// Show the per-file diff of a task's workspace
    Diff { task: String },
    /// Preview merge conflicts without touching the checkout
    Preview { task: String },
    /// List all workspaces
    Worktrees,
    /// Discard every workspace
    CleanupWorktrees {
        #[arg(long)]
        force: bool,
    },
    /// Show a task's phase logs
    Logs {
        task: String,
        /// Keep streaming snapshots as the worker writes
        #[arg(short, long)]
        follow: bool,
    },
    /// Delete a task and its spec directory
    Delete {
        task: String,
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool, config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "foreman=debug" } else { "foreman=info" })
    });

    // Command output goes to stdout; diagnostics go to the project log dir
    // when it is writable, stderr otherwise.
    let log_dir = config.log_dir();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(&log_dir, "foreman.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = Config::load(&project_dir)?;
    config.ensure_directories()?;
    let _guard = init_tracing(cli.verbose, &config);

    let store = Arc::new(TaskStore::open(config.clone())?);
    let worker: Arc<dyn WorkerGateway> = Arc::new(ProcessWorker::new(&config));
    let workspace = WorkspaceManager::new(store.clone());
    let log_store = PhaseLogStore::new(&config);

    match &cli.command {
        Commands::Create {
            title,
            description,
            source,
        } => {
            let source: SourceType = source.parse().map_err(anyhow::Error::msg)?;
            cmd::cmd_create(&store, title, description, source)?;
        }
        Commands::List => cmd::cmd_list(&store)?,
        Commands::Show { task } => cmd::cmd_show(&store, task)?,
        Commands::Plan { task } => cmd::cmd_plan(&store, task)?,
        Commands::Start { task } => {
            cmd::cmd_start(&store, worker.as_ref(), &workspace, task).await?;
        }
        Commands::Stop { task } => cmd::cmd_stop(&store, worker.as_ref(), task).await?,
        Commands::Recover {
            task,
            target,
            restart,
        } => {
            let target: Option<TaskStatus> = target
                .as_deref()
                .map(|t| t.parse().map_err(anyhow::Error::msg))
                .transpose()?;
            cmd::cmd_recover(store.clone(), worker.clone(), task, target, *restart).await?;
        }
        Commands::Resume { task } => {
            cmd::cmd_resume(store.clone(), worker.clone(), task).await?;
        }
        Commands::Review {
            task,
            reject,
            feedback,
        } => {
            cmd::cmd_review(&store, task, !*reject, feedback.as_deref())?;
        }
        Commands::Merge { task, no_commit } => {
            cmd::cmd_merge(&store, &workspace, task, *no_commit).await?;
        }
        Commands::Discard { task, force } => {
            cmd::cmd_discard(&store, &workspace, task, *force).await?;
        }
        Commands::Diff { task } => cmd::cmd_diff(&store, &workspace, task).await?,
        Commands::Preview { task } => cmd::cmd_preview(&store, &workspace, task).await?,
        Commands::Worktrees => cmd::cmd_worktrees(&workspace).await?,
        Commands::CleanupWorktrees { force } => {
            cmd::cmd_cleanup_worktrees(&workspace, *force).await?;
        }
        Commands::Logs { task, follow } => {
            cmd::cmd_logs(&store, &log_store, task, *follow).await?;
        }
        Commands::Delete { task, force } => cmd::cmd_delete(&store, task, *force)?,
    }

    Ok(())
}
