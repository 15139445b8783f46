//! Worker control: start/stop, stuck-task recovery, resume, and review
//! verdicts.

use std::sync::Arc;

use anyhow::Result;
use console::style;

use crate::model::TaskStatus;
use crate::monitor::{LivenessMonitor, RecoverOptions, TaskHealth};
use crate::store::TaskStore;
use crate::worker::{StartOptions, WorkerGateway};
use crate::workspace::WorkspaceManager;

use super::resolve_task;

pub async fn cmd_start(
    store: &TaskStore,
    worker: &dyn WorkerGateway,
    workspace: &WorkspaceManager,
    reference: &str,
) -> Result<()> {
    let task = resolve_task(store, reference)?;
    // The worker does its code-modifying work in an isolated workspace.
    let wt_path = workspace.ensure(&task.id).await?;
    worker.start_task(&task, StartOptions::default()).await?;
    println!(
        "Started worker for task {} (workspace {})",
        task.id,
        wt_path.display()
    );
    Ok(())
}

pub async fn cmd_stop(
    store: &TaskStore,
    worker: &dyn WorkerGateway,
    reference: &str,
) -> Result<()> {
    let task = resolve_task(store, reference)?;
    worker.stop_task(&task.id).await?;
    println!("Stopped worker for task {}", task.id);
    Ok(())
}

pub async fn cmd_recover(
    store: Arc<TaskStore>,
    worker: Arc<dyn WorkerGateway>,
    reference: &str,
    target: Option<TaskStatus>,
    restart: bool,
) -> Result<()> {
    let task = resolve_task(&store, reference)?;
    let monitor = LivenessMonitor::new(store, worker);

    match monitor.inspect(&task.id).await? {
        TaskHealth::Stuck => {}
        TaskHealth::Live => {
            println!("Task {} has a live worker; nothing to recover.", task.id);
            return Ok(());
        }
        TaskHealth::IncompleteReview => {
            println!(
                "Task {} is an incomplete review. Use 'foreman resume {}' instead.",
                task.id, task.id
            );
            return Ok(());
        }
        TaskHealth::Idle => {
            println!("Task {} is not in progress; nothing to recover.", task.id);
            return Ok(());
        }
    }

    let outcome = monitor
        .recover_stuck_task(
            &task.id,
            RecoverOptions {
                target_status: target,
                auto_restart: restart,
            },
        )
        .await?;
    let prefix = if outcome.success {
        style("ok:").green().bold()
    } else {
        style("failed:").red().bold()
    };
    println!("{} {}", prefix, outcome.message);
    Ok(())
}

pub async fn cmd_resume(
    store: Arc<TaskStore>,
    worker: Arc<dyn WorkerGateway>,
    reference: &str,
) -> Result<()> {
    let task = resolve_task(&store, reference)?;
    let monitor = LivenessMonitor::new(store, worker);
    let outcome = monitor.resume_incomplete_review(&task.id).await?;
    let prefix = if outcome.success {
        style("ok:").green().bold()
    } else {
        style("failed:").red().bold()
    };
    println!("{} {}", prefix, outcome.message);
    Ok(())
}

pub fn cmd_review(
    store: &TaskStore,
    reference: &str,
    approved: bool,
    feedback: Option<&str>,
) -> Result<()> {
    let task = resolve_task(store, reference)?;
    let task = store.submit_review(&task.id, approved, feedback)?;
    println!(
        "Review recorded for {}; task is now {}",
        task.id, task.status
    );
    Ok(())
}
