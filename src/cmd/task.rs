//! Task listing, inspection, creation, and deletion commands.

use anyhow::Result;
use console::style;

use crate::errors::TaskError;
use crate::model::{SourceType, TaskStatus};
use crate::plan::PlanFile;
use crate::progress;
use crate::store::TaskStore;

use super::resolve_task;

pub fn cmd_list(store: &TaskStore) -> Result<()> {
    let tasks = store.list();
    if tasks.is_empty() {
        println!();
        println!("No tasks yet. Run 'foreman create <title>' to add one.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{:<14} {:<14} {:<10} {:<8} Title",
        "Id", "Status", "Reason", "Progress"
    );
    println!(
        "{:<14} {:<14} {:<10} {:<8} -----",
        "------------", "------------", "--------", "--------"
    );
    for task in &tasks {
        let reason = task
            .review_reason
            .map(|r| r.as_str())
            .unwrap_or("-")
            .to_string();
        println!(
            "{:<14} {:<14} {:<10} {:>6}%  {}",
            &task.id[..12.min(task.id.len())],
            colored_status(task.status),
            reason,
            progress::display_progress(task),
            task.title
        );
    }
    println!();
    Ok(())
}

pub fn cmd_show(store: &TaskStore, reference: &str) -> Result<()> {
    let task = resolve_task(store, reference)?;

    println!();
    println!("{}", style(&task.title).bold());
    println!("Id:       {}", task.id);
    println!("Spec:     {}", task.spec_id);
    println!(
        "Status:   {}{}",
        colored_status(task.status),
        task.review_reason
            .map(|r| format!(" ({})", r))
            .unwrap_or_default()
    );
    println!("Source:   {}", task.metadata.source_type);
    println!("Progress: {}%", progress::display_progress(&task));
    if let Some(phase) = task.execution_progress.phase {
        let activity = if progress::has_active_execution(&task.execution_progress) {
            style("executing").yellow().to_string()
        } else {
            style("not executing").dim().to_string()
        };
        println!("Phase:    {} ({})", phase, activity);
    }
    if let Some(message) = &task.execution_progress.message {
        println!("Message:  {}", message);
    }
    if let Some(chunk_id) = &task.execution_progress.current_chunk
        && let Some(chunk) = task.chunk(chunk_id)
    {
        println!("Working:  {} ({})", chunk.id, chunk.description);
    }
    println!("Updated:  {}", task.updated_at.to_rfc3339());
    if task.status.is_review() {
        println!();
        println!(
            "{}",
            style("In review: 'foreman diff', 'foreman merge', or 'foreman discard'").dim()
        );
    }

    if !task.chunks.is_empty() {
        println!();
        println!(
            "Chunks ({}/{} completed):",
            task.completed_chunks(),
            task.chunks.len()
        );
        for chunk in &task.chunks {
            let marker = match chunk.status {
                crate::model::ChunkStatus::Completed => style("done").green(),
                crate::model::ChunkStatus::Failed => style("fail").red(),
                crate::model::ChunkStatus::InProgress => style("....").yellow(),
                crate::model::ChunkStatus::Pending => style("    ").dim(),
            };
            println!("  [{}] {}  {}", marker, chunk.id, chunk.description);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_create(
    store: &TaskStore,
    title: &str,
    description: &str,
    source: SourceType,
) -> Result<()> {
    let task = store.create_task(title, description, source)?;
    println!("Created task {} (spec {})", task.id, task.spec_id);
    Ok(())
}

/// Adopt the chunk plan the planner wrote into the task's spec directory.
pub fn cmd_plan(store: &TaskStore, reference: &str) -> Result<()> {
    let task = resolve_task(store, reference)?;
    let spec_dir = store.config().spec_dir(&task.spec_id);
    let plan = PlanFile::load(&spec_dir.join("plan.json"))?;

    if let Ok(spec) = std::fs::read_to_string(spec_dir.join("spec.md"))
        && !plan.matches_spec(&spec)
    {
        println!(
            "{} plan predates the current spec document; chunks may be stale",
            style("warning:").yellow().bold()
        );
    }

    let task = store.set_chunks(&task.id, plan.chunks)?;
    println!("Adopted {} chunk(s) for task {}", task.chunks.len(), task.id);
    Ok(())
}

pub fn cmd_delete(store: &TaskStore, reference: &str, force: bool) -> Result<()> {
    let task = resolve_task(store, reference)?;
    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Delete task '{}' and its spec directory? This cannot be undone",
                task.title
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    match store.delete_task(&task.id) {
        Ok(()) => {
            println!("Deleted task {}", task.id);
            Ok(())
        }
        Err(TaskError::WorkspaceActive { id }) => {
            println!(
                "{} Task {} still has a workspace. Run 'foreman discard {}' first.",
                style("error:").red().bold(),
                id,
                id
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn colored_status(status: TaskStatus) -> String {
    let styled = match status {
        TaskStatus::Backlog => style(status.as_str()).dim(),
        TaskStatus::InProgress => style(status.as_str()).yellow(),
        TaskStatus::AiReview => style(status.as_str()).cyan(),
        TaskStatus::HumanReview => style(status.as_str()).magenta(),
        TaskStatus::Done => style(status.as_str()).green(),
    };
    styled.to_string()
}
