//! Workspace review commands: merge, discard, diff, preview, listing, and
//! bulk cleanup.

use anyhow::Result;
use console::style;

use crate::errors::WorkspaceError;
use crate::store::TaskStore;
use crate::workspace::{MergeOptions, WorkspaceManager};

use super::resolve_task;

pub async fn cmd_merge(
    store: &TaskStore,
    workspace: &WorkspaceManager,
    reference: &str,
    no_commit: bool,
) -> Result<()> {
    let task = resolve_task(store, reference)?;
    match workspace
        .merge(&task.id, MergeOptions { stage_only: no_commit })
        .await
    {
        Ok(outcome) => {
            println!("{} {}", style("ok:").green().bold(), outcome.message);
            if let Some(commit) = outcome.commit {
                println!("Merge commit: {}", commit);
            }
            Ok(())
        }
        Err(WorkspaceError::MergeConflicts { files }) => {
            println!(
                "{} merge would conflict; workspace left intact.",
                style("failed:").red().bold()
            );
            for file in files {
                println!("  conflict: {}", file);
            }
            println!("Resolve on the base branch (or discard) and retry.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn cmd_discard(
    store: &TaskStore,
    workspace: &WorkspaceManager,
    reference: &str,
    force: bool,
) -> Result<()> {
    let task = resolve_task(store, reference)?;
    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Discard the workspace for '{}'? All uncommitted work will be lost",
                task.title
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let outcome = workspace.discard(&task.id).await?;
    println!("{} {}", style("ok:").green().bold(), outcome.message);
    Ok(())
}

pub async fn cmd_diff(
    store: &TaskStore,
    workspace: &WorkspaceManager,
    reference: &str,
) -> Result<()> {
    let task = resolve_task(store, reference)?;
    let status = workspace.status(&task.id).await?;
    if !status.exists {
        println!("Task {} has no workspace.", task.id);
        return Ok(());
    }

    let diff = workspace.diff(&task.id).await?;
    println!();
    println!(
        "Workspace {} ({} commits on {})",
        task.id, status.commit_count, status.branch
    );
    println!("{}", diff.summary);
    println!();
    for file in &diff.files {
        println!(
            "  {:<9} {:<50} +{} -{}",
            file.status.as_str(),
            file.path,
            file.additions,
            file.deletions
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_preview(
    store: &TaskStore,
    workspace: &WorkspaceManager,
    reference: &str,
) -> Result<()> {
    let task = resolve_task(store, reference)?;
    let preview = workspace.preview_merge(&task.id).await?;

    println!();
    println!(
        "Merge preview: {} -> {}",
        preview.branch, preview.base_branch
    );
    if preview.needs_rebase {
        println!(
            "{} base branch advanced by {} commit(s) since branch point",
            style("note:").yellow(),
            preview.commits_behind
        );
    }
    if preview.conflicting_files.is_empty() {
        println!("{} no conflicts detected", style("ok:").green().bold());
    } else {
        println!(
            "{} {} conflicting file(s):",
            style("conflicts:").red().bold(),
            preview.conflicting_files.len()
        );
        for file in &preview.conflicting_files {
            println!("  {}", file);
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_worktrees(workspace: &WorkspaceManager) -> Result<()> {
    let worktrees = workspace.list().await?;
    println!();
    if worktrees.is_empty() {
        println!("No workspaces found.");
        println!("Workspaces are created when a worker starts isolated work on a task.");
    } else {
        for wt in &worktrees {
            println!("{}", style(&wt.task_id).bold());
            println!("    Branch:  {}", wt.branch);
            println!("    Path:    {}", wt.path.display());
            println!(
                "    Commits: {}, files changed: {}",
                wt.commit_count, wt.files_changed
            );
            println!();
        }
        println!("To merge:   foreman merge <task>");
        println!("To discard: foreman discard <task>");
    }
    println!();
    Ok(())
}

pub async fn cmd_cleanup_worktrees(workspace: &WorkspaceManager, force: bool) -> Result<()> {
    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Discard ALL workspaces? All uncommitted work in them will be lost")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }
    let removed = workspace.cleanup_all().await?;
    println!("Removed {} workspace(s).", removed);
    Ok(())
}
