//! Phase log rendering and following.

use anyhow::Result;
use console::style;

use crate::logs::{self, LogStreamer, PhaseLogStore};
use crate::model::{LogEntryKind, LogPhase, TaskLogs};
use crate::store::TaskStore;

use super::resolve_task;

pub async fn cmd_logs(
    store: &TaskStore,
    log_store: &PhaseLogStore,
    reference: &str,
    follow: bool,
) -> Result<()> {
    let task = resolve_task(store, reference)?;

    match log_store.load(&task.spec_id)? {
        Some(snapshot) => render_snapshot(&snapshot),
        None if !task.logs.is_empty() => {
            // Task predates the phase log model: render the flat legacy log.
            println!();
            println!("{}", logs::render_legacy(&task.logs));
            println!();
            return Ok(());
        }
        None => {
            println!("No logs for task {} yet.", task.id);
            if !follow {
                return Ok(());
            }
        }
    }

    if follow {
        let streamer = LogStreamer::new(log_store.clone());
        let mut sub = streamer.subscribe(&task.spec_id)?;
        println!("{}", style("Following log updates (ctrl-c to stop)...").dim());
        while let Some(snapshot) = sub.updates.recv().await {
            render_snapshot(&snapshot);
        }
        streamer.unsubscribe(&task.spec_id);
    }
    Ok(())
}

fn render_snapshot(snapshot: &TaskLogs) {
    let expanded = logs::auto_expand(snapshot);
    println!();
    for phase in LogPhase::ALL {
        let log = snapshot.phase(phase);
        let marker = match log.status {
            crate::model::PhaseLogStatus::Pending => style("pending").dim(),
            crate::model::PhaseLogStatus::Active => style("active").yellow(),
            crate::model::PhaseLogStatus::Completed => style("completed").green(),
            crate::model::PhaseLogStatus::Failed => style("failed").red(),
        };
        println!("{} [{}]", style(phase.as_str()).bold(), marker);

        // Expand only the active phase; collapsed phases show entry counts.
        if expanded == Some(phase) || log.status == crate::model::PhaseLogStatus::Failed {
            for entry in &log.entries {
                println!("  {}", format_entry(entry));
            }
        } else if !log.entries.is_empty() {
            println!("  ({} entries)", log.entries.len());
        }
    }
    println!();
}

fn format_entry(entry: &crate::model::TaskLogEntry) -> String {
    let time = entry.timestamp.format("%H:%M:%S");
    match entry.kind {
        LogEntryKind::ToolStart => format!(
            "{} -> {}",
            time,
            entry.tool_name.as_deref().unwrap_or("tool")
        ),
        LogEntryKind::ToolEnd => format!(
            "{} <- {}",
            time,
            entry.tool_name.as_deref().unwrap_or("tool")
        ),
        LogEntryKind::Error => format!(
            "{} {} {}",
            time,
            style("error").red(),
            entry.content.as_deref().unwrap_or("")
        ),
        LogEntryKind::Success => format!(
            "{} {} {}",
            time,
            style("ok").green(),
            entry.content.as_deref().unwrap_or("")
        ),
        LogEntryKind::Info | LogEntryKind::Text => {
            format!("{} {}", time, entry.content.as_deref().unwrap_or(""))
        }
    }
}
