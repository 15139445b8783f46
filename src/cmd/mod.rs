//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                                    |
//! |-------------|-----------------------------------------------------|
//! | `task`      | `List`, `Show`, `Create`, `Plan`, `Delete`          |
//! | `worker`    | `Start`, `Stop`, `Recover`, `Resume`, `Review`      |
//! | `workspace` | `Merge`, `Discard`, `Diff`, `Preview`, `Worktrees`, `Cleanup` |
//! | `logs`      | `Logs`                                              |

pub mod logs;
pub mod task;
pub mod worker;
pub mod workspace;

pub use logs::cmd_logs;
pub use task::{cmd_create, cmd_delete, cmd_list, cmd_plan, cmd_show};
pub use worker::{cmd_recover, cmd_resume, cmd_review, cmd_start, cmd_stop};
pub use workspace::{
    cmd_cleanup_worktrees, cmd_diff, cmd_discard, cmd_merge, cmd_preview, cmd_worktrees,
};

use anyhow::{Result, bail};

use crate::model::Task;
use crate::store::TaskStore;

/// Resolve a user-supplied task reference: a full task id, a unique id
/// prefix, or a spec id.
pub fn resolve_task(store: &TaskStore, reference: &str) -> Result<Task> {
    if let Ok(task) = store.get(reference) {
        return Ok(task);
    }
    if let Some(task) = store.get_by_spec(reference) {
        return Ok(task);
    }

    let matches: Vec<Task> = store
        .list()
        .into_iter()
        .filter(|t| t.id.starts_with(reference) || t.spec_id.starts_with(reference))
        .collect();
    match matches.len() {
        0 => bail!("No task matches '{}'", reference),
        1 => Ok(matches.into_iter().next().expect("checked length")),
        n => bail!("'{}' is ambiguous: matches {} tasks", reference, n),
    }
}
