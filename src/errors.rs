//! Typed error hierarchy for the foreman lifecycle engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `TaskError` — task store and command failures
//! - `WorkspaceError` — worktree lifecycle failures
//! - `WorkerError` — execution-worker process failures

use thiserror::Error;

/// Errors from the task store and its command set.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Task {id} still has an active workspace; discard or merge it first")]
    WorkspaceActive { id: String },

    #[error("Another foreman process already owns this project")]
    LockHeld,

    #[error("Failed to persist task state at {path}: {source}")]
    Storage {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the workspace lifecycle manager.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("No workspace exists for task {task_id}")]
    Missing { task_id: String },

    #[error("A merge or discard is already in progress for task {task_id}")]
    Busy { task_id: String },

    #[error("Merge would conflict in {} file(s): {}", files.len(), files.join(", "))]
    MergeConflicts { files: Vec<String> },

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the execution-worker collaborator.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Failed to stop worker for task {task_id}: {message}")]
    StopFailed { task_id: String, message: String },

    #[error("No worker command configured")]
    NotConfigured,

    #[error("Liveness check failed: {0}")]
    Liveness(String),
}
