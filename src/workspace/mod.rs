//! Workspace lifecycle: one isolated git worktree per task under review.
//!
//! States per task: absent -> active -> merged | discarded. The two terminal
//! transitions are destructive and mutually exclusive, so they are serialized
//! by a per-task lock; a caller that loses the race gets
//! `WorkspaceError::Busy` instead of a half-applied state. Status and diff
//! are read-only views and never mutate task state. All git work runs on the
//! blocking thread pool.

pub mod git;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::errors::{TaskError, WorkspaceError};
use crate::model::{Task, TaskStatus, WorktreeDiff, WorktreeStatus};
use crate::store::TaskStore;

pub use git::{MergePreview, WorktreeSummary};

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Stage the merged changes into the base branch without committing,
    /// leaving them for manual inspection.
    pub stage_only: bool,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub message: String,
    /// Merge commit id; `None` for stage-only merges.
    pub commit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscardOutcome {
    pub message: String,
}

pub struct WorkspaceManager {
    store: Arc<TaskStore>,
    repo_path: PathBuf,
    worktrees_dir: PathBuf,
    base_branch: String,
    /// Per-task guards serializing merge against discard.
    task_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceManager {
    pub fn new(store: Arc<TaskStore>) -> Self {
        let config = store.config().clone();
        Self {
            store,
            repo_path: config.project_dir.clone(),
            worktrees_dir: config.worktrees_dir(),
            base_branch: config.base_branch.clone(),
            task_locks: Mutex::new(HashMap::new()),
        }
    }

    fn worktree_path(&self, task_id: &str) -> PathBuf {
        self.worktrees_dir.join(task_id)
    }

    /// Create the workspace for a task if it does not exist yet. Called when
    /// the worker begins isolated work; returns the existing path otherwise.
    pub async fn ensure(&self, task_id: &str) -> Result<PathBuf, WorkspaceError> {
        let task = self.task(task_id)?;
        let wt_path = self.worktree_path(&task.id);
        if wt_path.exists() {
            return Ok(wt_path);
        }

        let repo_path = self.repo_path.clone();
        let base_branch = self.base_branch.clone();
        let branch = git::branch_name(&task.id, &task.title);
        let path = wt_path.clone();
        let id = task.id.clone();
        tokio::task::spawn_blocking(move || {
            git::create_worktree(&repo_path, &path, &id, &branch, &base_branch)
        })
        .await
        .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))??;

        info!(task_id, "workspace created");
        Ok(wt_path)
    }

    /// Read-only workspace status. Reports `exists: false` when absent.
    pub async fn status(&self, task_id: &str) -> Result<WorktreeStatus, WorkspaceError> {
        let task = self.task(task_id)?;
        let repo_path = self.repo_path.clone();
        let base_branch = self.base_branch.clone();
        let branch = git::branch_name(&task.id, &task.title);
        let wt_path = self.worktree_path(&task.id);
        tokio::task::spawn_blocking(move || {
            git::worktree_status(&repo_path, &wt_path, &branch, &base_branch)
        })
        .await
        .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?
    }

    /// Read-only per-file diff of the workspace against its branch point.
    pub async fn diff(&self, task_id: &str) -> Result<WorktreeDiff, WorkspaceError> {
        let task = self.task(task_id)?;
        self.require_active(&task.id)?;
        let repo_path = self.repo_path.clone();
        let base_branch = self.base_branch.clone();
        let branch = git::branch_name(&task.id, &task.title);
        tokio::task::spawn_blocking(move || git::worktree_diff(&repo_path, &branch, &base_branch))
            .await
            .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?
    }

    /// Non-destructive merge preview: conflicts and base-branch drift.
    pub async fn preview_merge(&self, task_id: &str) -> Result<MergePreview, WorkspaceError> {
        let task = self.task(task_id)?;
        self.require_active(&task.id)?;
        let repo_path = self.repo_path.clone();
        let base_branch = self.base_branch.clone();
        let branch = git::branch_name(&task.id, &task.title);
        tokio::task::spawn_blocking(move || git::merge_preview(&repo_path, &branch, &base_branch))
            .await
            .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?
    }

    /// Merge the workspace into the base branch and mark the task done.
    ///
    /// On any failure the workspace stays active and the task untouched, so
    /// the action can be retried.
    pub async fn merge(
        &self,
        task_id: &str,
        options: MergeOptions,
    ) -> Result<MergeOutcome, WorkspaceError> {
        let task = self.task(task_id)?;
        let _guard = self.task_guard(&task.id).await?;
        self.require_active(&task.id)?;

        let repo_path = self.repo_path.clone();
        let base_branch = self.base_branch.clone();
        let branch = git::branch_name(&task.id, &task.title);
        let message = format!("Merge task {}: {}", task.id, task.title);
        let stage_only = options.stage_only;
        let commit = tokio::task::spawn_blocking(move || {
            git::merge_worktree(&repo_path, &branch, &base_branch, &message, stage_only)
        })
        .await
        .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))??;

        self.destroy_worktree(&task).await?;
        self.store
            .set_status(&task.id, TaskStatus::Done, None)
            .map_err(task_to_workspace_error)?;

        info!(task_id, stage_only, "workspace merged");
        Ok(MergeOutcome {
            message: if stage_only {
                format!("Task {} staged into {} (no commit)", task.id, self.base_branch)
            } else {
                format!("Task {} merged into {}", task.id, self.base_branch)
            },
            commit,
        })
    }

    /// Delete the workspace and all uncommitted work, reverting the task to
    /// backlog. Destructive and irreversible; confirmation happens upstream.
    pub async fn discard(&self, task_id: &str) -> Result<DiscardOutcome, WorkspaceError> {
        let task = self.task(task_id)?;
        let _guard = self.task_guard(&task.id).await?;
        self.require_active(&task.id)?;

        self.destroy_worktree(&task).await?;
        self.store
            .reset_to_backlog(&task.id)
            .map_err(task_to_workspace_error)?;

        info!(task_id, "workspace discarded");
        Ok(DiscardOutcome {
            message: format!("Task {} workspace discarded; task returned to backlog", task.id),
        })
    }

    /// All foreman worktrees in the repository, for listing and cleanup.
    pub async fn list(&self) -> Result<Vec<WorktreeSummary>, WorkspaceError> {
        let repo_path = self.repo_path.clone();
        let base_branch = self.base_branch.clone();
        tokio::task::spawn_blocking(move || git::list_worktrees(&repo_path, &base_branch))
            .await
            .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?
    }

    /// Discard every foreman workspace. Tasks still known to the store are
    /// reset to backlog; orphaned worktrees are removed regardless.
    pub async fn cleanup_all(&self) -> Result<usize, WorkspaceError> {
        let mut removed = 0;
        for summary in self.list().await? {
            match self.discard(&summary.task_id).await {
                Ok(_) => removed += 1,
                Err(WorkspaceError::Missing { .. }) => {
                    // Orphaned worktree: the task is gone from the store, so
                    // remove the physical workspace directly.
                    let repo_path = self.repo_path.clone();
                    let branch = summary.branch.clone();
                    let task_id = summary.task_id.clone();
                    let wt_path = summary.path.clone();
                    tokio::task::spawn_blocking(move || {
                        git::remove_worktree(&repo_path, &wt_path, &task_id, &branch)
                    })
                    .await
                    .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))??;
                    removed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn task(&self, task_id: &str) -> Result<Task, WorkspaceError> {
        self.store.get(task_id).map_err(|_| WorkspaceError::Missing {
            task_id: task_id.to_string(),
        })
    }

    fn require_active(&self, task_id: &str) -> Result<(), WorkspaceError> {
        if !self.worktree_path(task_id).exists() {
            return Err(WorkspaceError::Missing {
                task_id: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Acquire the per-task merge/discard guard without waiting: a second
    /// concurrent destructive action must fail, not queue up behind the
    /// first and run against a destroyed workspace.
    async fn task_guard(&self, task_id: &str) -> Result<OwnedMutexGuard<()>, WorkspaceError> {
        let lock = {
            let mut locks = self.task_locks.lock().await;
            locks
                .entry(task_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().map_err(|_| WorkspaceError::Busy {
            task_id: task_id.to_string(),
        })
    }

    async fn destroy_worktree(&self, task: &Task) -> Result<(), WorkspaceError> {
        let repo_path = self.repo_path.clone();
        let wt_path = self.worktree_path(&task.id);
        let branch = git::branch_name(&task.id, &task.title);
        let id = task.id.clone();
        tokio::task::spawn_blocking(move || {
            git::remove_worktree(&repo_path, &wt_path, &id, &branch)
        })
        .await
        .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?
    }
}

fn task_to_workspace_error(err: TaskError) -> WorkspaceError {
    WorkspaceError::Io(std::io::Error::other(err.to_string()))
}
