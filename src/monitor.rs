//! Liveness and recovery: reconciling a task's recorded status with the
//! worker processes that actually exist.
//!
//! Checks run on demand at task inspection, not on a polling loop — this is
//! a single-operator tool. Recovery is idempotent: it is a pure reset of
//! bookkeeping derived from durable chunk data, so calling it twice (or
//! retrying after a crash mid-recovery) converges on the same state.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::{Task, TaskStatus};
use crate::status;
use crate::store::TaskStore;
use crate::worker::{StartOptions, WorkerGateway};

/// Reconciliation verdict for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHealth {
    /// Recorded in_progress and a live worker exists.
    Live,
    /// Recorded in_progress but no live worker: the recorded state has
    /// diverged from reality. Surface a recovery action.
    Stuck,
    /// In human review without a single completed chunk: the worker crashed
    /// during planning. Surface a resume action, not recovery.
    IncompleteReview,
    /// Nothing to reconcile.
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Status to reset to. Defaults to the task's natural next status: a
    /// fresh derivation over its chunks with a backlog baseline.
    pub target_status: Option<TaskStatus>,
    /// Immediately restart the worker after resetting, so the user does not
    /// need a second action.
    pub auto_restart: bool,
}

#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub message: String,
    pub auto_restarted: bool,
}

pub struct LivenessMonitor {
    store: Arc<TaskStore>,
    worker: Arc<dyn WorkerGateway>,
}

impl LivenessMonitor {
    pub fn new(store: Arc<TaskStore>, worker: Arc<dyn WorkerGateway>) -> Self {
        Self { store, worker }
    }

    /// Reconcile one task's recorded status against process reality. Never
    /// mutates task state; a failing liveness check is reported to the
    /// caller rather than guessed around.
    pub async fn inspect(&self, task_id: &str) -> Result<TaskHealth> {
        let task = self.store.get(task_id)?;

        if task.status == TaskStatus::InProgress {
            let running = self
                .worker
                .check_running(task_id)
                .await
                .context("Liveness check failed")?;
            return Ok(if running {
                TaskHealth::Live
            } else {
                TaskHealth::Stuck
            });
        }

        if status::is_incomplete_human_review(task.status, &task.chunks) {
            return Ok(TaskHealth::IncompleteReview);
        }

        Ok(TaskHealth::Idle)
    }

    /// Reset a stuck task to a recoverable baseline and optionally restart
    /// its worker.
    ///
    /// If a live worker still exists the task is not stuck and nothing is
    /// touched. With no live worker, the bookkeeping reset always succeeds —
    /// even if a requested restart subsequently fails, which is reported in
    /// the outcome rather than as an error.
    pub async fn recover_stuck_task(
        &self,
        task_id: &str,
        options: RecoverOptions,
    ) -> Result<RecoveryOutcome> {
        let task = self.store.get(task_id)?;

        let running = self
            .worker
            .check_running(task_id)
            .await
            .context("Liveness check failed")?;
        if running {
            return Ok(RecoveryOutcome {
                success: false,
                message: format!("Task {} has a live worker; not recovering", task_id),
                auto_restarted: false,
            });
        }

        let (target, reason) = match options.target_status {
            Some(target) => (target, None),
            None => {
                let derived =
                    status::derive_status(&task.chunks, TaskStatus::Backlog, task.metadata.source_type);
                (derived.status, derived.review_reason)
            }
        };
        self.store.set_status(task_id, target, reason)?;
        info!(task_id, target = %target, "stuck task reset");

        if !options.auto_restart {
            return Ok(RecoveryOutcome {
                success: true,
                message: format!("Task {} reset to {}", task_id, target),
                auto_restarted: false,
            });
        }

        match self.restart(&task).await {
            Ok(()) => Ok(RecoveryOutcome {
                success: true,
                message: format!("Task {} reset to {} and worker restarted", task_id, target),
                auto_restarted: true,
            }),
            Err(e) => {
                warn!(task_id, err = %e, "restart after recovery failed");
                Ok(RecoveryOutcome {
                    success: true,
                    message: format!(
                        "Task {} reset to {}, but restart failed: {}",
                        task_id, target, e
                    ),
                    auto_restarted: false,
                })
            }
        }
    }

    /// Resume a task whose worker died during planning. Validates the
    /// incomplete-review condition, then simply (re)starts the task.
    pub async fn resume_incomplete_review(&self, task_id: &str) -> Result<RecoveryOutcome> {
        let task = self.store.get(task_id)?;
        if !status::is_incomplete_human_review(task.status, &task.chunks) {
            return Ok(RecoveryOutcome {
                success: false,
                message: format!("Task {} is not an incomplete review", task_id),
                auto_restarted: false,
            });
        }

        self.worker
            .start_task(&task, StartOptions { resume: true })
            .await
            .context("Failed to restart worker")?;
        self.store
            .set_status(task_id, TaskStatus::InProgress, None)?;
        info!(task_id, "incomplete review resumed");
        Ok(RecoveryOutcome {
            success: true,
            message: format!("Task {} restarted from planning", task_id),
            auto_restarted: true,
        })
    }

    async fn restart(&self, task: &Task) -> Result<()> {
        let current = self.store.get(&task.id)?;
        self.worker
            .start_task(&current, StartOptions::default())
            .await?;
        self.store
            .set_status(&task.id, TaskStatus::InProgress, None)?;
        Ok(())
    }
}
