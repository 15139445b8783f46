//! The task store: single-writer owner of all task records.
//!
//! Every mutation goes through the small command set here
//! (`apply_chunk_update`, `apply_execution_progress`, `set_status`, ...),
//! which internally re-derives status via `status::derive_status` and
//! persists the result. Everything else — CLI, monitors, the workspace
//! manager — holds read-only snapshots and a subscribe channel. An exclusive
//! advisory lock on `.foreman/foreman.lock` enforces one control process per
//! project.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::RwLock;

use fs2::FileExt;
use tokio::sync::broadcast;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::errors::TaskError;
use crate::model::{
    Chunk, ChunkStatus, ExecutionProgress, ReviewReason, SourceType, Task, TaskStatus,
};
use crate::status;

/// Snapshot events pushed to subscribers on every mutation.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created { task: Task },
    Updated { task: Task },
    Deleted { task_id: String },
}

/// A single chunk mutation reported by the worker.
#[derive(Debug, Clone)]
pub struct ChunkUpdate {
    pub chunk_id: String,
    pub status: ChunkStatus,
    /// Paths touched while executing the chunk; `None` leaves the recorded
    /// set unchanged.
    pub files: Option<Vec<String>>,
}

pub struct TaskStore {
    config: Config,
    tasks: RwLock<HashMap<String, Task>>,
    events: broadcast::Sender<TaskEvent>,
    /// Held for the lifetime of the store; dropping releases the advisory
    /// lock.
    _lock_file: File,
}

impl TaskStore {
    /// Open the store for a project, acquiring the single-writer lock and
    /// loading every persisted task from the specs directory.
    pub fn open(config: Config) -> Result<Self, TaskError> {
        config.ensure_directories().map_err(TaskError::Other)?;

        let lock_path = config.foreman_dir().join("foreman.lock");
        let lock_file = File::create(&lock_path).map_err(|source| TaskError::Storage {
            path: lock_path.clone(),
            source,
        })?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(TaskError::LockHeld);
        }

        let mut tasks = HashMap::new();
        for entry in WalkDir::new(config.specs_dir())
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_name() != "task.json" {
                continue;
            }
            let content =
                std::fs::read_to_string(entry.path()).map_err(|source| TaskError::Storage {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
            let task: Task = serde_json::from_str(&content).map_err(|e| {
                TaskError::Other(anyhow::anyhow!(
                    "Corrupt task file {}: {}",
                    entry.path().display(),
                    e
                ))
            })?;
            tasks.insert(task.id.clone(), task);
        }
        info!(count = tasks.len(), "task store opened");

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            config,
            tasks: RwLock::new(tasks),
            events,
            _lock_file: lock_file,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to task change events. Receivers get full task snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, task_id: &str) -> Result<Task, TaskError> {
        self.tasks
            .read()
            .expect("task map lock poisoned")
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound {
                id: task_id.to_string(),
            })
    }

    pub fn get_by_spec(&self, spec_id: &str) -> Option<Task> {
        self.tasks
            .read()
            .expect("task map lock poisoned")
            .values()
            .find(|t| t.spec_id == spec_id)
            .cloned()
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .expect("task map lock poisoned")
            .values()
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn create_task(
        &self,
        title: &str,
        description: &str,
        source_type: SourceType,
    ) -> Result<Task, TaskError> {
        if title.trim().is_empty() {
            return Err(TaskError::Validation("Task title must not be empty".into()));
        }
        let task = Task::new(title, description, source_type);
        self.persist(&task)?;
        self.tasks
            .write()
            .expect("task map lock poisoned")
            .insert(task.id.clone(), task.clone());
        let _ = self.events.send(TaskEvent::Created { task: task.clone() });
        info!(task_id = %task.id, spec_id = %task.spec_id, "task created");
        Ok(task)
    }

    /// Adopt a planned chunk list. Chunks are created exactly once; a task
    /// that already has chunks rejects a new plan.
    pub fn set_chunks(&self, task_id: &str, chunks: Vec<Chunk>) -> Result<Task, TaskError> {
        self.mutate(task_id, |task| {
            if !task.chunks.is_empty() {
                return Err(TaskError::Validation(format!(
                    "Task {} already has a chunk plan",
                    task.id
                )));
            }
            task.chunks = chunks;
            Ok(())
        })
    }

    /// Apply one chunk status/files mutation and re-derive the task status.
    pub fn apply_chunk_update(
        &self,
        task_id: &str,
        update: ChunkUpdate,
    ) -> Result<Task, TaskError> {
        self.mutate(task_id, |task| {
            let source_type = task.metadata.source_type;
            let current_status = task.status;
            let chunk = task
                .chunks
                .iter_mut()
                .find(|c| c.id == update.chunk_id)
                .ok_or_else(|| {
                    TaskError::Validation(format!(
                        "Task {} has no chunk {}",
                        task_id, update.chunk_id
                    ))
                })?;
            chunk.status = update.status;
            if let Some(files) = update.files {
                chunk.files = files;
            }

            let derived = status::derive_status(&task.chunks, current_status, source_type);
            task.status = derived.status;
            task.review_reason = derived.review_reason;
            debug!(task_id, chunk_id = %update.chunk_id, status = %task.status, "chunk update applied");
            Ok(())
        })
    }

    /// Merge a partial execution-progress update. Absent fields keep their
    /// previous values; the overall value is monotonically clamped.
    pub fn apply_execution_progress(
        &self,
        task_id: &str,
        update: ExecutionProgress,
    ) -> Result<Task, TaskError> {
        self.mutate(task_id, |task| {
            task.execution_progress = crate::progress::merge(&task.execution_progress, &update);
            Ok(())
        })
    }

    /// Explicitly set a task's status. The review reason is only meaningful
    /// in human review and is cleared everywhere else.
    pub fn set_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        reason: Option<ReviewReason>,
    ) -> Result<Task, TaskError> {
        if reason.is_some() && new_status != TaskStatus::HumanReview {
            return Err(TaskError::Validation(
                "A review reason is only valid for human_review".into(),
            ));
        }
        self.mutate(task_id, |task| {
            task.status = new_status;
            task.review_reason = reason;
            Ok(())
        })
    }

    /// Record a review verdict. Rejections require feedback; approvals walk
    /// the task forward (ai_review -> human_review -> done), rejections send
    /// it back to the worker or to planning.
    pub fn submit_review(
        &self,
        task_id: &str,
        approved: bool,
        feedback: Option<&str>,
    ) -> Result<Task, TaskError> {
        if !approved && feedback.map(|f| f.trim().is_empty()).unwrap_or(true) {
            return Err(TaskError::Validation(
                "Rejecting a review requires feedback".into(),
            ));
        }
        self.mutate(task_id, |task| {
            match (task.status, approved) {
                (TaskStatus::AiReview, true) => {
                    task.status = TaskStatus::HumanReview;
                    task.review_reason = Some(ReviewReason::Completed);
                }
                (TaskStatus::AiReview, false) => {
                    task.status = TaskStatus::InProgress;
                    task.review_reason = None;
                }
                (TaskStatus::HumanReview, true) => {
                    task.status = TaskStatus::Done;
                    task.review_reason = None;
                }
                (TaskStatus::HumanReview, false) => {
                    task.status = TaskStatus::Backlog;
                    task.review_reason = None;
                }
                (other, _) => {
                    return Err(TaskError::Validation(format!(
                        "Task {} is not reviewable in status {}",
                        task_id, other
                    )));
                }
            }
            if let Some(feedback) = feedback {
                task.logs.push(format!(
                    "review {}: {}",
                    if approved { "approved" } else { "rejected" },
                    feedback
                ));
            }
            Ok(())
        })
    }

    /// Reset bookkeeping after a discarded workspace: the work is gone, so
    /// chunks return to pending and progress is cleared.
    pub fn reset_to_backlog(&self, task_id: &str) -> Result<Task, TaskError> {
        self.mutate(task_id, |task| {
            task.status = TaskStatus::Backlog;
            task.review_reason = None;
            for chunk in &mut task.chunks {
                chunk.status = ChunkStatus::Pending;
                chunk.files.clear();
            }
            task.execution_progress = ExecutionProgress::default();
            Ok(())
        })
    }

    /// Delete a task and its spec directory. Refused while an isolated
    /// workspace still exists for it.
    pub fn delete_task(&self, task_id: &str) -> Result<(), TaskError> {
        let task = self.get(task_id)?;
        if self.config.worktrees_dir().join(&task.id).exists() {
            return Err(TaskError::WorkspaceActive {
                id: task_id.to_string(),
            });
        }

        let spec_dir = self.config.spec_dir(&task.spec_id);
        if spec_dir.exists() {
            std::fs::remove_dir_all(&spec_dir).map_err(|source| TaskError::Storage {
                path: spec_dir,
                source,
            })?;
        }
        self.tasks
            .write()
            .expect("task map lock poisoned")
            .remove(task_id);
        let _ = self.events.send(TaskEvent::Deleted {
            task_id: task_id.to_string(),
        });
        info!(task_id, "task deleted");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Run a mutation under the write lock, stamp `updated_at`, persist, and
    /// broadcast the new snapshot.
    fn mutate<F>(&self, task_id: &str, f: F) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskError>,
    {
        let updated = {
            let mut tasks = self.tasks.write().expect("task map lock poisoned");
            let task = tasks.get_mut(task_id).ok_or_else(|| TaskError::NotFound {
                id: task_id.to_string(),
            })?;
            f(task)?;
            task.updated_at = chrono::Utc::now();
            task.clone()
        };
        self.persist(&updated)?;
        let _ = self.events.send(TaskEvent::Updated {
            task: updated.clone(),
        });
        Ok(updated)
    }

    fn persist(&self, task: &Task) -> Result<(), TaskError> {
        let spec_dir = self.config.spec_dir(&task.spec_id);
        std::fs::create_dir_all(&spec_dir).map_err(|source| TaskError::Storage {
            path: spec_dir.clone(),
            source,
        })?;
        let path = spec_dir.join("task.json");
        let content = serde_json::to_string_pretty(task)
            .map_err(|e| TaskError::Other(anyhow::anyhow!("Failed to serialize task: {}", e)))?;
        write_atomic(&path, &content).map_err(|source| TaskError::Storage { path, source })
    }
}

/// Write via a temp file and rename so a crash mid-write never leaves a
/// truncated task.json behind.
fn write_atomic(path: &PathBuf, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionPhase;

    fn open_store(dir: &std::path::Path) -> TaskStore {
        let config = Config::load(dir).unwrap();
        TaskStore::open(config).unwrap()
    }

    fn planned_task(store: &TaskStore, source: SourceType, n: usize) -> Task {
        let task = store.create_task("Test task", "desc", source).unwrap();
        let chunks = (0..n)
            .map(|i| Chunk::new(&format!("c{}", i), "chunk"))
            .collect();
        store.set_chunks(&task.id, chunks).unwrap()
    }

    #[test]
    fn test_create_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = open_store(dir.path());
            store
                .create_task("Persisted", "", SourceType::Manual)
                .unwrap()
                .id
        };
        let store = open_store(dir.path());
        let task = store.get(&id).unwrap();
        assert_eq!(task.title, "Persisted");
        assert_eq!(task.status, TaskStatus::Backlog);
    }

    #[test]
    fn test_single_writer_lock() {
        let dir = tempfile::tempdir().unwrap();
        let _store = open_store(dir.path());
        let config = Config::load(dir.path()).unwrap();
        match TaskStore::open(config) {
            Err(TaskError::LockHeld) => {}
            other => panic!("Expected LockHeld, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_chunk_update_derives_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Manual, 3);

        let updated = store
            .apply_chunk_update(
                &task.id,
                ChunkUpdate {
                    chunk_id: "c0".into(),
                    status: ChunkStatus::InProgress,
                    files: None,
                },
            )
            .unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert!(updated.review_reason.is_none());
    }

    #[test]
    fn test_all_chunks_completed_manual_reaches_human_review() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Manual, 2);

        for chunk_id in ["c0", "c1"] {
            store
                .apply_chunk_update(
                    &task.id,
                    ChunkUpdate {
                        chunk_id: chunk_id.into(),
                        status: ChunkStatus::Completed,
                        files: Some(vec!["src/lib.rs".into()]),
                    },
                )
                .unwrap();
        }
        let task = store.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::HumanReview);
        assert_eq!(task.review_reason, Some(ReviewReason::Completed));
    }

    #[test]
    fn test_failed_chunk_escalates() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Ideation, 3);

        store
            .apply_chunk_update(
                &task.id,
                ChunkUpdate {
                    chunk_id: "c1".into(),
                    status: ChunkStatus::Failed,
                    files: None,
                },
            )
            .unwrap();
        let task = store.get(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::HumanReview);
        assert_eq!(task.review_reason, Some(ReviewReason::Errors));
    }

    #[test]
    fn test_unknown_chunk_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Manual, 1);
        let err = store
            .apply_chunk_update(
                &task.id,
                ChunkUpdate {
                    chunk_id: "nope".into(),
                    status: ChunkStatus::Completed,
                    files: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[test]
    fn test_set_chunks_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Manual, 1);
        let err = store
            .set_chunks(&task.id, vec![Chunk::new("again", "x")])
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[test]
    fn test_progress_merge_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Manual, 1);

        store
            .apply_execution_progress(
                &task.id,
                ExecutionProgress {
                    phase: Some(ExecutionPhase::Coding),
                    overall_progress: Some(40),
                    message: Some("coding".into()),
                    ..ExecutionProgress::default()
                },
            )
            .unwrap();
        // Partial update: message absent, must be retained.
        let task = store
            .apply_execution_progress(
                &task.id,
                ExecutionProgress {
                    overall_progress: Some(50),
                    ..ExecutionProgress::default()
                },
            )
            .unwrap();
        assert_eq!(task.execution_progress.overall_progress, Some(50));
        assert_eq!(task.execution_progress.message.as_deref(), Some("coding"));
    }

    #[test]
    fn test_submit_review_rejection_requires_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Ideation, 1);
        store
            .apply_chunk_update(
                &task.id,
                ChunkUpdate {
                    chunk_id: "c0".into(),
                    status: ChunkStatus::Completed,
                    files: None,
                },
            )
            .unwrap();
        assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::AiReview);

        let err = store.submit_review(&task.id, false, None).unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        let err = store.submit_review(&task.id, false, Some("  ")).unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));

        let task = store
            .submit_review(&task.id, false, Some("tests missing"))
            .unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_submit_review_approval_chain() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Ideation, 1);
        store
            .apply_chunk_update(
                &task.id,
                ChunkUpdate {
                    chunk_id: "c0".into(),
                    status: ChunkStatus::Completed,
                    files: None,
                },
            )
            .unwrap();

        let task = store.submit_review(&task.id, true, None).unwrap();
        assert_eq!(task.status, TaskStatus::HumanReview);
        assert_eq!(task.review_reason, Some(ReviewReason::Completed));

        let task = store.submit_review(&task.id, true, None).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert!(task.review_reason.is_none());
    }

    #[test]
    fn test_set_status_reason_invariant() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = store.create_task("t", "", SourceType::Manual).unwrap();
        let err = store
            .set_status(&task.id, TaskStatus::Done, Some(ReviewReason::Errors))
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[test]
    fn test_reset_to_backlog_clears_chunks_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = planned_task(&store, SourceType::Manual, 2);
        store
            .apply_chunk_update(
                &task.id,
                ChunkUpdate {
                    chunk_id: "c0".into(),
                    status: ChunkStatus::Completed,
                    files: Some(vec!["a.rs".into()]),
                },
            )
            .unwrap();

        let task = store.reset_to_backlog(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Backlog);
        assert!(task.chunks.iter().all(|c| c.status == ChunkStatus::Pending));
        assert!(task.chunks.iter().all(|c| c.files.is_empty()));
        assert!(task.execution_progress.phase.is_none());
    }

    #[test]
    fn test_delete_task_refused_with_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = store.create_task("t", "", SourceType::Manual).unwrap();
        std::fs::create_dir_all(store.config().worktrees_dir().join(&task.id)).unwrap();

        let err = store.delete_task(&task.id).unwrap_err();
        assert!(matches!(err, TaskError::WorkspaceActive { .. }));
    }

    #[test]
    fn test_delete_task_removes_spec_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let task = store.create_task("t", "", SourceType::Manual).unwrap();
        let spec_dir = store.config().spec_dir(&task.spec_id);
        assert!(spec_dir.exists());

        store.delete_task(&task.id).unwrap();
        assert!(!spec_dir.exists());
        assert!(matches!(
            store.get(&task.id),
            Err(TaskError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_missing_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(matches!(
            store.delete_task("ghost"),
            Err(TaskError::NotFound { .. })
        ));
    }

    #[test]
    fn test_events_broadcast_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut rx = store.subscribe();
        let task = store.create_task("evt", "", SourceType::Manual).unwrap();
        match rx.try_recv().unwrap() {
            TaskEvent::Created { task: t } => assert_eq!(t.id, task.id),
            other => panic!("Expected Created, got {:?}", other),
        }
    }
}
