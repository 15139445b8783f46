//! Execution-worker collaborator.
//!
//! Foreman never generates code itself; it starts, stops, and health-checks
//! an external worker process per task. The `WorkerGateway` trait is the seam
//! consumed by the monitor and CLI; `ProcessWorker` is the default
//! process-backed implementation, tracking spawned children so they can be
//! stopped and liveness-checked.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::WorkerError;
use crate::model::Task;

/// Options forwarded to the worker on start.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Skip straight to execution, bypassing re-planning.
    pub resume: bool,
}

/// External execution worker, keyed by task id.
#[async_trait]
pub trait WorkerGateway: Send + Sync {
    async fn start_task(&self, task: &Task, options: StartOptions) -> Result<(), WorkerError>;

    async fn stop_task(&self, task_id: &str) -> Result<(), WorkerError>;

    /// Whether a live worker process is currently associated with the task.
    async fn check_running(&self, task_id: &str) -> Result<bool, WorkerError>;
}

/// Process-backed worker gateway. One child process per task, spawned from
/// the configured worker command with the task's spec directory as argument.
pub struct ProcessWorker {
    worker_cmd: String,
    worker_args: Vec<String>,
    specs_dir: PathBuf,
    /// Map from task id to the running child for stop/liveness.
    children: Arc<Mutex<HashMap<String, Child>>>,
}

impl ProcessWorker {
    pub fn new(config: &Config) -> Self {
        Self {
            worker_cmd: config.worker_cmd.clone(),
            worker_args: config.worker_args.clone(),
            specs_dir: config.specs_dir(),
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stop every tracked worker on shutdown.
    pub async fn shutdown(&self) {
        let mut children = self.children.lock().await;
        for (task_id, mut child) in children.drain() {
            if let Err(e) = child.kill().await {
                warn!(task_id, err = %e, "failed to kill worker during shutdown");
            }
        }
    }
}

#[async_trait]
impl WorkerGateway for ProcessWorker {
    async fn start_task(&self, task: &Task, options: StartOptions) -> Result<(), WorkerError> {
        if self.worker_cmd.trim().is_empty() {
            return Err(WorkerError::NotConfigured);
        }

        let mut children = self.children.lock().await;
        // A still-running child means the task is already being worked on;
        // starting a second worker would double-apply chunk updates.
        if let Some(child) = children.get_mut(&task.id)
            && child
                .try_wait()
                .map_err(|e| WorkerError::Liveness(e.to_string()))?
                .is_none()
        {
            return Ok(());
        }

        let mut cmd = tokio::process::Command::new(&self.worker_cmd);
        cmd.args(&self.worker_args)
            .arg("--spec-dir")
            .arg(self.specs_dir.join(&task.spec_id))
            .arg("--task-id")
            .arg(&task.id)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if options.resume {
            cmd.arg("--resume");
        }

        let child = cmd.spawn().map_err(WorkerError::SpawnFailed)?;
        info!(task_id = %task.id, resume = options.resume, "worker started");
        children.insert(task.id.clone(), child);
        Ok(())
    }

    async fn stop_task(&self, task_id: &str) -> Result<(), WorkerError> {
        let mut children = self.children.lock().await;
        if let Some(mut child) = children.remove(task_id) {
            child.kill().await.map_err(|e| WorkerError::StopFailed {
                task_id: task_id.to_string(),
                message: e.to_string(),
            })?;
            info!(task_id, "worker stopped");
        }
        Ok(())
    }

    async fn check_running(&self, task_id: &str) -> Result<bool, WorkerError> {
        let mut children = self.children.lock().await;
        match children.get_mut(task_id) {
            Some(child) => {
                let exited = child
                    .try_wait()
                    .map_err(|e| WorkerError::Liveness(e.to_string()))?
                    .is_some();
                if exited {
                    children.remove(task_id);
                }
                Ok(!exited)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceType;

    fn sleeper_worker(dir: &std::path::Path) -> ProcessWorker {
        let mut config = Config::load(dir).unwrap();
        config.worker_cmd = "sleep".to_string();
        config.worker_args = vec!["30".to_string()];
        ProcessWorker::new(&config)
    }

    #[tokio::test]
    async fn test_start_check_stop() {
        let dir = tempfile::tempdir().unwrap();
        let worker = sleeper_worker(dir.path());
        let task = Task::new("t", "", SourceType::Manual);

        assert!(!worker.check_running(&task.id).await.unwrap());
        worker
            .start_task(&task, StartOptions::default())
            .await
            .unwrap();
        assert!(worker.check_running(&task.id).await.unwrap());

        worker.stop_task(&task.id).await.unwrap();
        assert!(!worker.check_running(&task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let worker = sleeper_worker(dir.path());
        let task = Task::new("t", "", SourceType::Manual);

        worker
            .start_task(&task, StartOptions::default())
            .await
            .unwrap();
        // Second start must not spawn a second child.
        worker
            .start_task(&task, StartOptions::default())
            .await
            .unwrap();
        assert_eq!(worker.children.lock().await.len(), 1);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load(dir.path()).unwrap();
        config.worker_cmd = "/nonexistent/worker-binary".to_string();
        let worker = ProcessWorker::new(&config);
        let task = Task::new("t", "", SourceType::Manual);

        let err = worker
            .start_task(&task, StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let worker = sleeper_worker(dir.path());
        worker.stop_task("ghost").await.unwrap();
    }
}
