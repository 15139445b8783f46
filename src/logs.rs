//! Phase-scoped worker logs: append-only storage plus a subscribable change
//! stream.
//!
//! Each spec directory holds one `phase_logs.json` with the three fixed
//! phases (planning, coding, validation). The stream delivers full snapshots
//! on change, not deltas; subscribers diff against their last known state.
//! One watcher exists per subscribed spec id and is dropped on unsubscribe.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::{LogPhase, PhaseLogStatus, TaskLogEntry, TaskLogs};

const PHASE_LOGS_FILE: &str = "phase_logs.json";

// ── Storage ──────────────────────────────────────────────────────────

/// File-backed phase log storage, one JSON document per spec.
#[derive(Clone)]
pub struct PhaseLogStore {
    specs_dir: PathBuf,
}

impl PhaseLogStore {
    pub fn new(config: &Config) -> Self {
        Self {
            specs_dir: config.specs_dir(),
        }
    }

    fn path(&self, spec_id: &str) -> PathBuf {
        self.specs_dir.join(spec_id).join(PHASE_LOGS_FILE)
    }

    /// Load the current snapshot. `None` when the spec has no phase log data
    /// at all (task predates the model, or phases never started) — consumers
    /// fall back to the legacy flat log.
    pub fn load(&self, spec_id: &str) -> Result<Option<TaskLogs>> {
        let path = self.path(spec_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let logs: TaskLogs = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(logs))
    }

    /// Append an entry to a phase. A pending phase becomes active on its
    /// first entry.
    pub fn append_entry(
        &self,
        spec_id: &str,
        phase: LogPhase,
        entry: TaskLogEntry,
    ) -> Result<TaskLogs> {
        let mut logs = self.load(spec_id)?.unwrap_or_default();
        let phase_log = logs.phase_mut(phase);
        if phase_log.status == PhaseLogStatus::Pending {
            phase_log.status = PhaseLogStatus::Active;
        }
        phase_log.entries.push(entry);
        self.save(spec_id, &logs)?;
        Ok(logs)
    }

    /// Advance a phase's status. Phases progress pending -> active ->
    /// completed|failed and never regress; setting the same status is a
    /// no-op, anything backwards (or past a terminal state) is rejected.
    pub fn set_phase_status(
        &self,
        spec_id: &str,
        phase: LogPhase,
        status: PhaseLogStatus,
    ) -> Result<TaskLogs> {
        let mut logs = self.load(spec_id)?.unwrap_or_default();
        let phase_log = logs.phase_mut(phase);
        if status == phase_log.status {
            return Ok(logs);
        }
        if status.rank() <= phase_log.status.rank() {
            anyhow::bail!(
                "Phase {} cannot move from {} to {}",
                phase,
                phase_log.status.as_str(),
                status.as_str()
            );
        }
        phase_log.status = status;
        self.save(spec_id, &logs)?;
        Ok(logs)
    }

    fn save(&self, spec_id: &str, logs: &TaskLogs) -> Result<()> {
        let path = self.path(spec_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(logs)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ── View helpers ─────────────────────────────────────────────────────

/// The phase a viewer should auto-expand: whichever is currently active.
/// Recomputed on every snapshot.
pub fn auto_expand(logs: &TaskLogs) -> Option<LogPhase> {
    LogPhase::ALL
        .into_iter()
        .find(|p| logs.phase(*p).status == PhaseLogStatus::Active)
}

/// Fallback rendering of the legacy flat log array as pre-formatted text.
pub fn render_legacy(lines: &[String]) -> String {
    lines.join("\n")
}

// ── Streaming ────────────────────────────────────────────────────────

/// An active log subscription: the snapshot at subscribe time plus a channel
/// of full snapshots pushed on every change.
pub struct LogSubscription {
    pub initial: Option<TaskLogs>,
    pub updates: mpsc::UnboundedReceiver<TaskLogs>,
}

struct ActiveWatch {
    // Held to keep the filesystem watch alive; dropped on unsubscribe.
    _watcher: notify::RecommendedWatcher,
}

/// Per-spec pub/sub over the phase log files. At most one subscription per
/// spec id is active at a time; re-subscribing replaces the previous watcher.
pub struct LogStreamer {
    store: PhaseLogStore,
    watches: std::sync::Mutex<HashMap<String, ActiveWatch>>,
}

impl LogStreamer {
    pub fn new(store: PhaseLogStore) -> Self {
        Self {
            store,
            watches: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Load the current snapshot once and start pushing updates.
    pub fn subscribe(&self, spec_id: &str) -> Result<LogSubscription> {
        let spec_dir = self.store.specs_dir.join(spec_id);
        std::fs::create_dir_all(&spec_dir)
            .with_context(|| format!("Failed to create {}", spec_dir.display()))?;

        let initial = self.store.load(spec_id)?;
        let (tx, updates) = mpsc::unbounded_channel();

        let store = self.store.clone();
        let spec = spec_id.to_string();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                let Ok(event) = res else { return };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name().and_then(|n| n.to_str()) == Some(PHASE_LOGS_FILE))
                {
                    return;
                }
                match store.load(&spec) {
                    Ok(Some(logs)) => {
                        let _ = tx.send(logs);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(spec_id = %spec, err = %e, "failed to reload phase logs"),
                }
            })
            .context("Failed to create log watcher")?;
        watcher
            .watch(&spec_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", spec_dir.display()))?;

        let replaced = self
            .watches
            .lock()
            .expect("watch map lock poisoned")
            .insert(spec_id.to_string(), ActiveWatch { _watcher: watcher });
        if replaced.is_some() {
            debug!(spec_id, "replaced existing log subscription");
        }

        Ok(LogSubscription { initial, updates })
    }

    /// Drop the watcher for a spec. Paired with `subscribe` on teardown so
    /// watchers are never leaked.
    pub fn unsubscribe(&self, spec_id: &str) {
        self.watches
            .lock()
            .expect("watch map lock poisoned")
            .remove(spec_id);
    }

    pub fn active_subscriptions(&self) -> usize {
        self.watches.lock().expect("watch map lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogEntryKind;
    use chrono::Utc;
    use std::time::Duration;

    fn store(dir: &std::path::Path) -> PhaseLogStore {
        let config = Config::load(dir).unwrap();
        config.ensure_directories().unwrap();
        PhaseLogStore::new(&config)
    }

    fn entry(kind: LogEntryKind, content: &str) -> TaskLogEntry {
        TaskLogEntry {
            timestamp: Utc::now(),
            kind,
            tool_name: None,
            tool_input: None,
            content: Some(content.to_string()),
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load("ghost-spec").unwrap().is_none());
    }

    #[test]
    fn test_append_activates_phase_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let logs = store
            .append_entry("spec-1", LogPhase::Planning, entry(LogEntryKind::Info, "planning"))
            .unwrap();
        assert_eq!(logs.planning.status, PhaseLogStatus::Active);
        assert_eq!(logs.planning.entries.len(), 1);

        let reloaded = store.load("spec-1").unwrap().unwrap();
        assert_eq!(reloaded.planning.entries.len(), 1);
        assert_eq!(reloaded.coding.status, PhaseLogStatus::Pending);
    }

    #[test]
    fn test_phase_status_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .set_phase_status("spec-1", LogPhase::Planning, PhaseLogStatus::Active)
            .unwrap();
        store
            .set_phase_status("spec-1", LogPhase::Planning, PhaseLogStatus::Completed)
            .unwrap();

        // Regression is rejected.
        assert!(
            store
                .set_phase_status("spec-1", LogPhase::Planning, PhaseLogStatus::Active)
                .is_err()
        );
        // A terminal state cannot flip to the other terminal state.
        assert!(
            store
                .set_phase_status("spec-1", LogPhase::Planning, PhaseLogStatus::Failed)
                .is_err()
        );
        // Same status is a no-op.
        store
            .set_phase_status("spec-1", LogPhase::Planning, PhaseLogStatus::Completed)
            .unwrap();
    }

    #[test]
    fn test_auto_expand_tracks_active_phase() {
        let mut logs = TaskLogs::default();
        assert_eq!(auto_expand(&logs), None);

        logs.planning.status = PhaseLogStatus::Active;
        assert_eq!(auto_expand(&logs), Some(LogPhase::Planning));

        logs.planning.status = PhaseLogStatus::Completed;
        logs.coding.status = PhaseLogStatus::Active;
        assert_eq!(auto_expand(&logs), Some(LogPhase::Coding));

        logs.coding.status = PhaseLogStatus::Failed;
        assert_eq!(auto_expand(&logs), None);
    }

    #[test]
    fn test_render_legacy() {
        let lines = vec!["started".to_string(), "finished".to_string()];
        assert_eq!(render_legacy(&lines), "started\nfinished");
        assert_eq!(render_legacy(&[]), "");
    }

    #[tokio::test]
    async fn test_subscribe_delivers_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let streamer = LogStreamer::new(store.clone());

        let mut sub = streamer.subscribe("spec-1").unwrap();
        assert!(sub.initial.is_none());

        store
            .append_entry("spec-1", LogPhase::Coding, entry(LogEntryKind::ToolStart, "edit"))
            .unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(5), sub.updates.recv())
            .await
            .expect("no snapshot within timeout")
            .expect("stream closed");
        assert_eq!(snapshot.coding.status, PhaseLogStatus::Active);
        assert_eq!(snapshot.coding.entries.len(), 1);

        streamer.unsubscribe("spec-1");
        assert_eq!(streamer.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let streamer = LogStreamer::new(store);

        let _first = streamer.subscribe("spec-1").unwrap();
        let _second = streamer.subscribe("spec-1").unwrap();
        assert_eq!(streamer.active_subscriptions(), 1);
    }
}
