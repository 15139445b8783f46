use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task, derived from its chunk states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    AiReview,
    HumanReview,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::AiReview => "ai_review",
            Self::HumanReview => "human_review",
            Self::Done => "done",
        }
    }

    /// Review states are the only states in which a task may own a workspace.
    pub fn is_review(&self) -> bool {
        matches!(self, Self::AiReview | Self::HumanReview)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "in_progress" => Ok(Self::InProgress),
            "ai_review" => Ok(Self::AiReview),
            "human_review" => Ok(Self::HumanReview),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Why a task landed in human review. Only defined while
/// `status = human_review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    Completed,
    Errors,
    QaIssues,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Errors => "errors",
            Self::QaIssues => "qa_issues",
        }
    }
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "errors" => Ok(Self::Errors),
            "qa_issues" => Ok(Self::QaIssues),
            _ => Err(format!("Invalid review reason: {}", s)),
        }
    }
}

/// Status of an individual chunk within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid chunk status: {}", s)),
        }
    }
}

/// How the task entered the system. Manual tasks skip automated review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    Ideation,
    Roadmap,
}

impl Default for SourceType {
    fn default() -> Self {
        Self::Manual
    }
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ideation => "ideation",
            Self::Roadmap => "roadmap",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "ideation" => Ok(Self::Ideation),
            "roadmap" => Ok(Self::Roadmap),
            _ => Err(format!("Invalid source type: {}", s)),
        }
    }
}

/// Phase the execution worker reports itself to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Idle,
    Planning,
    Coding,
    QaReview,
    QaFixing,
    Complete,
    Failed,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::QaReview => "qa_review",
            Self::QaFixing => "qa_fixing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "planning" => Ok(Self::Planning),
            "coding" => Ok(Self::Coding),
            "qa_review" => Ok(Self::QaReview),
            "qa_fixing" => Ok(Self::QaFixing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution phase: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// The smallest unit of planned work within a task. Chunks are created once
/// during planning; only `status` and `files` mutate afterwards. They are
/// never reordered or deleted individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub description: String,
    pub status: ChunkStatus,
    /// Paths the worker touched while executing this chunk.
    #[serde(default)]
    pub files: Vec<String>,
}

impl Chunk {
    pub fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            status: ChunkStatus::Pending,
            files: Vec::new(),
        }
    }
}

/// Progress snapshot reported by the execution worker. Updates are partial:
/// absent fields keep their previous values (see `progress::merge`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionProgress {
    #[serde(default)]
    pub phase: Option<ExecutionPhase>,
    /// Progress within the current phase, 0-100.
    #[serde(default)]
    pub phase_progress: Option<u8>,
    /// Weighted overall progress, 0-100. Monotonically non-decreasing while
    /// the phase is active and not `failed`.
    #[serde(default)]
    pub overall_progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
    /// Id of the chunk the worker is currently executing.
    #[serde(default)]
    pub current_chunk: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub complexity: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
    pub source_type: SourceType,
}

/// A tracked work item. Owned exclusively by the `TaskStore`; everything else
/// holds read-only snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Stable identifier for the task's specification artifacts. Keys the
    /// spec directory, plan storage, and log subscriptions.
    pub spec_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub review_reason: Option<ReviewReason>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub execution_progress: ExecutionProgress,
    pub metadata: TaskMetadata,
    /// Legacy flat log lines, rendered only when no phase log data exists.
    #[serde(default)]
    pub logs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(title: &str, description: &str, source_type: SourceType) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let spec_id = format!("{}-{}", slugify(title, 40), &id[..8]);
        let now = Utc::now();
        Self {
            id,
            spec_id,
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Backlog,
            review_reason: None,
            chunks: Vec::new(),
            execution_progress: ExecutionProgress::default(),
            metadata: TaskMetadata {
                source_type,
                ..TaskMetadata::default()
            },
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == chunk_id)
    }

    pub fn completed_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Completed)
            .count()
    }
}

/// Convert a title to a filesystem- and branch-safe slug, limited to
/// `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.chars().count() > max_len {
        slug.chars()
            .take(max_len)
            .collect::<String>()
            .trim_end_matches('-')
            .to_string()
    } else {
        slug
    }
}

// ── Workspace view types ─────────────────────────────────────────────

/// Descriptor of a task's isolated review workspace. Read-only view; exists
/// only while the task is in a review state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeStatus {
    pub exists: bool,
    pub branch: String,
    pub base_branch: String,
    pub files_changed: usize,
    pub commit_count: usize,
    pub additions: usize,
    pub deletions: usize,
    pub worktree_path: Option<PathBuf>,
}

impl WorktreeStatus {
    pub fn absent() -> Self {
        Self {
            exists: false,
            branch: String::new(),
            base_branch: String::new(),
            files_changed: 0,
            commit_count: 0,
            additions: 0,
            deletions: 0,
            worktree_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub status: FileStatus,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeDiff {
    pub summary: String,
    pub files: Vec<FileDiff>,
}

// ── Phase logs ───────────────────────────────────────────────────────

/// The three fixed phases a worker's activity log is grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPhase {
    Planning,
    Coding,
    Validation,
}

impl LogPhase {
    pub const ALL: [LogPhase; 3] = [Self::Planning, Self::Coding, Self::Validation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Coding => "coding",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for LogPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progression of a log phase: pending -> active -> completed|failed,
/// never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseLogStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl PhaseLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Rank used to enforce forward-only progression.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryKind {
    ToolStart,
    ToolEnd,
    Error,
    Success,
    Info,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogEntryKind,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPhaseLog {
    pub status: PhaseLogStatus,
    #[serde(default)]
    pub entries: Vec<TaskLogEntry>,
}

impl Default for TaskPhaseLog {
    fn default() -> Self {
        Self {
            status: PhaseLogStatus::Pending,
            entries: Vec::new(),
        }
    }
}

/// Full phase-scoped log snapshot for one spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskLogs {
    #[serde(default)]
    pub planning: TaskPhaseLog,
    #[serde(default)]
    pub coding: TaskPhaseLog,
    #[serde(default)]
    pub validation: TaskPhaseLog,
}

impl TaskLogs {
    pub fn phase(&self, phase: LogPhase) -> &TaskPhaseLog {
        match phase {
            LogPhase::Planning => &self.planning,
            LogPhase::Coding => &self.coding,
            LogPhase::Validation => &self.validation,
        }
    }

    pub fn phase_mut(&mut self, phase: LogPhase) -> &mut TaskPhaseLog {
        match phase {
            LogPhase::Planning => &mut self.planning,
            LogPhase::Coding => &mut self.coding,
            LogPhase::Validation => &mut self.validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_roundtrip() {
        for s in &["backlog", "in_progress", "ai_review", "human_review", "done"] {
            let parsed: TaskStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_chunk_status_roundtrip() {
        for s in &["pending", "in_progress", "completed", "failed"] {
            let parsed: ChunkStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<ChunkStatus>().is_err());
    }

    #[test]
    fn test_review_reason_roundtrip() {
        for s in &["completed", "errors", "qa_issues"] {
            let parsed: ReviewReason = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<ReviewReason>().is_err());
    }

    #[test]
    fn test_execution_phase_roundtrip() {
        for s in &[
            "idle",
            "planning",
            "coding",
            "qa_review",
            "qa_fixing",
            "complete",
            "failed",
        ] {
            let parsed: ExecutionPhase = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<ExecutionPhase>().is_err());
    }

    #[test]
    fn test_serde_produces_lowercase_strings() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::HumanReview).unwrap(),
            "\"human_review\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionPhase::QaReview).unwrap(),
            "\"qa_review\""
        );
        assert_eq!(
            serde_json::to_string(&ReviewReason::QaIssues).unwrap(),
            "\"qa_issues\""
        );
        assert_eq!(
            serde_json::to_string(&LogEntryKind::ToolStart).unwrap(),
            "\"tool_start\""
        );
    }

    #[test]
    fn test_task_new_defaults() {
        let task = Task::new("Fix login flow", "The session cookie expires", SourceType::Manual);
        assert_eq!(task.status, TaskStatus::Backlog);
        assert!(task.review_reason.is_none());
        assert!(task.chunks.is_empty());
        assert!(task.spec_id.starts_with("fix-login-flow-"));
        assert_eq!(task.metadata.source_type, SourceType::Manual);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix: the Login Flow!", 40), "fix-the-login-flow");
        assert_eq!(slugify("A very long title that keeps going on", 10), "a-very-lon");
    }

    #[test]
    fn test_task_serde_roundtrip() {
        let mut task = Task::new("Add search", "", SourceType::Ideation);
        task.chunks.push(Chunk::new("c1", "Build the index"));
        task.chunks[0].status = ChunkStatus::InProgress;
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.chunks.len(), 1);
        assert_eq!(back.chunks[0].status, ChunkStatus::InProgress);
    }

    #[test]
    fn test_phase_log_status_rank_forward_only() {
        assert!(PhaseLogStatus::Pending.rank() < PhaseLogStatus::Active.rank());
        assert!(PhaseLogStatus::Active.rank() < PhaseLogStatus::Completed.rank());
        assert_eq!(
            PhaseLogStatus::Completed.rank(),
            PhaseLogStatus::Failed.rank()
        );
    }

    #[test]
    fn test_task_logs_phase_accessors() {
        let mut logs = TaskLogs::default();
        logs.phase_mut(LogPhase::Coding).status = PhaseLogStatus::Active;
        assert_eq!(logs.phase(LogPhase::Coding).status, PhaseLogStatus::Active);
        assert_eq!(
            logs.phase(LogPhase::Planning).status,
            PhaseLogStatus::Pending
        );
    }
}
