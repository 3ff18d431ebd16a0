use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::storage::SavedFile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Files larger than this go through the chunked protocol (100 MiB).
pub const DEFAULT_CHUNKED_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Client-side upload tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadPolicy {
    pub chunk_size: u64,
    /// A file is uploaded in chunks when its size is strictly above this.
    pub chunked_threshold: u64,
    /// Attempts per chunk, first one included.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Resume records older than this are ignored.
    pub resume_ttl_secs: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunked_threshold: DEFAULT_CHUNKED_THRESHOLD,
            max_attempts: 3,
            retry_delay_ms: 1000,
            resume_ttl_secs: 48 * 3600,
        }
    }
}

impl UploadPolicy {
    pub fn use_chunked(&self, size: u64) -> bool {
        size > self.chunked_threshold
    }

    pub fn mode_for(&self, size: u64) -> UploadMode {
        if self.use_chunked(size) {
            UploadMode::Chunked
        } else {
            UploadMode::Single
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn resume_ttl(&self) -> Duration {
        Duration::from_secs(self.resume_ttl_secs)
    }
}

/// Client-local task identifier, unrelated to server session ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Single,
    Chunked,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Uploading)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Uploading => "uploading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Snapshot of one upload task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadTask {
    pub id: TaskId,
    pub filename: String,
    pub size: u64,
    pub destination: String,
    pub mode: UploadMode,
    pub session_id: Option<String>,
    pub status: TaskStatus,
    /// 0 to 100, never decreases while uploading.
    pub progress: u8,
    pub error: Option<String>,
    pub saved: Option<SavedFile>,
}

impl UploadTask {
    pub fn new(id: TaskId, filename: &str, size: u64, destination: &str, mode: UploadMode) -> Self {
        Self {
            id,
            filename: filename.to_string(),
            size,
            destination: destination.to_string(),
            mode,
            session_id: None,
            status: TaskStatus::Uploading,
            progress: 0,
            error: None,
            saved: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// User-facing message about a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub task_id: TaskId,
    pub level: NotificationLevel,
    pub message: String,
}

/// `round(completed / total * 100)`, 100 for an empty plan.
pub fn progress_percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (completed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
