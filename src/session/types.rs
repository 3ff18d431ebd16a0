use crate::chunk::{ChunkPlan, ChunkResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Open)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SessionStatus::Open),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Server-side state of one chunked upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadSession {
    pub id: String,
    pub filename: String,
    pub directory: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: BTreeSet<u32>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        id: String,
        filename: String,
        directory: String,
        plan: &ChunkPlan,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename,
            directory,
            total_size: plan.total_size(),
            chunk_size: plan.chunk_size(),
            total_chunks: plan.chunk_count(),
            uploaded_chunks: BTreeSet::new(),
            status: SessionStatus::Open,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn plan(&self) -> ChunkResult<ChunkPlan> {
        ChunkPlan::new(self.total_size, self.chunk_size)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Open and not yet expired.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Open && !self.is_expired_at(now)
    }

    /// Indices still to be received. Only in-range indices are ever
    /// recorded, so this is a plain difference.
    pub fn missing_count(&self) -> usize {
        (self.total_chunks as usize).saturating_sub(self.uploaded_chunks.len())
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks.len() == self.total_chunks as usize
            && self.uploaded_chunks.iter().all(|&n| n < self.total_chunks)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        match self.plan() {
            Ok(plan) => plan.bytes_in(&self.uploaded_chunks),
            Err(_) => 0,
        }
    }

    pub fn mark_uploaded(&mut self, index: u32) -> bool {
        let inserted = self.uploaded_chunks.insert(index);
        self.updated_at = Utc::now();
        inserted
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn status_snapshot(&self) -> SessionStatusInfo {
        SessionStatusInfo {
            upload_id: self.id.clone(),
            filename: self.filename.clone(),
            directory: self.directory.clone(),
            total_size: self.total_size,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            uploaded_chunks: self.uploaded_chunks.iter().copied().collect(),
            uploaded_size: self.uploaded_bytes(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatusInfo {
    pub upload_id: String,
    pub filename: String,
    pub directory: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Ascending.
    pub uploaded_chunks: Vec<u32>,
    pub uploaded_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of `init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitOutcome {
    pub upload_id: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

/// What one cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_sessions: u64,
    pub retired_sessions: u64,
    /// Staging files removed because no open session owns them.
    pub orphaned_files: u64,
}
