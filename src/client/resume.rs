//! Resume records and the locator that decides between resuming and a fresh
//! session.
//!
//! A record maps `(filename, size, destination)` to the server session that
//! last carried that file. It is written after a successful init, removed on
//! completion and on cancel, and left in place when an upload fails so the
//! next attempt can continue where the server left off.

use crate::chunk::ChunkPlan;
use crate::client::error::ClientResult;
use crate::client::transport::UploadTransport;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResumeKey {
    pub filename: String,
    pub size: u64,
    pub destination: String,
}

impl ResumeKey {
    pub fn new(filename: &str, size: u64, destination: &str) -> Self {
        Self {
            filename: filename.to_string(),
            size,
            destination: destination.to_string(),
        }
    }

    /// Flat form used as a JSON object key.
    pub fn storage_key(&self) -> String {
        format!("{}|{}|{}", self.destination, self.size, self.filename)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub session_id: String,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl ResumeRecord {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration, now_millis: i64) -> bool {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_sub(self.created_at) < ttl_millis
    }
}

/// Last-writer-wins storage of resume records.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn get(&self, key: &ResumeKey) -> ClientResult<Option<ResumeRecord>>;
    async fn put(&self, key: &ResumeKey, record: ResumeRecord) -> ClientResult<()>;
    async fn remove(&self, key: &ResumeKey) -> ClientResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    records: DashMap<ResumeKey, ResumeRecord>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ResumeStore for MemoryResumeStore {
    async fn get(&self, key: &ResumeKey) -> ClientResult<Option<ResumeRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &ResumeKey, record: ResumeRecord) -> ClientResult<()> {
        self.records.insert(key.clone(), record);
        Ok(())
    }

    async fn remove(&self, key: &ResumeKey) -> ClientResult<()> {
        self.records.remove(key);
        Ok(())
    }
}

/// Records kept in one JSON object on disk, keyed by `ResumeKey::storage_key`.
pub struct JsonFileResumeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> ClientResult<BTreeMap<String, ResumeRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) if data.is_empty() => Ok(BTreeMap::new()),
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(records) => Ok(records),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Corrupt resume file, starting empty");
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, records: &BTreeMap<String, ResumeRecord>) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ResumeStore for JsonFileResumeStore {
    async fn get(&self, key: &ResumeKey) -> ClientResult<Option<ResumeRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(&key.storage_key()))
    }

    async fn put(&self, key: &ResumeKey, record: ResumeRecord) -> ClientResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        records.insert(key.storage_key(), record);
        self.write_all(&records).await
    }

    async fn remove(&self, key: &ResumeKey) -> ClientResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        if records.remove(&key.storage_key()).is_some() {
            self.write_all(&records).await?;
        }
        Ok(())
    }
}

/// Outcome of looking for a resumable session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeDecision {
    Resume {
        session_id: String,
        uploaded: BTreeSet<u32>,
    },
    Fresh,
}

pub struct ResumeLocator {
    transport: Arc<dyn UploadTransport>,
    store: Arc<dyn ResumeStore>,
    ttl: Duration,
}

impl ResumeLocator {
    pub fn new(transport: Arc<dyn UploadTransport>, store: Arc<dyn ResumeStore>, ttl: Duration) -> Self {
        Self {
            transport,
            store,
            ttl,
        }
    }

    /// Find a live server session for `key` whose layout matches `plan`.
    /// Anything unusable is discarded and reported as `Fresh`.
    pub async fn locate(&self, key: &ResumeKey, plan: &ChunkPlan) -> ResumeDecision {
        let record = match self.store.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return ResumeDecision::Fresh,
            Err(e) => {
                tracing::warn!(filename = %key.filename, error = %e, "Resume store unreadable");
                return ResumeDecision::Fresh;
            }
        };

        if !record.is_fresh(self.ttl, Utc::now().timestamp_millis()) {
            self.discard(key, &record, "record expired").await;
            return ResumeDecision::Fresh;
        }

        let status = match self.transport.status(&record.session_id).await {
            Ok(status) => status,
            Err(e) => {
                self.discard(key, &record, &e.to_string()).await;
                return ResumeDecision::Fresh;
            }
        };

        if status.total_size != plan.total_size() || status.chunk_size != plan.chunk_size() {
            self.discard(key, &record, "server layout differs from local plan")
                .await;
            return ResumeDecision::Fresh;
        }

        let uploaded: BTreeSet<u32> = status
            .uploaded_chunks
            .into_iter()
            .filter(|&i| plan.contains(i))
            .collect();

        tracing::info!(
            upload_id = %record.session_id,
            uploaded = uploaded.len(),
            total_chunks = plan.chunk_count(),
            "Resuming upload"
        );

        ResumeDecision::Resume {
            session_id: record.session_id,
            uploaded,
        }
    }

    async fn discard(&self, key: &ResumeKey, record: &ResumeRecord, reason: &str) {
        tracing::warn!(
            upload_id = %record.session_id,
            filename = %key.filename,
            reason,
            "Discarding resume record, starting a new session"
        );
        if let Err(e) = self.store.remove(key).await {
            tracing::warn!(error = %e, "Failed to remove resume record");
        }
    }
}
