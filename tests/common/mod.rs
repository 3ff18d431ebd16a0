#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chunkshare::client::{
    ByteProgress, LocalTransport, TransportError, TransportResult, UploadTransport,
};
use chunkshare::config::StorageConfig;
use chunkshare::events::EventHub;
use chunkshare::permission::{DirectoryConfig, Permission, PermissionChecker};
use chunkshare::session::{InitOutcome, SessionStatusInfo, SessionStore, UploadManager};
use chunkshare::storage::{SavedFile, StorageManager};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;

pub async fn create_manager(config: StorageConfig) -> (Arc<UploadManager>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageManager::new(temp_dir.path());
    let permissions = PermissionChecker::new(vec![
        DirectoryConfig::new("public", &[Permission::Read, Permission::Write]),
        DirectoryConfig::new("archive", &[Permission::Read]),
    ]);
    storage.ensure_directories(permissions.directories()).await.unwrap();

    let manager = UploadManager::new(
        SessionStore::new_in_memory().await.unwrap(),
        storage,
        permissions,
        config,
        EventHub::new(64),
    );
    (Arc::new(manager), temp_dir)
}

pub fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

/// Pause point inside `put_chunk` for one index.
pub struct Gate {
    pub index: u32,
    pub reached: Notify,
    pub release: Notify,
}

/// Wraps `LocalTransport`, records every call and injects failures.
pub struct RecordingTransport {
    inner: LocalTransport,
    puts: Mutex<Vec<u32>>,
    inits: Mutex<u32>,
    whole: Mutex<u32>,
    cancels: Mutex<Vec<String>>,
    /// index -> number of failures still to inject; `u32::MAX` fails forever.
    failures: Mutex<HashMap<u32, u32>>,
    /// Indices acknowledged without reaching the server.
    dropped: Mutex<HashSet<u32>>,
    gate: Mutex<Option<Arc<Gate>>>,
    status_gate: Mutex<Option<Arc<Gate>>>,
}

impl RecordingTransport {
    pub fn new(manager: Arc<UploadManager>) -> Self {
        Self {
            inner: LocalTransport::new(manager),
            puts: Mutex::new(Vec::new()),
            inits: Mutex::new(0),
            whole: Mutex::new(0),
            cancels: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            dropped: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
            status_gate: Mutex::new(None),
        }
    }

    pub fn fail_chunk(&self, index: u32, times: u32) {
        self.failures.lock().insert(index, times);
    }

    pub fn drop_chunk(&self, index: u32) {
        self.dropped.lock().insert(index);
    }

    pub fn heal(&self) {
        self.failures.lock().clear();
    }

    pub fn gate_on(&self, index: u32) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            index,
            reached: Notify::new(),
            release: Notify::new(),
        });
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Hold every `status` call until released.
    pub fn gate_status(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            index: 0,
            reached: Notify::new(),
            release: Notify::new(),
        });
        *self.status_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn puts(&self) -> Vec<u32> {
        self.puts.lock().clone()
    }

    pub fn init_calls(&self) -> u32 {
        *self.inits.lock()
    }

    pub fn whole_calls(&self) -> u32 {
        *self.whole.lock()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }
}

#[async_trait]
impl UploadTransport for RecordingTransport {
    async fn init(
        &self,
        filename: &str,
        directory: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> TransportResult<InitOutcome> {
        *self.inits.lock() += 1;
        self.inner.init(filename, directory, total_size, chunk_size).await
    }

    async fn put_chunk(&self, session_id: &str, index: u32, data: Bytes) -> TransportResult<()> {
        self.puts.lock().push(index);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate.filter(|g| g.index == index) {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        let fail = {
            let mut failures = self.failures.lock();
            match failures.get_mut(&index) {
                Some(0) | None => false,
                Some(&mut u32::MAX) => true,
                Some(left) => {
                    *left -= 1;
                    true
                }
            }
        };
        if fail {
            return Err(TransportError::Network(format!("injected failure on chunk {index}")));
        }

        if self.dropped.lock().contains(&index) {
            return Ok(());
        }

        self.inner.put_chunk(session_id, index, data).await
    }

    async fn status(&self, session_id: &str) -> TransportResult<SessionStatusInfo> {
        let gate = self.status_gate.lock().clone();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        self.inner.status(session_id).await
    }

    async fn complete(&self, session_id: &str) -> TransportResult<SavedFile> {
        self.inner.complete(session_id).await
    }

    async fn cancel(&self, session_id: &str) -> TransportResult<()> {
        self.cancels.lock().push(session_id.to_string());
        self.inner.cancel(session_id).await
    }

    async fn upload_whole(
        &self,
        filename: &str,
        directory: &str,
        data: Bytes,
        progress: ByteProgress,
    ) -> TransportResult<SavedFile> {
        *self.whole.lock() += 1;
        self.inner.upload_whole(filename, directory, data, progress).await
    }
}
