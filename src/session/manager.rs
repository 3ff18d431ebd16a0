//! Upload session service
//!
//! Owns the session store, the staging files and the destination checks, and
//! implements every server-side upload operation on top of them. All writes to
//! one session are serialized by a per-session async lock; different sessions
//! proceed in parallel.

use crate::chunk::ChunkPlan;
use crate::config::{ServerConfig, StorageConfig};
use crate::events::{EventHub, ServerEvent};
use crate::metrics::recorder;
use crate::permission::{Permission, PermissionChecker};
use crate::session::error::{SessionError, SessionResult};
use crate::session::store::SessionStore;
use crate::session::types::{
    CleanupReport, InitOutcome, SessionStatus, SessionStatusInfo, UploadSession,
};
use crate::storage::{SavedFile, StorageManager};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct UploadManager {
    store: SessionStore,
    storage: StorageManager,
    permissions: PermissionChecker,
    config: StorageConfig,
    events: EventHub,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Makes the open-session limit check and the insert one step.
    init_lock: Mutex<()>,
}

impl UploadManager {
    pub fn new(
        store: SessionStore,
        storage: StorageManager,
        permissions: PermissionChecker,
        config: StorageConfig,
        events: EventHub,
    ) -> Self {
        Self {
            store,
            storage,
            permissions,
            config,
            events,
            locks: DashMap::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Open the database, create the configured directories and build the
    /// manager.
    pub async fn from_config(config: &ServerConfig, events: EventHub) -> SessionResult<Self> {
        let store = SessionStore::new(&config.database_url).await?;
        let storage = StorageManager::new(&config.storage.root);
        storage.ensure_directories(&config.directories).await?;

        let manager = Self::new(
            store,
            storage,
            PermissionChecker::new(config.directories.clone()),
            config.storage.clone(),
            events,
        );
        manager.sync_metrics().await?;
        Ok(manager)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub async fn sync_metrics(&self) -> SessionResult<()> {
        recorder::set_open_sessions(self.store.count_open(Utc::now()).await?);
        Ok(())
    }

    /// Open a chunked upload session and create its staging file.
    pub async fn init(
        &self,
        filename: &str,
        directory: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> SessionResult<InitOutcome> {
        validate_filename(filename)?;
        let directory = self.permissions.check(directory, Permission::Write)?;

        if total_size == 0 {
            return Err(SessionError::InvalidSize("file size must be > 0".into()));
        }
        if chunk_size == 0 || chunk_size > self.config.max_chunk_size {
            return Err(SessionError::InvalidSize(format!(
                "chunk size must be between 1 and {} bytes",
                self.config.max_chunk_size
            )));
        }
        if total_size > self.config.max_chunked_file_size {
            return Err(SessionError::FileTooLarge {
                size: total_size,
                max: self.config.max_chunked_file_size,
            });
        }

        let plan = ChunkPlan::new(total_size, chunk_size)
            .map_err(|e| SessionError::InvalidSize(e.to_string()))?;
        if plan.chunk_count() > self.config.max_chunks_per_upload {
            return Err(SessionError::InvalidSize(format!(
                "{} chunks exceeds the limit of {}, use a larger chunk size",
                plan.chunk_count(),
                self.config.max_chunks_per_upload
            )));
        }

        let _init = self.init_lock.lock().await;

        let open = self.store.count_open(Utc::now()).await?;
        if open >= self.config.max_open_sessions as u64 {
            tracing::warn!(open, limit = self.config.max_open_sessions, "Upload session limit reached");
            return Err(SessionError::TooManyUploads(self.config.max_open_sessions));
        }

        let ttl = chrono::Duration::from_std(self.config.session_ttl())
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        let session = UploadSession::new(
            Uuid::new_v4().to_string(),
            filename.to_string(),
            directory,
            &plan,
            ttl,
        );

        let staging = self.staging_path(&session);
        self.storage.create_staging(&staging).await?;
        if let Err(e) = self.store.insert(&session).await {
            self.storage.discard(&staging).await?;
            return Err(e);
        }

        recorder::record_session_opened();
        tracing::info!(
            upload_id = %session.id,
            filename = %session.filename,
            directory = %session.directory,
            total_size,
            chunk_size,
            total_chunks = session.total_chunks,
            "Chunked upload initialized"
        );

        Ok(InitOutcome {
            upload_id: session.id,
            total_chunks: session.total_chunks,
            chunk_size,
        })
    }

    /// Persist chunk `index`. Sending an index again rewrites the same range.
    pub async fn put_chunk(&self, id: &str, index: u32, data: &[u8]) -> SessionResult<()> {
        let lock = self.session_lock(id);
        let result = {
            let _guard = lock.lock().await;
            self.put_chunk_locked(id, index, data).await
        };
        drop(lock);
        self.release_lock(id);
        result
    }

    async fn put_chunk_locked(&self, id: &str, index: u32, data: &[u8]) -> SessionResult<()> {
        let mut session = self.load_active(id).await?;
        let plan = session
            .plan()
            .map_err(|e| SessionError::SerializationError(e.to_string()))?;

        let range = plan.range(index).ok_or(SessionError::InvalidChunkIndex {
            index,
            total_chunks: session.total_chunks,
        })?;
        if data.len() as u64 != range.len() {
            return Err(SessionError::ChunkSizeMismatch {
                index,
                expected: range.len(),
                actual: data.len() as u64,
            });
        }

        let timer = recorder::ChunkTimer::start();
        self.storage
            .write_at(&self.staging_path(&session), range.start, data)
            .await?;
        timer.stop();

        let first_time = session.mark_uploaded(index);
        self.store.save(&session).await?;

        recorder::record_chunk_received(data.len());
        tracing::debug!(
            upload_id = %id,
            chunk_index = index,
            bytes = data.len(),
            uploaded = session.uploaded_chunks.len(),
            total_chunks = session.total_chunks,
            rewrite = !first_time,
            "Chunk stored"
        );
        Ok(())
    }

    pub async fn status(&self, id: &str) -> SessionResult<SessionStatusInfo> {
        Ok(self.load_active(id).await?.status_snapshot())
    }

    /// Move the assembled file into place once every chunk has arrived.
    pub async fn complete(&self, id: &str) -> SessionResult<SavedFile> {
        let lock = self.session_lock(id);
        let result = {
            let _guard = lock.lock().await;
            self.complete_locked(id).await
        };
        drop(lock);
        self.release_lock(id);
        result
    }

    async fn complete_locked(&self, id: &str) -> SessionResult<SavedFile> {
        let mut session = self.load_active(id).await?;

        if !session.is_complete() {
            let missing = session.missing_count();
            tracing::warn!(upload_id = %id, missing, "Completion requested with missing chunks");
            return Err(SessionError::IncompleteUpload {
                missing,
                total_chunks: session.total_chunks,
            });
        }

        let saved = self
            .storage
            .finalize(
                &self.staging_path(&session),
                &session.directory,
                &session.filename,
                session.total_size,
            )
            .await?;

        session.set_status(SessionStatus::Completed);
        self.store.save(&session).await?;

        recorder::record_upload_completed("chunked");
        tracing::info!(
            upload_id = %id,
            path = %saved.path,
            size = saved.size,
            checksum = %saved.checksum,
            "Chunked upload completed"
        );
        self.events.publish(ServerEvent::file_uploaded(
            &session.directory,
            &saved.filename,
            saved.size,
        ));

        Ok(saved)
    }

    /// Abandon a session and delete its staging file. Cancelling twice is fine.
    pub async fn cancel(&self, id: &str) -> SessionResult<()> {
        let lock = self.session_lock(id);
        let result = {
            let _guard = lock.lock().await;
            self.cancel_locked(id).await
        };
        drop(lock);
        self.release_lock(id);
        result
    }

    async fn cancel_locked(&self, id: &str) -> SessionResult<()> {
        let mut session = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;

        match session.status {
            SessionStatus::Cancelled => return Ok(()),
            SessionStatus::Completed => return Err(SessionError::UnknownSession(id.to_string())),
            SessionStatus::Open => {}
        }

        self.storage.discard(&self.staging_path(&session)).await?;
        session.set_status(SessionStatus::Cancelled);
        self.store.save(&session).await?;

        recorder::record_upload_cancelled();
        tracing::info!(
            upload_id = %id,
            uploaded = session.uploaded_chunks.len(),
            total_chunks = session.total_chunks,
            "Chunked upload cancelled"
        );
        Ok(())
    }

    /// Single-shot upload of a whole file.
    pub async fn save_whole(
        &self,
        filename: &str,
        directory: &str,
        data: &[u8],
    ) -> SessionResult<SavedFile> {
        validate_filename(filename)?;
        let directory = self.permissions.check(directory, Permission::Write)?;

        let size = data.len() as u64;
        if size > self.config.max_file_size {
            return Err(SessionError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        let saved = self.storage.save_bytes(&directory, filename, data).await?;

        recorder::record_single_upload(data.len());
        tracing::info!(path = %saved.path, size = saved.size, "File uploaded");
        self.events
            .publish(ServerEvent::file_uploaded(&directory, &saved.filename, saved.size));

        Ok(saved)
    }

    /// Reap open sessions past their expiry and terminal rows past retention.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> SessionResult<CleanupReport> {
        let mut report = CleanupReport::default();

        for candidate in self.store.list_expired(now).await? {
            let lock = self.session_lock(&candidate.id);
            {
                let _guard = lock.lock().await;
                // A request may have finished the session while we waited.
                let still_expired = self
                    .store
                    .load(&candidate.id)
                    .await?
                    .filter(|s| s.status == SessionStatus::Open && s.is_expired_at(now));

                if let Some(session) = still_expired {
                    if let Err(e) = self.storage.discard(&self.staging_path(&session)).await {
                        tracing::warn!(upload_id = %session.id, error = %e, "Failed to remove staging file");
                    }
                    self.store.delete(&session.id).await?;
                    report.expired_sessions += 1;
                    tracing::info!(upload_id = %session.id, "Expired upload session removed");
                }
            }
            drop(lock);
            self.release_lock(&candidate.id);
        }

        let retention = chrono::Duration::from_std(self.config.terminal_retention())
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        report.retired_sessions = self.store.delete_terminal_before(now - retention).await?;
        report.orphaned_files = self.sweep_orphaned_staging().await?;

        recorder::record_sessions_expired(report.expired_sessions);
        if report.expired_sessions > 0 || report.retired_sessions > 0 || report.orphaned_files > 0 {
            tracing::info!(
                expired = report.expired_sessions,
                retired = report.retired_sessions,
                orphaned = report.orphaned_files,
                "Session cleanup finished"
            );
        }

        Ok(report)
    }

    /// Delete staging files whose upload id has no open session, e.g. left
    /// behind by a crash between staging and insert or a reset database.
    async fn sweep_orphaned_staging(&self) -> SessionResult<u64> {
        let candidates = self.storage.list_staging(self.permissions.directories()).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        // init creates the staging file and inserts the row under this lock.
        let _init = self.init_lock.lock().await;
        let mut removed = 0;

        for (id, path) in candidates {
            let owned = self
                .store
                .load(&id)
                .await?
                .is_some_and(|s| s.status == SessionStatus::Open);
            if owned {
                continue;
            }

            match self.storage.discard(&path).await {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(upload_id = %id, path = %path.display(), "Orphaned staging file removed");
                }
                Err(e) => {
                    tracing::warn!(upload_id = %id, path = %path.display(), error = %e, "Failed to remove orphaned staging file");
                }
            }
        }

        Ok(removed)
    }

    /// Run `cleanup_expired` every `interval` until `shutdown` fires.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Session cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.cleanup_expired(Utc::now()).await {
                            tracing::error!(error = %e, "Session cleanup failed");
                        }
                    }
                }
            }
        })
    }

    /// Load a session that may still receive requests.
    async fn load_active(&self, id: &str) -> SessionResult<UploadSession> {
        self.store
            .load(id)
            .await?
            .filter(|s| s.is_active_at(Utc::now()))
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    fn staging_path(&self, session: &UploadSession) -> PathBuf {
        self.storage
            .staging_path(&session.directory, &session.id, &session.filename)
    }

    fn session_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds it.
    fn release_lock(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// A filename must name a file, not a path.
fn validate_filename(filename: &str) -> SessionResult<()> {
    let trimmed = filename.trim();
    let invalid = |reason: &str| SessionError::InvalidDestination(format!("{reason}: {filename:?}"));

    if trimmed.is_empty() {
        return Err(invalid("empty filename"));
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(invalid("absolute filename"));
    }
    if trimmed.split(['/', '\\']).any(|part| part == "..") {
        return Err(invalid("parent reference in filename"));
    }
    if trimmed.contains('\0') {
        return Err(invalid("NUL in filename"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::DirectoryConfig;
    use tempfile::TempDir;

    async fn create_test_manager(config: StorageConfig) -> (UploadManager, TempDir) {
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
            EventHub::new(16),
        );
        (manager, temp_dir)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_chunked_upload_in_any_order() {
        let (manager, temp_dir) = create_test_manager(StorageConfig::default()).await;
        let mut events = manager.events().subscribe();
        let data = sample(25);

        let init = manager.init("data.bin", "public", 25, 10).await.unwrap();
        assert_eq!(init.total_chunks, 3);

        for index in [2u32, 0, 1] {
            let start = index as usize * 10;
            let end = (start + 10).min(data.len());
            manager.put_chunk(&init.upload_id, index, &data[start..end]).await.unwrap();
        }

        let status = manager.status(&init.upload_id).await.unwrap();
        assert_eq!(status.uploaded_chunks, vec![0, 1, 2]);
        assert_eq!(status.uploaded_size, 25);

        let saved = manager.complete(&init.upload_id).await.unwrap();
        let stored = tokio::fs::read(temp_dir.path().join(&saved.path)).await.unwrap();
        assert_eq!(stored, data);

        let event = events.recv().await.unwrap();
        assert_eq!(event.name(), "file_upload");

        assert!(matches!(
            manager.complete(&init.upload_id).await,
            Err(SessionError::UnknownSession(_))
        ));
        assert!(matches!(
            manager.put_chunk(&init.upload_id, 0, &data[..10]).await,
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_idempotent() {
        let (manager, temp_dir) = create_test_manager(StorageConfig::default()).await;
        let data = sample(20);
        let init = manager.init("dup.bin", "public", 20, 10).await.unwrap();

        manager.put_chunk(&init.upload_id, 0, &data[..10]).await.unwrap();
        manager.put_chunk(&init.upload_id, 0, &data[..10]).await.unwrap();
        assert_eq!(manager.status(&init.upload_id).await.unwrap().uploaded_chunks, vec![0]);

        manager.put_chunk(&init.upload_id, 1, &data[10..]).await.unwrap();
        let saved = manager.complete(&init.upload_id).await.unwrap();
        let stored = tokio::fs::read(temp_dir.path().join(&saved.path)).await.unwrap();
        assert_eq!(stored, data);
    }

    #[tokio::test]
    async fn test_incomplete_upload_rejected() {
        let (manager, _dir) = create_test_manager(StorageConfig::default()).await;
        let init = manager.init("gap.bin", "public", 30, 10).await.unwrap();
        manager.put_chunk(&init.upload_id, 0, &[0u8; 10]).await.unwrap();
        manager.put_chunk(&init.upload_id, 2, &[0u8; 10]).await.unwrap();

        assert!(matches!(
            manager.complete(&init.upload_id).await,
            Err(SessionError::IncompleteUpload { missing: 1, total_chunks: 3 })
        ));
        assert!(manager.status(&init.upload_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_chunk_validation() {
        let (manager, _dir) = create_test_manager(StorageConfig::default()).await;
        let init = manager.init("v.bin", "public", 25, 10).await.unwrap();

        assert!(matches!(
            manager.put_chunk(&init.upload_id, 3, &[0u8; 5]).await,
            Err(SessionError::InvalidChunkIndex { index: 3, total_chunks: 3 })
        ));
        assert!(matches!(
            manager.put_chunk(&init.upload_id, 2, &[0u8; 10]).await,
            Err(SessionError::ChunkSizeMismatch { expected: 5, actual: 10, .. })
        ));
        assert!(matches!(
            manager.put_chunk("no-such-id", 0, &[0u8; 10]).await,
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_init_validation() {
        let config = StorageConfig {
            max_chunk_size: 100,
            max_chunked_file_size: 1000,
            ..StorageConfig::default()
        };
        let (manager, _dir) = create_test_manager(config).await;

        let err = manager.init("", "public", 10, 10).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DESTINATION");
        let err = manager.init("../x", "public", 10, 10).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DESTINATION");
        let err = manager.init("x", "public/../etc", 10, 10).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DESTINATION");
        let err = manager.init("x", "archive", 10, 10).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DESTINATION");
        let err = manager.init("x", "public", 0, 10).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_SIZE");
        let err = manager.init("x", "public", 10, 0).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_SIZE");
        let err = manager.init("x", "public", 10, 101).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_SIZE");
        let err = manager.init("x", "public", 1001, 100).await.unwrap_err();
        assert_eq!(err.code(), "FILE_TOO_LARGE");
    }

    #[tokio::test]
    async fn test_chunk_count_is_bounded() {
        let (manager, _dir) = create_test_manager(StorageConfig::default()).await;

        // Tiny chunks on a maximum-size file would mean billions of indices.
        let err = manager
            .init("x.bin", "public", 50 * 1024 * 1024 * 1024, 13)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SIZE");

        let config = StorageConfig {
            max_chunks_per_upload: 4,
            ..StorageConfig::default()
        };
        let (manager, _dir) = create_test_manager(config).await;
        assert!(manager.init("ok.bin", "public", 40, 10).await.is_ok());
        let err = manager.init("no.bin", "public", 41, 10).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidSize(_)));
    }

    #[tokio::test]
    async fn test_open_session_limit() {
        let config = StorageConfig {
            max_open_sessions: 2,
            ..StorageConfig::default()
        };
        let (manager, _dir) = create_test_manager(config).await;

        let a = manager.init("a", "public", 10, 10).await.unwrap();
        manager.init("b", "public", 10, 10).await.unwrap();
        assert!(matches!(
            manager.init("c", "public", 10, 10).await,
            Err(SessionError::TooManyUploads(2))
        ));

        manager.cancel(&a.upload_id).await.unwrap();
        manager.init("c", "public", 10, 10).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (manager, _dir) = create_test_manager(StorageConfig::default()).await;
        let init = manager.init("c.bin", "public", 10, 10).await.unwrap();
        let staging = manager
            .storage()
            .staging_path("public", &init.upload_id, "c.bin");
        assert!(staging.exists());

        manager.cancel(&init.upload_id).await.unwrap();
        manager.cancel(&init.upload_id).await.unwrap();
        assert!(!staging.exists());
        assert!(matches!(
            manager.status(&init.upload_id).await,
            Err(SessionError::UnknownSession(_))
        ));
        assert!(matches!(
            manager.cancel("missing").await,
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_chunks_are_all_recorded() {
        let (manager, _dir) = create_test_manager(StorageConfig::default()).await;
        let manager = Arc::new(manager);
        let init = manager.init("p.bin", "public", 160, 10).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..16u32 {
            let manager = manager.clone();
            let id = init.upload_id.clone();
            handles.push(tokio::spawn(async move {
                manager.put_chunk(&id, index, &[index as u8; 10]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let status = manager.status(&init.upload_id).await.unwrap();
        assert_eq!(status.uploaded_chunks.len(), 16);
        assert!(manager.locks.is_empty());
    }

    #[tokio::test]
    async fn test_save_whole() {
        let config = StorageConfig {
            max_file_size: 8,
            ..StorageConfig::default()
        };
        let (manager, temp_dir) = create_test_manager(config).await;

        let saved = manager.save_whole("note.txt", "public", b"hello").await.unwrap();
        assert!(saved.filename.ends_with("_note.txt"));
        let stored = tokio::fs::read(temp_dir.path().join(&saved.path)).await.unwrap();
        assert_eq!(stored, b"hello");

        assert!(matches!(
            manager.save_whole("big.txt", "public", b"123456789").await,
            Err(SessionError::FileTooLarge { size: 9, max: 8 })
        ));
        assert_eq!(
            manager.save_whole("x", "archive", b"1").await.unwrap_err().code(),
            "INVALID_DESTINATION"
        );
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let config = StorageConfig {
            session_ttl_secs: 60,
            terminal_retention_secs: 0,
            ..StorageConfig::default()
        };
        let (manager, _dir) = create_test_manager(config).await;

        let stale = manager.init("old.bin", "public", 10, 10).await.unwrap();
        let done = manager.init("done.bin", "public", 10, 10).await.unwrap();
        manager.cancel(&done.upload_id).await.unwrap();
        let staging = manager.storage().staging_path("public", &stale.upload_id, "old.bin");

        let later = Utc::now() + chrono::Duration::seconds(120);
        let report = manager.cleanup_expired(later).await.unwrap();

        assert_eq!(report.expired_sessions, 1);
        assert_eq!(report.retired_sessions, 1);
        assert!(!staging.exists());
        assert!(matches!(
            manager.status(&stale.upload_id).await,
            Err(SessionError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_orphaned_staging_files() {
        let (manager, temp_dir) = create_test_manager(StorageConfig::default()).await;
        let storage = manager.storage();

        let live = manager.init("live.bin", "public", 20, 10).await.unwrap();
        let live_staging = storage.staging_path("public", &live.upload_id, "live.bin");

        // No row at all, as after a crash or a reset database.
        let stray = storage.staging_path("public/nested", "lost-id", "lost.bin");
        storage.create_staging(&stray).await.unwrap();

        // Row exists but is no longer open.
        let done = manager.init("done.bin", "public", 10, 10).await.unwrap();
        manager.cancel(&done.upload_id).await.unwrap();
        let leftover = storage.staging_path("public", &done.upload_id, "done.bin");
        storage.create_staging(&leftover).await.unwrap();

        let kept = storage.save_bytes("public", "kept.txt", b"x").await.unwrap();

        let report = manager.cleanup_expired(Utc::now()).await.unwrap();

        assert_eq!(report.orphaned_files, 2);
        assert_eq!(report.expired_sessions, 0);
        assert!(!stray.exists());
        assert!(!leftover.exists());
        assert!(live_staging.exists());
        assert!(temp_dir.path().join(&kept.path).exists());

        manager.put_chunk(&live.upload_id, 0, &[1u8; 10]).await.unwrap();
        manager.put_chunk(&live.upload_id, 1, &[2u8; 10]).await.unwrap();
        manager.complete(&live.upload_id).await.unwrap();
    }
}
