//! Upload orchestrator
//!
//! Owns the task registry. Every submitted file becomes a task running in its
//! own spawned future; small files go up in one request, large ones through
//! the chunked protocol with resume. Tasks report through their state machine
//! and a broadcast channel of notifications.

use crate::chunk::ChunkPlan;
use crate::client::engine::ChunkTransferEngine;
use crate::client::error::{ClientError, ClientResult};
use crate::client::resume::{ResumeDecision, ResumeKey, ResumeLocator, ResumeRecord, ResumeStore};
use crate::client::source::UploadSource;
use crate::client::state_machine::{TaskEvent, TaskStateMachine};
use crate::client::transport::{ByteProgress, UploadTransport};
use crate::client::types::{
    progress_percent, Notification, NotificationLevel, TaskId, UploadMode, UploadPolicy,
    UploadTask,
};
use crate::storage::SavedFile;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const NOTIFICATION_CAPACITY: usize = 256;

struct TaskEntry {
    machine: Arc<TaskStateMachine>,
    cancel: CancellationToken,
}

struct Inner {
    transport: Arc<dyn UploadTransport>,
    resume_store: Arc<dyn ResumeStore>,
    policy: UploadPolicy,
    tasks: DashMap<TaskId, TaskEntry>,
    next_id: AtomicU64,
    notifications: broadcast::Sender<Notification>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<Inner>,
}

impl UploadOrchestrator {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        resume_store: Arc<dyn ResumeStore>,
        policy: UploadPolicy,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                resume_store,
                policy,
                tasks: DashMap::new(),
                next_id: AtomicU64::new(1),
                notifications,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.inner.policy
    }

    /// Start uploading `source` into `destination`.
    pub fn submit(&self, source: UploadSource, destination: &str) -> TaskId {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mode = self.inner.policy.mode_for(source.size());
        let task = UploadTask::new(id, source.name(), source.size(), destination, mode);

        let machine = Arc::new(TaskStateMachine::new(task));
        let cancel = self.inner.shutdown.child_token();
        self.inner.tasks.insert(
            id,
            TaskEntry {
                machine: machine.clone(),
                cancel: cancel.clone(),
            },
        );

        tracing::info!(
            task_id = %id,
            filename = %source.name(),
            size = source.size(),
            destination,
            mode = ?mode,
            "Upload submitted"
        );

        let inner = self.inner.clone();
        let destination = destination.to_string();
        tokio::spawn(async move {
            inner.run_task(id, source, destination, mode, machine, cancel).await;
        });

        id
    }

    /// Request cancellation. A task that already finished is left as is.
    pub fn cancel(&self, id: TaskId) -> ClientResult<()> {
        let entry = self.inner.tasks.get(&id).ok_or(ClientError::TaskNotFound(id))?;
        if !entry.machine.status().is_terminal() {
            tracing::info!(task_id = %id, "Cancelling upload");
            entry.cancel.cancel();
        }
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<UploadTask> {
        self.inner.tasks.get(&id).map(|e| e.machine.current())
    }

    /// All tasks in submission order.
    pub fn list(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self
            .inner
            .tasks
            .iter()
            .map(|e| e.machine.current())
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait(&self, id: TaskId) -> ClientResult<UploadTask> {
        let mut rx = {
            let entry = self.inner.tasks.get(&id).ok_or(ClientError::TaskNotFound(id))?;
            entry.machine.subscribe()
        };
        let task = rx
            .wait_for(|t| t.status.is_terminal())
            .await
            .map_err(|_| ClientError::TaskNotFound(id))?
            .clone();
        Ok(task)
    }

    /// Drop every finished task from the registry; returns how many went.
    pub fn clear_finished(&self) -> usize {
        let before = self.inner.tasks.len();
        self.inner
            .tasks
            .retain(|_, e| !e.machine.status().is_terminal());
        before - self.inner.tasks.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Cancel everything still uploading, wait for it to settle and empty the
    /// registry.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let ids: Vec<TaskId> = self.inner.tasks.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Err(e) = self.wait(id).await {
                tracing::debug!(task_id = %id, error = %e, "Task vanished during shutdown");
            }
        }

        self.inner.tasks.clear();
        tracing::info!("Upload orchestrator shut down");
    }
}

impl Inner {
    async fn run_task(
        &self,
        id: TaskId,
        source: UploadSource,
        destination: String,
        mode: UploadMode,
        machine: Arc<TaskStateMachine>,
        cancel: CancellationToken,
    ) {
        self.notify(id, NotificationLevel::Info, format!("Uploading {}", source.name()));

        let result = match mode {
            UploadMode::Single => self.upload_single(&source, &destination, &machine, &cancel).await,
            UploadMode::Chunked => {
                self.upload_chunked(id, &source, &destination, &machine, &cancel)
                    .await
            }
        };

        let event = match result {
            Ok(saved) => {
                tracing::info!(task_id = %id, path = %saved.path, size = saved.size, "Upload completed");
                self.notify(
                    id,
                    NotificationLevel::Success,
                    format!("{} uploaded to {}", source.name(), destination),
                );
                TaskEvent::Succeeded(saved)
            }
            Err(ClientError::Cancelled) => {
                tracing::info!(task_id = %id, "Upload cancelled");
                self.notify(
                    id,
                    NotificationLevel::Warning,
                    format!("Upload of {} cancelled", source.name()),
                );
                TaskEvent::Cancelled
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "Upload failed");
                let reason = e.to_string();
                self.notify(
                    id,
                    NotificationLevel::Error,
                    format!("Upload of {} failed: {}", source.name(), reason),
                );
                TaskEvent::Failed(reason)
            }
        };

        if let Err(e) = machine.transition(event) {
            tracing::warn!(task_id = %id, error = %e, "Final task transition rejected");
        }
    }

    async fn upload_single(
        &self,
        source: &UploadSource,
        destination: &str,
        machine: &Arc<TaskStateMachine>,
        cancel: &CancellationToken,
    ) -> ClientResult<SavedFile> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let data = source.read_all().await?;

        let progress_machine = machine.clone();
        let progress: ByteProgress = Arc::new(move |sent: u64, total: u64| {
            let _ = progress_machine.transition(TaskEvent::Progress(progress_percent(sent, total)));
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = self.transport.upload_whole(source.name(), destination, data, progress) => {
                Ok(result?)
            }
        }
    }

    async fn upload_chunked(
        &self,
        id: TaskId,
        source: &UploadSource,
        destination: &str,
        machine: &Arc<TaskStateMachine>,
        cancel: &CancellationToken,
    ) -> ClientResult<SavedFile> {
        let plan = ChunkPlan::new(source.size(), self.policy.chunk_size)?;
        let key = ResumeKey::new(source.name(), source.size(), destination);

        let locator = ResumeLocator::new(
            self.transport.clone(),
            self.resume_store.clone(),
            self.policy.resume_ttl(),
        );

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            decision = locator.locate(&key, &plan) => decision,
        };

        let (session_id, uploaded) = match decision {
            ResumeDecision::Resume {
                session_id,
                uploaded,
            } => (session_id, uploaded),
            ResumeDecision::Fresh => {
                let init = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    result = self.transport.init(
                        source.name(),
                        destination,
                        plan.total_size(),
                        plan.chunk_size(),
                    ) => result?,
                };

                if let Err(e) = self
                    .resume_store
                    .put(&key, ResumeRecord::new(&init.upload_id))
                    .await
                {
                    tracing::warn!(task_id = %id, error = %e, "Failed to save resume record");
                }
                (init.upload_id, BTreeSet::new())
            }
        };

        machine.transition(TaskEvent::SessionOpened {
            session_id: session_id.clone(),
        })?;
        tracing::debug!(task_id = %id, upload_id = %session_id, "Upload session ready");

        let engine = ChunkTransferEngine::new(
            self.transport.clone(),
            self.policy.max_attempts,
            self.policy.retry_delay(),
        );

        let progress_machine = machine.clone();
        let sent = engine
            .run(&session_id, source, &plan, &uploaded, cancel, |p| {
                let _ = progress_machine.transition(TaskEvent::Progress(p));
            })
            .await;

        match sent {
            Ok(()) if cancel.is_cancelled() => {
                self.abandon(id, &key, &session_id).await;
                return Err(ClientError::Cancelled);
            }
            Ok(()) => {}
            Err(ClientError::Cancelled) => {
                self.abandon(id, &key, &session_id).await;
                return Err(ClientError::Cancelled);
            }
            Err(e) => return Err(e),
        }

        let saved = self.transport.complete(&session_id).await?;

        if let Err(e) = self.resume_store.remove(&key).await {
            tracing::warn!(task_id = %id, error = %e, "Failed to remove resume record");
        }
        Ok(saved)
    }

    /// Best-effort server cancel, then forget the resume record.
    async fn abandon(&self, id: TaskId, key: &ResumeKey, session_id: &str) {
        if let Err(e) = self.transport.cancel(session_id).await {
            tracing::warn!(task_id = %id, upload_id = %session_id, error = %e, "Server cancel failed");
        }
        if let Err(e) = self.resume_store.remove(key).await {
            tracing::warn!(task_id = %id, error = %e, "Failed to remove resume record");
        }
    }

    fn notify(&self, task_id: TaskId, level: NotificationLevel, message: String) {
        // No subscribers is fine.
        let _ = self.notifications.send(Notification {
            task_id,
            level,
            message,
        });
    }
}
