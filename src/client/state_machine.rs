use crate::client::error::{ClientError, ClientResult};
use crate::client::types::{TaskStatus, UploadTask};
use crate::storage::SavedFile;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    SessionOpened { session_id: String },
    Progress(u8),
    Succeeded(SavedFile),
    Failed(String),
    Cancelled,
}

/// Lifecycle of one upload task: `uploading` until exactly one of
/// `completed`, `failed` or `cancelled`, after which it never changes.
///
/// The current snapshot is published on a watch channel so callers can read
/// or await it without locking the task.
pub struct TaskStateMachine {
    state: watch::Sender<UploadTask>,
}

impl TaskStateMachine {
    pub fn new(task: UploadTask) -> Self {
        let (state, _) = watch::channel(task);
        Self { state }
    }

    pub fn current(&self) -> UploadTask {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadTask> {
        self.state.subscribe()
    }

    /// Apply `event`, returning the resulting status.
    pub fn transition(&self, event: TaskEvent) -> ClientResult<TaskStatus> {
        let mut outcome = Ok(TaskStatus::Uploading);

        self.state.send_if_modified(|task| {
            if task.status.is_terminal() {
                outcome = Err(ClientError::InvalidTransition(format!(
                    "Cannot handle {:?} in state {:?}",
                    event, task.status
                )));
                return false;
            }

            let changed = match &event {
                TaskEvent::SessionOpened { session_id } => {
                    task.session_id = Some(session_id.clone());
                    true
                }
                TaskEvent::Progress(p) => {
                    let p = (*p).min(100);
                    if p > task.progress {
                        task.progress = p;
                        true
                    } else {
                        false
                    }
                }
                TaskEvent::Succeeded(saved) => {
                    task.status = TaskStatus::Completed;
                    task.progress = 100;
                    task.saved = Some(saved.clone());
                    true
                }
                TaskEvent::Failed(reason) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(reason.clone());
                    true
                }
                TaskEvent::Cancelled => {
                    task.status = TaskStatus::Cancelled;
                    true
                }
            };

            outcome = Ok(task.status);
            changed
        });

        outcome
    }
}
