//! Server push events
//!
//! Events are broadcast in-process and streamed to clients over SSE. Delivery
//! is best effort: a slow subscriber that lags behind skips events, and clients
//! only use them as a hint to refresh their listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEvent {
    pub directory: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEvent {
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    FileUploaded(FileEvent),
    FileDownloaded(FileEvent),
    FileDeleted(FileEvent),
    UserLoggedIn(UserEvent),
}

impl ServerEvent {
    pub fn file_uploaded(directory: &str, filename: &str, size: u64) -> Self {
        ServerEvent::FileUploaded(FileEvent {
            directory: directory.to_string(),
            filename: filename.to_string(),
            size: Some(size),
            timestamp: Utc::now(),
        })
    }

    /// SSE `event:` name.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::FileUploaded(_) => "file_upload",
            ServerEvent::FileDownloaded(_) => "file_download",
            ServerEvent::FileDeleted(_) => "file_delete",
            ServerEvent::UserLoggedIn(_) => "user_login",
        }
    }

    /// SSE `data:` payload.
    pub fn data_json(&self) -> serde_json::Result<String> {
        match self {
            ServerEvent::FileUploaded(e)
            | ServerEvent::FileDownloaded(e)
            | ServerEvent::FileDeleted(e) => serde_json::to_string(e),
            ServerEvent::UserLoggedIn(e) => serde_json::to_string(e),
        }
    }

    /// Rebuild an event from its SSE name and data. Unknown names yield `None`.
    pub fn parse(name: &str, data: &str) -> Option<serde_json::Result<Self>> {
        let event = match name {
            "file_upload" => serde_json::from_str(data).map(ServerEvent::FileUploaded),
            "file_download" => serde_json::from_str(data).map(ServerEvent::FileDownloaded),
            "file_delete" => serde_json::from_str(data).map(ServerEvent::FileDeleted),
            "user_login" => serde_json::from_str(data).map(ServerEvent::UserLoggedIn),
            _ => return None,
        };
        Some(event)
    }
}

#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ServerEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ServerEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(event = name, receivers, "Event broadcast"),
            Err(_) => tracing::trace!(event = name, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
