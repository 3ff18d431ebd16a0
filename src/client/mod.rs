//! Upload client
//!
//! Everything a front end needs to push files to the server: the transport
//! seam, the chunk transfer engine with retry, resume bookkeeping, per-task
//! state machines and the orchestrator that ties them together.

pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod local;
pub mod orchestrator;
pub mod resume;
pub mod source;
pub mod state_machine;
pub mod transport;
pub mod types;

pub use engine::ChunkTransferEngine;
pub use error::{ClientError, ClientResult, TransportError, TransportResult};
pub use events::{EventSubscriber, ReconnectConfig, ReconnectPolicy, SseMessage, SseParser};
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use orchestrator::UploadOrchestrator;
pub use resume::{
    JsonFileResumeStore, MemoryResumeStore, ResumeDecision, ResumeKey, ResumeLocator,
    ResumeRecord, ResumeStore,
};
pub use source::UploadSource;
pub use state_machine::{TaskEvent, TaskStateMachine};
pub use transport::{ByteProgress, UploadTransport};
pub use types::{
    progress_percent, Notification, NotificationLevel, TaskId, TaskStatus, UploadMode,
    UploadPolicy, UploadTask, DEFAULT_CHUNKED_THRESHOLD,
};
