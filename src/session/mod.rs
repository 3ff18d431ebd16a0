//! Upload sessions
//!
//! Durable server-side state of chunked uploads and the service that drives
//! them from init to completion or cancellation.

pub mod error;
pub mod manager;
pub mod store;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use manager::UploadManager;
pub use store::SessionStore;
pub use types::{CleanupReport, InitOutcome, SessionStatus, SessionStatusInfo, UploadSession};
