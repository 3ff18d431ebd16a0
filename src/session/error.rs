use crate::permission::PermissionError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upload session not found: {0}")]
    UnknownSession(String),

    #[error("Chunk index {index} out of range (total chunks: {total_chunks})")]
    InvalidChunkIndex { index: u32, total_chunks: u32 },

    #[error("Chunk {index} has {actual} bytes, expected {expected}")]
    ChunkSizeMismatch { index: u32, expected: u64, actual: u64 },

    #[error("Upload incomplete: {missing} of {total_chunks} chunks missing")]
    IncompleteUpload { missing: usize, total_chunks: u32 },

    #[error("File too large: {size} bytes (maximum {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Too many open uploads (limit {0})")]
    TooManyUploads(usize),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SessionError {
    /// Stable machine-readable code carried in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InvalidDestination(_) => "INVALID_DESTINATION",
            SessionError::InvalidSize(_) => "INVALID_SIZE",
            SessionError::InvalidRequest(_) => "INVALID_REQUEST",
            SessionError::UnknownSession(_) => "UNKNOWN_SESSION",
            SessionError::InvalidChunkIndex { .. } => "INVALID_CHUNK_INDEX",
            SessionError::ChunkSizeMismatch { .. } => "CHUNK_SIZE_MISMATCH",
            SessionError::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            SessionError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            SessionError::TooManyUploads(_) => "TOO_MANY_UPLOADS",
            SessionError::Storage(_)
            | SessionError::DatabaseError(_)
            | SessionError::SerializationError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<PermissionError> for SessionError {
    fn from(err: PermissionError) -> Self {
        SessionError::InvalidDestination(err.to_string())
    }
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        SessionError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
