use crate::chunk::ChunkError;
use crate::client::types::TaskId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Upload session not found: {0}")]
    UnknownSession(String),

    #[error("{message} ({code}, HTTP {status})")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Server error code, when the server produced one.
    pub fn code(&self) -> Option<&str> {
        match self {
            TransportError::UnknownSession(_) => Some("UNKNOWN_SESSION"),
            TransportError::Rejected { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Chunk {index} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        index: u32,
        attempts: u32,
        last_error: TransportError,
    },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid task transition: {0}")]
    InvalidTransition(String),

    #[error("Resume store error: {0}")]
    ResumeStore(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::ResumeStore(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
