use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Assembled file has {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
}

pub type StorageResult<T> = Result<T, StorageError>;
