use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("File of {total_size} bytes needs more than {max} chunks of {chunk_size} bytes")]
    TooManyChunks {
        total_size: u64,
        chunk_size: u64,
        max: u32,
    },
}

pub type Result<T> = std::result::Result<T, ChunkError>;
pub type ChunkResult<T> = Result<T>;
