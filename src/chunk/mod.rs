pub mod error;
pub mod plan;
pub mod types;

pub use error::{ChunkError, ChunkResult, Result};
pub use plan::{split_ranges, ChunkPlan};
pub use types::{ChunkRange, DEFAULT_CHUNK_SIZE};
