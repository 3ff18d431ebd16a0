use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Chunk size used by clients unless configured otherwise (20 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 20 * 1024 * 1024;

/// Half-open byte range `[start, end)` of one chunk within a file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<u64> {
        self.start..self.end
    }
}
