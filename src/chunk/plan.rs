use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::error::{ChunkError, Result};
use super::types::ChunkRange;

/// Fixed-size partitioning of a file of `total_size` bytes.
///
/// Both sides of the upload protocol address chunks through a plan: the client
/// to slice the source, the server to place bytes at `index * chunk_size` and to
/// decide when every index has arrived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunk_size: u64,
    chunk_count: u32,
}

impl ChunkPlan {
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize(
                "Chunk size must be > 0".into(),
            ));
        }

        let count = total_size.div_ceil(chunk_size);
        let chunk_count = u32::try_from(count).map_err(|_| ChunkError::TooManyChunks {
            total_size,
            chunk_size,
            max: u32::MAX,
        })?;

        Ok(Self {
            total_size,
            chunk_size,
            chunk_count,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(total_size / chunk_size)`
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.chunk_count
    }

    pub fn range(&self, index: u32) -> Option<ChunkRange> {
        if !self.contains(index) {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        let end = std::cmp::min(start + self.chunk_size, self.total_size);
        Some(ChunkRange { index, start, end })
    }

    /// Byte length the chunk at `index` must have. Only the last one may be short.
    pub fn expected_len(&self, index: u32) -> Option<u64> {
        self.range(index).map(|r| r.len())
    }

    pub fn ranges(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        (0..self.chunk_count).filter_map(move |i| self.range(i))
    }

    /// Indices in `[0, chunk_count)` absent from `uploaded`, ascending.
    pub fn missing(&self, uploaded: &BTreeSet<u32>) -> Vec<u32> {
        (0..self.chunk_count)
            .filter(|n| !uploaded.contains(n))
            .collect()
    }

    pub fn is_covered_by(&self, uploaded: &BTreeSet<u32>) -> bool {
        (0..self.chunk_count).all(|n| uploaded.contains(&n))
    }

    /// Sum of the byte lengths of the given indices (out-of-range ones ignored).
    pub fn bytes_in<'a>(&self, indices: impl IntoIterator<Item = &'a u32>) -> u64 {
        indices
            .into_iter()
            .filter_map(|&i| self.expected_len(i))
            .sum()
    }
}

/// Split `[0, total_size)` into consecutive ranges of `chunk_size` bytes.
pub fn split_ranges(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkRange>> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize(
            "Chunk size must be > 0".into(),
        ));
    }

    let mut ranges = Vec::new();
    let mut offset = 0u64;
    let mut index = 0u32;

    while offset < total_size {
        let end = std::cmp::min(offset + chunk_size, total_size);
        ranges.push(ChunkRange {
            index,
            start: offset,
            end,
        });
        offset = end;
        index = index.checked_add(1).ok_or(ChunkError::TooManyChunks {
            total_size,
            chunk_size,
            max: u32::MAX,
        })?;
    }

    Ok(ranges)
}
