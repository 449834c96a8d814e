//! Manifest describing how to reassemble a chunked file.

use reelforge_common::SourceKey;
use serde::{Deserialize, Serialize};

/// One manifest line: a chunk blob and the cumulative byte offset after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChunk {
    pub id: String,
    pub offset: u64,
}

/// Ordered chunk list with cumulative offsets. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadManifest {
    pub source_key: SourceKey,
    pub chunks: Vec<ManifestChunk>,
    pub total_size: u64,
}

/// Small companion record stored next to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub chunk_count: usize,
    pub total_size: u64,
}

/// A chunk as stored: handle, length and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: String,
    pub size: u64,
    pub index: usize,
}

/// A chunk intersecting a requested window, with its absolute byte bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub id: String,
    /// First byte of the chunk in the file.
    pub start: u64,
    /// One past the last byte of the chunk in the file.
    pub end: u64,
}

impl DownloadManifest {
    pub fn metadata(&self) -> StoreMetadata {
        StoreMetadata {
            chunk_count: self.chunks.len(),
            total_size: self.total_size,
        }
    }

    /// Check the structural invariants.
    ///
    /// Offsets must be strictly increasing and the last one must equal
    /// `total_size`.
    pub fn validate(&self) -> Result<(), String> {
        let mut prior = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.offset <= prior {
                return Err(format!(
                    "chunk {i} offset {} does not exceed previous offset {prior}",
                    chunk.offset
                ));
            }
            prior = chunk.offset;
        }
        if prior != self.total_size {
            return Err(format!(
                "last offset {prior} does not match total size {}",
                self.total_size
            ));
        }
        Ok(())
    }

    /// Check the manifest against its metadata record.
    pub fn matches(&self, metadata: &StoreMetadata) -> bool {
        metadata.chunk_count == self.chunks.len() && metadata.total_size == self.total_size
    }

    pub fn records(&self) -> Vec<ChunkRecord> {
        let mut prior = 0u64;
        self.chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let record = ChunkRecord {
                    id: chunk.id.clone(),
                    size: chunk.offset - prior,
                    index,
                };
                prior = chunk.offset;
                record
            })
            .collect()
    }

    /// Chunks whose `[start, end)` interval intersects the inclusive window
    /// `[first, last]`, in sequence order.
    pub fn spans(&self, first: u64, last: u64) -> Vec<ChunkSpan> {
        let mut spans = Vec::new();
        let mut prior = 0u64;
        for (index, chunk) in self.chunks.iter().enumerate() {
            if prior > last {
                break;
            }
            if chunk.offset > first {
                spans.push(ChunkSpan {
                    index,
                    id: chunk.id.clone(),
                    start: prior,
                    end: chunk.offset,
                });
            }
            prior = chunk.offset;
        }
        spans
    }
}
