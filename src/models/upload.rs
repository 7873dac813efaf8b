//! Upload session types shared by the streaming writer and file handles.

use serde::{Deserialize, Serialize};

/// In-memory buffer per write session (8 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;
/// Process-wide ceiling on bytes held in write buffers (50 MiB).
pub const DEFAULT_MEMORY_CEILING: u64 = 50 * 1024 * 1024;
/// Cumulative size above which flushes go to chunk objects (100 MiB).
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Tunables for a write session.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriterSettings {
    pub buffer_size: usize,
    pub memory_ceiling: u64,
    pub chunk_threshold: u64,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            memory_ceiling: DEFAULT_MEMORY_CEILING,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

/// How write handles move bytes into the store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Bounded-memory streaming writer.
    #[default]
    Streaming,
    /// Whole file held in memory and uploaded once on close.
    Buffered,
}

/// Where a streaming session is sending flushed bytes.
///
/// Transitions only from `Direct` to `Chunked`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Flushes are staged as session parts that are not tracked as chunks.
    Direct,
    /// Flushes land on manifest chunks. Both kinds are combined at finalize.
    Chunked,
}

/// One temporary chunk object produced in chunked mode.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    pub index: usize,
    /// Byte offset of this chunk within the final object.
    pub offset: u64,
    pub size: u64,
    /// Lowercase hex MD5 of the chunk bytes.
    pub hash: String,
    /// Object key the chunk was uploaded under.
    pub key: String,
}

/// Point-in-time memory accounting for a write session.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryUsageReport {
    /// Bytes currently held in write buffers process-wide.
    pub current_memory: u64,
    /// Highest value `current_memory` has reached.
    pub peak_memory: u64,
    /// Configured process-wide ceiling.
    pub max_memory: u64,
    /// Bytes currently buffered by this session.
    pub buffer_size: u64,
    /// Buffer capacity of this session.
    pub buffer_capacity: u64,
    pub chunk_count: usize,
    pub total_written: u64,
    pub mode: FlushMode,
}

/// Outcome of a successful write-close.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    pub key: String,
    pub size: u64,
    /// Lowercase hex MD5 of the whole content.
    pub content_hash: String,
    pub chunk_count: usize,
}

/// Name of the temporary object holding chunk `index` of `key` for one
/// write session. Staging keys never collide across sessions.
pub fn chunk_key(key: &str, session: &str, index: usize) -> String {
    format!("{key}.chunk.{session}.{index}")
}

/// Name of a direct-mode staging object of `key` for one write session.
pub fn part_key(key: &str, session: &str, index: usize) -> String {
    format!("{key}.part.{session}.{index}")
}
