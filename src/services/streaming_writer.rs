//! src/services/streaming_writer.rs
//!
//! Bounded-memory upload engine behind write-mode file handles.
//!
//! Bytes accumulate in a fixed-capacity buffer and are folded into a running
//! MD5 as they arrive, so the whole-file hash needs no second pass. The
//! buffer is flushed when the next write would overflow it, or when the
//! shared [`MemoryBudget`] reports pressure across all sessions.
//!
//! The final key is written exactly once, by this session, at `finalize`.
//! A session that never flushed early uploads its buffer there in a single
//! put. Otherwise every flush is staged under a key unique to the session:
//! `{key}.part.{session}.{index}` while the cumulative size stays within
//! `chunk_threshold`, `{key}.chunk.{session}.{index}` (recorded in the chunk
//! manifest) once it has crossed it. `finalize` stages the remainder,
//! composes all staged objects into the final key and deletes them. The
//! switch to chunked mode never reverts within a session.

use crate::{
    models::upload::{
        ChunkInfo, FlushMode, MemoryUsageReport, UploadSummary, WriterSettings, chunk_key,
        part_key,
    },
    services::{
        error::{VfsError, VfsResult},
        memory_budget::MemoryBudget,
        object_store::ObjectStore,
    },
};
use bytes::{Bytes, BytesMut};
use md5::Context;
use std::{io::Cursor, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Open,
    Failed,
    Finished,
}

pub struct StreamingWriter {
    store: Arc<dyn ObjectStore>,
    budget: Arc<MemoryBudget>,
    bucket: String,
    key: String,
    session: String,
    settings: WriterSettings,
    buffer: BytesMut,
    hash: Context,
    /// Bytes accepted by `write`.
    written: u64,
    /// Bytes already persisted in staged objects.
    flushed: u64,
    /// Direct-mode staging objects, in write order.
    parts: Vec<String>,
    mode: FlushMode,
    chunks: Vec<ChunkInfo>,
    state: SessionState,
}

impl StreamingWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        budget: Arc<MemoryBudget>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        mut settings: WriterSettings,
    ) -> Self {
        settings.buffer_size = settings.buffer_size.max(1);
        Self {
            store,
            budget,
            bucket: bucket.into(),
            key: key.into(),
            session: Uuid::new_v4().simple().to_string(),
            buffer: BytesMut::with_capacity(settings.buffer_size),
            settings,
            hash: Context::new(),
            written: 0,
            flushed: 0,
            parts: Vec::new(),
            mode: FlushMode::Direct,
            chunks: Vec::new(),
            state: SessionState::Open,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn total_written(&self) -> u64 {
        self.written
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    /// Chunk manifest so far; offsets are contiguous.
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// Every object staged by this session, parts first, in compose order.
    pub fn staged_keys(&self) -> Vec<String> {
        self.parts
            .iter()
            .cloned()
            .chain(self.chunks.iter().map(|c| c.key.clone()))
            .collect()
    }

    pub fn memory_usage(&self) -> MemoryUsageReport {
        MemoryUsageReport {
            current_memory: self.budget.in_use(),
            peak_memory: self.budget.peak(),
            max_memory: self.budget.ceiling(),
            buffer_size: self.buffer.len() as u64,
            buffer_capacity: self.settings.buffer_size as u64,
            chunk_count: self.chunks.len(),
            total_written: self.written,
            mode: self.mode,
        }
    }

    fn ensure_open(&self) -> VfsResult<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Failed => Err(VfsError::SessionAborted),
            SessionState::Finished => Err(VfsError::Closed),
        }
    }

    /// Append bytes, flushing whenever the buffer would overflow.
    ///
    /// Returns the number of bytes accepted, which is always `data.len()`
    /// on success. A storage failure poisons the session.
    pub async fn write(&mut self, mut data: &[u8]) -> VfsResult<usize> {
        self.ensure_open()?;
        let accepted = data.len();
        let capacity = self.settings.buffer_size;

        while !data.is_empty() {
            if self.buffer.len() + data.len() > capacity || self.budget.under_pressure() {
                self.flush().await?;
            }

            let space = capacity - self.buffer.len();
            let n = space.min(data.len());
            if self.buffer.capacity() - self.buffer.len() < n {
                self.buffer.reserve(capacity - self.buffer.len());
            }
            let (head, rest) = data.split_at(n);
            self.buffer.extend_from_slice(head);
            self.hash.consume(head);
            self.budget.reserve(n as u64);
            self.written += n as u64;
            data = rest;
        }

        Ok(accepted)
    }

    /// Take the buffered bytes out, returning their budget reservation.
    fn take_buffer(&mut self) -> Bytes {
        let data = self.buffer.split().freeze();
        self.budget.release(data.len() as u64);
        data
    }

    /// Stage whatever is buffered and clear the buffer.
    async fn flush(&mut self) -> VfsResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        if self.mode == FlushMode::Direct && self.written > self.settings.chunk_threshold {
            info!(
                key = %self.key,
                written = self.written,
                threshold = self.settings.chunk_threshold,
                "switching upload to chunked mode"
            );
            self.mode = FlushMode::Chunked;
        }

        let data = self.take_buffer();
        let len = data.len() as u64;
        if let Err(err) = self.stage(data).await {
            self.state = SessionState::Failed;
            return Err(err);
        }
        self.flushed += len;

        if self.budget.should_reclaim() {
            // free the allocation; `write` re-reserves lazily
            self.buffer = BytesMut::new();
        } else {
            self.buffer.reserve(self.settings.buffer_size);
        }
        Ok(())
    }

    /// Upload one staging object: a part in direct mode, the next manifest
    /// chunk in chunked mode.
    async fn stage(&mut self, data: Bytes) -> VfsResult<()> {
        let index = self.parts.len() + self.chunks.len();
        let size = data.len() as u64;
        let key = match self.mode {
            FlushMode::Direct => part_key(&self.key, &self.session, index),
            FlushMode::Chunked => chunk_key(&self.key, &self.session, self.chunks.len()),
        };
        let hash = match self.mode {
            FlushMode::Direct => None,
            FlushMode::Chunked => Some(format!("{:x}", md5::compute(&data))),
        };

        if let Err(source) = self
            .store
            .put(&self.bucket, &key, Box::new(Cursor::new(data)), size, None)
            .await
        {
            let orphaned = self.staged_keys();
            warn!(
                key = %self.key,
                staged = %key,
                orphaned = ?orphaned,
                error = %source,
                "staging upload failed"
            );
            return Err(VfsError::ChunkUpload {
                index,
                orphaned,
                source,
            });
        }

        match hash {
            None => {
                debug!(key = %self.key, part = %key, part_size = size, "staged direct part");
                self.parts.push(key);
            }
            Some(hash) => {
                let chunk_index = self.chunks.len();
                self.chunks.push(ChunkInfo {
                    index: chunk_index,
                    offset: self.flushed,
                    size,
                    hash,
                    key,
                });
                debug!(
                    key = %self.key,
                    chunk_index = chunk_index,
                    chunk_size = size,
                    buffered_total = self.budget.in_use(),
                    "flushed chunk"
                );
            }
        }
        Ok(())
    }

    /// Put the final object and return the summary.
    ///
    /// A session that never received bytes still produces an empty object.
    pub async fn finalize(&mut self) -> VfsResult<UploadSummary> {
        self.ensure_open()?;

        let result = if self.flushed == 0 {
            self.put_whole().await
        } else {
            match self.flush().await {
                Ok(()) => self.combine_staged().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = result {
            self.state = SessionState::Failed;
            return Err(err);
        }

        self.state = SessionState::Finished;
        let content_hash = format!("{:x}", std::mem::replace(&mut self.hash, Context::new()).compute());
        info!(
            key = %self.key,
            size = self.written,
            chunks = self.chunks.len(),
            md5 = %content_hash,
            "upload finalized"
        );

        Ok(UploadSummary {
            key: self.key.clone(),
            size: self.written,
            content_hash,
            chunk_count: self.chunks.len(),
        })
    }

    /// Nothing was staged: the buffer is the whole file.
    async fn put_whole(&mut self) -> VfsResult<()> {
        let data = self.take_buffer();
        let size = data.len() as u64;
        self.store
            .put(&self.bucket, &self.key, Box::new(Cursor::new(data)), size, None)
            .await?;
        self.flushed = size;
        debug!(key = %self.key, size = size, "uploaded file in one put");
        Ok(())
    }

    /// Compose every staged object into the final key, then delete them.
    /// Deleting staged objects is best-effort.
    async fn combine_staged(&mut self) -> VfsResult<()> {
        let sources = self.staged_keys();
        info!(
            key = %self.key,
            parts = self.parts.len(),
            chunk_count = self.chunks.len(),
            total_size = self.written,
            "combining staged objects"
        );

        if let Err(source) = self
            .store
            .compose(&self.bucket, &sources, &self.key, self.written)
            .await
        {
            warn!(
                key = %self.key,
                orphaned = ?sources,
                error = %source,
                "combination failed; staged objects left in store"
            );
            return Err(VfsError::ChunkCombine {
                key: self.key.clone(),
                orphaned: sources,
                source,
            });
        }

        for staged in &sources {
            if let Err(err) = self.store.delete(&self.bucket, staged).await {
                warn!(staged = %staged, error = %err, "failed to delete combined staging object");
            }
        }
        Ok(())
    }

    /// Stop the session without finalizing.
    ///
    /// Nothing already staged is rolled back and the final key is never
    /// touched. Returns the orphaned staging keys.
    pub fn abort(&mut self) -> Vec<String> {
        if self.state == SessionState::Finished {
            return Vec::new();
        }
        self.state = SessionState::Finished;
        self.budget.release(self.buffer.len() as u64);
        self.buffer = BytesMut::new();

        let orphaned = self.staged_keys();
        if !orphaned.is_empty() {
            warn!(
                key = %self.key,
                orphaned = ?orphaned,
                "upload aborted before finalize"
            );
        }
        orphaned
    }
}

impl Drop for StreamingWriter {
    fn drop(&mut self) {
        self.budget.release(self.buffer.len() as u64);
        if self.state == SessionState::Open && self.written > 0 {
            warn!(
                key = %self.key,
                written = self.written,
                staged = self.parts.len() + self.chunks.len(),
                "write session dropped without finalize"
            );
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryObjectStore;

    const KIB: usize = 1024;

    fn small_settings() -> WriterSettings {
        WriterSettings {
            buffer_size: 4 * KIB,
            memory_ceiling: 1024 * KIB as u64,
            chunk_threshold: 16 * KIB as u64,
        }
    }

    fn writer(store: &Arc<MemoryObjectStore>, settings: WriterSettings) -> StreamingWriter {
        let budget = Arc::new(MemoryBudget::new(settings.memory_ceiling));
        StreamingWriter::new(store.clone(), budget, "bk", "file.bin", settings)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn small_write_is_one_direct_put() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut w = writer(&store, WriterSettings::default());
        assert_eq!(w.write(b"Hello, World!").await.unwrap(), 13);
        let summary = w.finalize().await.unwrap();

        assert_eq!(summary.size, 13);
        assert_eq!(summary.content_hash, format!("{:x}", md5::compute(b"Hello, World!")));
        let puts = store.put_calls();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].key, "file.bin");
        assert_eq!(puts[0].size, 13);
    }

    #[tokio::test]
    async fn direct_flushes_are_staged_and_final_key_is_put_once() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut w = writer(&store, small_settings());
        let data = pattern(10 * KIB);
        for piece in data.chunks(1000) {
            w.write(piece).await.unwrap();
        }
        assert!(store.object_bytes("bk", "file.bin").is_none());
        let summary = w.finalize().await.unwrap();

        assert_eq!(summary.chunk_count, 0);
        assert_eq!(w.mode(), FlushMode::Direct);
        assert_eq!(store.object_bytes("bk", "file.bin").unwrap(), data);

        let puts = store.put_calls();
        let final_puts: Vec<_> = puts.iter().filter(|p| p.key == "file.bin").collect();
        assert_eq!(final_puts.len(), 1);
        assert_eq!(final_puts[0].size, data.len() as u64);
        assert!(puts.iter().filter(|p| p.key != "file.bin").all(|p| p.key.contains(".part.")));
        assert_eq!(store.keys("bk"), vec!["file.bin".to_string()]);
    }

    #[tokio::test]
    async fn interleaved_writers_on_one_key_leave_last_finisher_intact() {
        let store = Arc::new(MemoryObjectStore::new());
        let settings = WriterSettings {
            buffer_size: 4,
            ..small_settings()
        };
        let mut a = writer(&store, settings);
        let mut b = writer(&store, settings);

        a.write(b"AAAA").await.unwrap();
        a.write(b"AAAA").await.unwrap();
        b.write(b"BBBB").await.unwrap();
        b.write(b"BBBB").await.unwrap();
        a.write(b"AAAA").await.unwrap();

        let first = a.finalize().await.unwrap();
        assert_eq!(first.size, 12);
        assert_eq!(first.content_hash, format!("{:x}", md5::compute(b"AAAAAAAAAAAA")));
        assert_eq!(store.object_bytes("bk", "file.bin").unwrap(), &b"AAAAAAAAAAAA"[..]);

        let second = b.finalize().await.unwrap();
        assert_eq!(second.size, 8);
        assert_eq!(second.content_hash, format!("{:x}", md5::compute(b"BBBBBBBB")));
        assert_eq!(store.object_bytes("bk", "file.bin").unwrap(), &b"BBBBBBBB"[..]);
        assert_eq!(store.keys("bk"), vec!["file.bin".to_string()]);
    }

    #[tokio::test]
    async fn interleaved_chunked_writers_do_not_share_chunks() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut a = writer(&store, small_settings());
        let mut b = writer(&store, small_settings());
        let data_a = pattern(40 * KIB);
        let data_b: Vec<u8> = pattern(40 * KIB).into_iter().map(|x| x ^ 0xff).collect();

        for (pa, pb) in data_a.chunks(3 * KIB).zip(data_b.chunks(3 * KIB)) {
            a.write(pa).await.unwrap();
            b.write(pb).await.unwrap();
        }
        assert_eq!(a.mode(), FlushMode::Chunked);
        assert_eq!(b.mode(), FlushMode::Chunked);

        b.finalize().await.unwrap();
        assert_eq!(store.object_bytes("bk", "file.bin").unwrap(), data_b);
        a.finalize().await.unwrap();
        assert_eq!(store.object_bytes("bk", "file.bin").unwrap(), data_a);
        assert_eq!(store.keys("bk"), vec!["file.bin".to_string()]);
    }

    #[tokio::test]
    async fn failed_chunk_upload_reports_earlier_staged_objects() {
        let store = Arc::new(MemoryObjectStore::new());
        store.reject_puts_containing(".chunk.");
        let mut w = writer(&store, small_settings());
        let data = pattern(40 * KIB);

        let mut failure = None;
        for piece in data.chunks(3 * KIB) {
            if let Err(err) = w.write(piece).await {
                failure = Some(err);
                break;
            }
        }
        let err = failure.expect("chunk upload should fail");
        let orphaned = err.orphaned_keys().to_vec();
        assert!(matches!(err, VfsError::ChunkUpload { .. }));
        assert!(!orphaned.is_empty());
        for key in &orphaned {
            assert!(key.contains(".part."));
            assert!(store.object_bytes("bk", key).is_some());
        }
        assert!(store.object_bytes("bk", "file.bin").is_none());

        assert!(matches!(w.write(b"more").await, Err(VfsError::SessionAborted)));
        assert_eq!(w.abort(), orphaned);
    }

    #[tokio::test]
    async fn crossing_threshold_switches_to_chunks_and_never_back() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut w = writer(&store, small_settings());
        let data = pattern(40 * KIB);
        let mut modes = Vec::new();
        for piece in data.chunks(3 * KIB) {
            w.write(piece).await.unwrap();
            modes.push(w.mode());
        }
        let first_chunked = modes.iter().position(|m| *m == FlushMode::Chunked).unwrap();
        assert!(modes[first_chunked..].iter().all(|m| *m == FlushMode::Chunked));

        let chunk_puts_before_finalize = store
            .put_calls()
            .iter()
            .filter(|p| p.key.contains(".chunk."))
            .count();
        assert!(chunk_puts_before_finalize >= 1);

        let summary = w.finalize().await.unwrap();
        assert_eq!(summary.size, data.len() as u64);
        assert_eq!(summary.content_hash, format!("{:x}", md5::compute(&data)));
        assert_eq!(store.object_bytes("bk", "file.bin").unwrap(), data);
        // chunk objects are cleaned up after combination
        assert_eq!(store.keys("bk"), vec!["file.bin".to_string()]);
    }

    #[tokio::test]
    async fn chunk_manifest_is_contiguous() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut w = writer(&store, small_settings());
        w.write(&pattern(50 * KIB)).await.unwrap();
        w.finalize().await.unwrap();

        let chunks = w.chunks();
        assert!(!chunks.is_empty());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].offset + pair[0].size, pair[1].offset);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
        let last = chunks.last().unwrap();
        assert_eq!(last.offset + last.size, 50 * KIB as u64);
    }

    #[tokio::test]
    async fn buffer_never_exceeds_capacity() {
        let store = Arc::new(MemoryObjectStore::new());
        let settings = small_settings();
        let mut w = writer(&store, settings);
        for piece in pattern(30 * KIB).chunks(1500) {
            w.write(piece).await.unwrap();
            let report = w.memory_usage();
            assert!(report.buffer_size <= settings.buffer_size as u64);
        }
        let report = w.memory_usage();
        assert!(report.peak_memory <= settings.buffer_size as u64);
        assert_eq!(report.total_written, 30 * KIB as u64);
    }

    #[tokio::test]
    async fn memory_pressure_forces_early_flush() {
        let store = Arc::new(MemoryObjectStore::new());
        let settings = WriterSettings {
            buffer_size: 64 * KIB,
            memory_ceiling: 2 * KIB as u64,
            chunk_threshold: 1024 * KIB as u64,
        };
        let mut w = writer(&store, settings);
        w.write(&pattern(3 * KIB)).await.unwrap();
        // over the ceiling now; the next write flushes first
        w.write(b"x").await.unwrap();
        assert_eq!(store.put_calls().len(), 1);
        assert_eq!(w.memory_usage().buffer_size, 1);
    }

    #[tokio::test]
    async fn empty_session_creates_empty_object() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut w = writer(&store, small_settings());
        let summary = w.finalize().await.unwrap();
        assert_eq!(summary.size, 0);
        assert_eq!(summary.content_hash, format!("{:x}", md5::compute(b"")));
        assert_eq!(store.object_bytes("bk", "file.bin").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn finalized_session_rejects_writes() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut w = writer(&store, small_settings());
        w.finalize().await.unwrap();
        assert!(matches!(w.write(b"late").await, Err(VfsError::Closed)));
        assert!(matches!(w.finalize().await, Err(VfsError::Closed)));
    }

    #[tokio::test]
    async fn abort_reports_orphaned_chunks() {
        let store = Arc::new(MemoryObjectStore::new());
        let settings = small_settings();
        let budget = Arc::new(MemoryBudget::new(settings.memory_ceiling));
        let mut w = StreamingWriter::new(store.clone(), budget.clone(), "bk", "big", settings);
        w.write(&pattern(30 * KIB)).await.unwrap();

        let orphaned = w.abort();
        assert!(!orphaned.is_empty());
        for key in &orphaned {
            assert!(store.object_bytes("bk", key).is_some());
        }
        assert_eq!(budget.in_use(), 0);
        assert!(matches!(w.finalize().await, Err(VfsError::Closed)));
    }

    #[tokio::test]
    async fn dropping_writer_returns_budget() {
        let store = Arc::new(MemoryObjectStore::new());
        let settings = small_settings();
        let budget = Arc::new(MemoryBudget::new(settings.memory_ceiling));
        {
            let mut w = StreamingWriter::new(store.clone(), budget.clone(), "bk", "k", settings);
            w.write(&pattern(KIB)).await.unwrap();
            assert_eq!(budget.in_use(), KIB as u64);
        }
        assert_eq!(budget.in_use(), 0);
    }
}
