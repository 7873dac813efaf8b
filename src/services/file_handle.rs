//! src/services/file_handle.rs
//!
//! Per-open session over one path. A handle is fixed at construction to
//! read, directory, or write mode; write mode is either the streaming
//! writer or a plain in-memory buffer depending on `UploadMode`.

use crate::{
    models::{
        entry::{DirectoryEntry, FileInfo},
        upload::{MemoryUsageReport, UploadSummary},
    },
    services::{
        error::{VfsError, VfsResult},
        filesystem::VirtualFileSystem,
        object_store::{ObjectReader, StorageError},
        streaming_writer::StreamingWriter,
    },
};
use std::{io::Cursor, io::SeekFrom};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Whole-file buffer used by `UploadMode::Buffered`.
struct BufferedUpload {
    data: Vec<u8>,
    limit: u64,
}

impl BufferedUpload {
    fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        let size = (self.data.len() + data.len()) as u64;
        if size > self.limit {
            return Err(VfsError::FileTooLarge {
                size,
                limit: self.limit,
            });
        }
        self.data.extend_from_slice(data);
        Ok(data.len())
    }
}

enum HandleMode {
    Read(ObjectReader),
    Directory,
    Streaming(Box<StreamingWriter>),
    Buffered(BufferedUpload),
    Closed,
}

pub struct FileHandle {
    fs: VirtualFileSystem,
    path: String,
    key: String,
    mode: HandleMode,
}

impl FileHandle {
    pub(crate) fn reader(fs: VirtualFileSystem, path: String, key: String, reader: ObjectReader) -> Self {
        Self {
            fs,
            path,
            key,
            mode: HandleMode::Read(reader),
        }
    }

    pub(crate) fn directory(fs: VirtualFileSystem, path: String, key: String) -> Self {
        Self {
            fs,
            path,
            key,
            mode: HandleMode::Directory,
        }
    }

    pub(crate) fn streaming(
        fs: VirtualFileSystem,
        path: String,
        key: String,
        writer: StreamingWriter,
    ) -> Self {
        Self {
            fs,
            path,
            key,
            mode: HandleMode::Streaming(Box::new(writer)),
        }
    }

    pub(crate) fn buffered(fs: VirtualFileSystem, path: String, key: String, limit: u64) -> Self {
        Self {
            fs,
            path,
            key,
            mode: HandleMode::Buffered(BufferedUpload {
                data: Vec::new(),
                limit,
            }),
        }
    }

    /// Canonical path this handle was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.mode, HandleMode::Directory)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.mode, HandleMode::Closed)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        match &mut self.mode {
            HandleMode::Read(reader) => Ok(reader.read(buf).await.map_err(StorageError::Io)?),
            HandleMode::Directory => Err(VfsError::InvalidOperation("read on a directory")),
            HandleMode::Streaming(_) | HandleMode::Buffered(_) => {
                Err(VfsError::InvalidOperation("read on a write handle"))
            }
            HandleMode::Closed => Err(VfsError::Closed),
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        match &mut self.mode {
            HandleMode::Streaming(writer) => writer.write(data).await,
            HandleMode::Buffered(upload) => upload.write(data),
            HandleMode::Directory => Err(VfsError::InvalidOperation("write on a directory")),
            HandleMode::Read(_) => Err(VfsError::InvalidOperation("write on a read handle")),
            HandleMode::Closed => Err(VfsError::Closed),
        }
    }

    /// Seeking is not supported on streamed objects.
    pub async fn seek(&mut self, _pos: SeekFrom) -> VfsResult<u64> {
        Err(VfsError::InvalidOperation("seek is not supported"))
    }

    /// List children of a directory handle; `count == 0` means no limit
    /// beyond the listing page.
    pub async fn readdir(&self, count: usize) -> VfsResult<Vec<DirectoryEntry>> {
        match self.mode {
            HandleMode::Directory => {
                let (fs, path) = (self.fs.clone(), self.path.clone());
                fs.readdir_limited(&path, count).await
            }
            HandleMode::Closed => Err(VfsError::Closed),
            _ => Err(VfsError::InvalidOperation("readdir on a file")),
        }
    }

    pub async fn stat(&self) -> VfsResult<FileInfo> {
        let (fs, path) = (self.fs.clone(), self.path.clone());
        fs.stat(&path).await
    }

    /// Memory accounting for streaming write handles.
    pub fn memory_usage(&self) -> Option<MemoryUsageReport> {
        match &self.mode {
            HandleMode::Streaming(writer) => Some(writer.memory_usage()),
            _ => None,
        }
    }

    /// Hand the read stream over, e.g. to a response body.
    pub fn into_reader(mut self) -> VfsResult<ObjectReader> {
        match std::mem::replace(&mut self.mode, HandleMode::Closed) {
            HandleMode::Read(reader) => Ok(reader),
            other => {
                self.mode = other;
                Err(VfsError::InvalidOperation("not a read handle"))
            }
        }
    }

    /// Finish the session.
    ///
    /// Write handles finalize their upload and then upsert the file record;
    /// the summary is returned. Closing twice is a no-op.
    pub async fn close(&mut self) -> VfsResult<Option<UploadSummary>> {
        match std::mem::replace(&mut self.mode, HandleMode::Closed) {
            HandleMode::Streaming(mut writer) => {
                let summary = writer.finalize().await?;
                self.fs.record_upload(&self.key, &summary).await?;
                Ok(Some(summary))
            }
            HandleMode::Buffered(upload) => {
                let summary = Self::upload_buffered(&self.fs, &self.key, upload).await?;
                self.fs.record_upload(&self.key, &summary).await?;
                Ok(Some(summary))
            }
            HandleMode::Read(_) | HandleMode::Directory | HandleMode::Closed => Ok(None),
        }
    }

    async fn upload_buffered(
        fs: &VirtualFileSystem,
        key: &str,
        upload: BufferedUpload,
    ) -> VfsResult<UploadSummary> {
        let size = upload.data.len() as u64;
        let content_hash = format!("{:x}", md5::compute(&upload.data));
        fs.store()
            .put(fs.bucket(), key, Box::new(Cursor::new(upload.data)), size, None)
            .await?;
        debug!(key = %key, size = size, "uploaded buffered file");
        Ok(UploadSummary {
            key: key.to_string(),
            size,
            content_hash,
            chunk_count: 0,
        })
    }

    /// Abandon a write session without finalizing. Returns orphaned chunk
    /// keys left in the store; cleaning them up is the caller's job.
    pub fn abort(&mut self) -> Vec<String> {
        match std::mem::replace(&mut self.mode, HandleMode::Closed) {
            HandleMode::Streaming(mut writer) => writer.abort(),
            HandleMode::Buffered(upload) => {
                warn!(key = %self.key, buffered = upload.data.len(), "buffered upload aborted");
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}
