//! src/services/object_store.rs
//!
//! Capability-only interface to a flat (bucket, key) object store. The
//! filesystem layer never assumes anything beyond put/get/delete/list/copy;
//! `stat` and `compose` are provided on top of those five.

use crate::models::object::ObjectInfo;
use async_trait::async_trait;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Streaming body moving across the object-store seam.
///
/// Must be `Sync`: handles holding one are borrowed across awaits inside
/// handler futures.
pub type ObjectReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("size mismatch for `{key}`: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Flat key-addressed object storage.
///
/// Keys are plain UTF-8 strings without a leading `/`. `list` returns
/// objects whose key starts with `prefix`, in ascending key order, at most
/// `limit` of them. Timeouts and retries belong to implementations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name recorded on file records (e.g. "local").
    fn kind(&self) -> &'static str;

    /// Store `size` bytes read from `reader` under `key`, replacing any
    /// existing object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        reader: ObjectReader,
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    /// Open a streaming reader over the object's bytes.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader>;

    /// Remove an object. Deleting a missing key is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn list(&self, bucket: &str, prefix: &str, limit: usize)
    -> StorageResult<Vec<ObjectInfo>>;

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()>;

    /// Exact-key lookup.
    ///
    /// A key sorts before every other key it prefixes, so a one-item prefix
    /// listing returns the key itself when it exists.
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        self.list(bucket, key, 1)
            .await?
            .into_iter()
            .find(|obj| obj.key == key)
            .ok_or_else(|| StorageError::not_found(bucket, key))
    }

    /// Concatenate `sources` in order into `dst_key`.
    ///
    /// Sources are chained into one streaming `put`, so memory stays bounded
    /// by the backend's copy buffer. `dst_key` may appear among the sources;
    /// backends must open every source before replacing the destination.
    async fn compose(
        &self,
        bucket: &str,
        sources: &[String],
        dst_key: &str,
        total_size: u64,
    ) -> StorageResult<()> {
        let mut reader: ObjectReader = Box::new(tokio::io::empty());
        for source in sources {
            let part = self.get(bucket, source).await?;
            reader = Box::new(reader.chain(part));
        }
        debug!(
            bucket = bucket,
            dst = dst_key,
            parts = sources.len(),
            size = total_size,
            "composing object"
        );
        self.put(bucket, dst_key, reader, total_size, None).await
    }
}
