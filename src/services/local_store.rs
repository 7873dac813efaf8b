//! src/services/local_store.rs
//!
//! LocalObjectStore: object payloads on local disk, key index in SQLite.
//! Payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{digest}`
//! where `digest` is MD5(bucket/key), so keys containing `/` (including
//! directory markers) never turn into real directories on disk. The
//! `objects` table gives ordered prefix listing.

use crate::{
    models::object::ObjectInfo,
    services::object_store::{ObjectReader, ObjectStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use chrono::Utc;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool holding the `objects` index.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Reject keys that cannot be stored: empty, oversized, or carrying
    /// control characters.
    fn ensure_key_valid(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if key.bytes().any(|b| b.is_ascii_control()) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Compute the payload path for a key.
    ///
    /// MD5(bucket/key) names the file and its first two bytes pick the
    /// shard directories (00–ff each).
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        let mut path = self.bucket_root(bucket);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    /// Move a finished temp file into place and upsert its index row.
    async fn commit(
        &self,
        bucket: &str,
        key: &str,
        tmp_path: &Path,
        size: u64,
        etag: &str,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let file_path = self.object_path(bucket, key);
        if let Err(err) = fs::rename(tmp_path, &file_path).await {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StorageError::Io(err));
        }

        sqlx::query(
            r#"
            INSERT INTO objects (bucket, key, size_bytes, etag, content_type, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                content_type = excluded.content_type,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(size as i64)
        .bind(etag)
        .bind(content_type)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    /// Create the shard directory for `key` and return a fresh temp path in it.
    async fn temp_path_for(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        Ok(parent.join(format!(".tmp-{}", Uuid::new_v4())))
    }

    /// Recursively remove empty shard directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    /// Stream the body into a temp file while computing the MD5 etag, fsync,
    /// then rename into place. Temp files are removed on every error path.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ObjectReader,
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.ensure_key_valid(key)?;
        let tmp_path = self.temp_path_for(bucket, key).await?;
        let mut file = File::create(&tmp_path).await?;

        let mut written: u64 = 0;
        let mut digest = Context::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            digest.consume(&buf[..n]);
            written += n as u64;
            if let Err(err) = file.write_all(&buf[..n]).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if written != size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::SizeMismatch {
                key: key.to_string(),
                expected: size,
                actual: written,
            });
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        let etag = format!("{:x}", digest.compute());
        self.commit(bucket, key, &tmp_path, written, &etag, content_type)
            .await?;
        debug!(bucket = bucket, key = key, size = written, "stored object");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        self.ensure_key_valid(key)?;
        let file_path = self.object_path(bucket, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::not_found(bucket, key)
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(Box::new(file))
    }

    /// Drop the index row, then the payload, then prune empty shards.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.ensure_key_valid(key)?;
        sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> StorageResult<Vec<ObjectInfo>> {
        let rows = sqlx::query_as::<_, ObjectInfo>(
            "SELECT key, size_bytes AS size, last_modified, etag, content_type
             FROM objects
             WHERE bucket = ? AND substr(key, 1, length(?)) = ?
             ORDER BY key ASC
             LIMIT ?",
        )
        .bind(bucket)
        .bind(prefix)
        .bind(prefix)
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        self.ensure_key_valid(dst_key)?;
        let source = self.stat(src_bucket, src_key).await?;

        let src_path = self.object_path(src_bucket, src_key);
        let tmp_path = self.temp_path_for(dst_bucket, dst_key).await?;
        if let Err(err) = fs::copy(&src_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(if err.kind() == ErrorKind::NotFound {
                StorageError::not_found(src_bucket, src_key)
            } else {
                StorageError::Io(err)
            });
        }

        self.commit(
            dst_bucket,
            dst_key,
            &tmp_path,
            source.size as u64,
            &source.etag,
            source.content_type.as_deref(),
        )
        .await
    }
}
