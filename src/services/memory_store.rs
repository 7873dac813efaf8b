//! src/services/memory_store.rs
//!
//! In-process object store. Objects live in an ordered map so prefix
//! listings come back sorted like a real store. Every `put` is recorded,
//! which lets callers assert how many uploads a write session produced.

use crate::{
    models::object::ObjectInfo,
    services::object_store::{ObjectReader, ObjectStore, StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{collections::BTreeMap, io::Cursor, ops::Bound};
use tokio::io::AsyncReadExt;

#[derive(Clone, Debug)]
struct StoredObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

/// One observed `put` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutRecord {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    puts: RwLock<Vec<PutRecord>>,
    reject_puts: RwLock<Option<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `put` calls seen so far, in order.
    pub fn put_calls(&self) -> Vec<PutRecord> {
        self.puts.read().clone()
    }

    /// Raw bytes of an object, if present.
    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|obj| obj.data.clone())
    }

    /// Make every later `put` whose key contains `fragment` fail with a
    /// backend error. Used to exercise partial-failure paths.
    pub fn reject_puts_containing(&self, fragment: impl Into<String>) {
        *self.reject_puts.write() = Some(fragment.into());
    }

    /// Every key currently stored in `bucket`, ascending.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ObjectReader,
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        if let Some(fragment) = self.reject_puts.read().as_deref() {
            if key.contains(fragment) {
                return Err(StorageError::Backend(format!("put of `{key}` rejected")));
            }
        }

        let mut data = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            return Err(StorageError::SizeMismatch {
                key: key.to_string(),
                expected: size,
                actual: data.len() as u64,
            });
        }

        let etag = format!("{:x}", md5::compute(&data));
        self.objects.write().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: Bytes::from(data),
                etag,
                content_type: content_type.map(str::to_string),
                last_modified: Utc::now(),
            },
        );
        self.puts.write().push(PutRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
        });
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        let data = self
            .object_bytes(bucket, key)
            .ok_or_else(|| StorageError::not_found(bucket, key))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> StorageResult<Vec<ObjectInfo>> {
        let objects = self.objects.read();
        let start = (bucket.to_string(), prefix.to_string());
        let listed = objects
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .take(limit)
            .map(|((_, key), obj)| ObjectInfo {
                key: key.clone(),
                size: obj.data.len() as i64,
                last_modified: obj.last_modified,
                etag: obj.etag.clone(),
                content_type: obj.content_type.clone(),
            })
            .collect();
        Ok(listed)
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        let mut objects = self.objects.write();
        let source = objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::not_found(src_bucket, src_key))?;
        objects.insert(
            (dst_bucket.to_string(), dst_key.to_string()),
            StoredObject {
                last_modified: Utc::now(),
                ..source
            },
        );
        Ok(())
    }
}
