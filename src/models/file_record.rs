//! Represents the metadata-store row tracking one logical object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Progress of the content hash stored on a record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashStatus {
    Pending,
    Completed,
    Failed,
}

/// Lifecycle state of a record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Active,
    Deleted,
}

/// A file tracked outside the object store.
///
/// One row per live object, keyed by `(bucket, object_key, owner_id)`.
/// Created on the first successful write-close for a key and updated on
/// every later one. Only the virtual filesystem writes these rows.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket holding the object.
    pub bucket: String,

    /// Object key (no leading `/`).
    pub object_key: String,

    /// Caller identity that wrote the object.
    pub owner_id: Uuid,

    /// Last path segment of `object_key`.
    pub filename: String,

    /// Size in bytes at last close.
    pub size_bytes: i64,

    /// Lowercase hex MD5 of the whole content.
    pub content_hash: Option<String>,

    pub hash_status: HashStatus,

    /// Kind of object store the payload lives in (e.g. "local").
    pub storage_type: String,

    pub status: RecordStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh ACTIVE record for a just-finalized upload.
    pub fn new_active(
        bucket: &str,
        object_key: &str,
        owner_id: Uuid,
        size_bytes: i64,
        content_hash: String,
        storage_type: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            object_key: object_key.to_string(),
            owner_id,
            filename: base_name(object_key).to_string(),
            size_bytes,
            content_hash: Some(content_hash),
            hash_status: HashStatus::Completed,
            storage_type: storage_type.to_string(),
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Last non-empty `/`-separated segment of a key.
pub fn base_name(key: &str) -> &str {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(key)
}
