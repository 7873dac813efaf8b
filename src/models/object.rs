//! Represents an object as reported by the object store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Read-only snapshot of a single stored object.
///
/// Produced by `ObjectStore::list` and `ObjectStore::stat`. The core never
/// mutates or caches these; directory state is recomputed from fresh
/// listings on every call.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key within the bucket (no leading `/`).
    pub key: String,

    /// Payload size in bytes.
    pub size: i64,

    /// When the payload was last written.
    pub last_modified: DateTime<Utc>,

    /// Opaque entity tag supplied by the store (MD5 hex for the bundled stores).
    pub etag: String,

    /// Content type recorded at upload, if any.
    pub content_type: Option<String>,
}

impl ObjectInfo {
    /// Directory markers are zero-length objects whose key ends in `/`.
    pub fn is_directory_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}
