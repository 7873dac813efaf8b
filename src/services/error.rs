//! src/services/error.rs
//!
//! Error surface of the virtual filesystem. Each failure class a caller may
//! need to map to a distinct response gets its own variant; multi-step
//! operations report exactly which step stopped them.

use crate::services::{
    metadata_store::MetadataError, object_store::StorageError, path_validator::PathError,
};
use std::fmt;
use thiserror::Error;

/// Steps of a single-object rename, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameStep {
    /// Copy to the new key. Failing here leaves the source untouched.
    Copy,
    /// Delete the old key. Failing here leaves both keys present.
    DeleteSource,
    /// Move the metadata row. Failing here leaves the row on a deleted key.
    UpdateMetadata,
}

impl fmt::Display for RenameStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenameStep::Copy => "copy",
            RenameStep::DeleteSource => "delete-source",
            RenameStep::UpdateMetadata => "update-metadata",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("file handle already closed")]
    Closed,

    #[error("write session aborted after an earlier storage failure")]
    SessionAborted,

    #[error("file of {size} bytes exceeds buffered upload limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("failed to stage part {index} ({} staged objects orphaned): {source}", orphaned.len())]
    ChunkUpload {
        index: usize,
        /// Objects this session staged before the failure.
        orphaned: Vec<String>,
        #[source]
        source: StorageError,
    },

    #[error("failed to combine chunks into `{key}` ({} chunk objects orphaned): {source}", orphaned.len())]
    ChunkCombine {
        key: String,
        orphaned: Vec<String>,
        #[source]
        source: StorageError,
    },

    #[error("rename `{source_key}` -> `{target_key}` stopped at {step}: {source}")]
    PartialRename {
        step: RenameStep,
        source_key: String,
        target_key: String,
        #[source]
        source: Box<VfsError>,
    },

    #[error("removal stopped at `{failed_key}` after deleting {deleted} objects: {source}")]
    PartialRemove {
        deleted: usize,
        failed_key: String,
        #[source]
        source: Box<VfsError>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl VfsError {
    /// Staged objects a failed write session left behind.
    pub fn orphaned_keys(&self) -> &[String] {
        match self {
            VfsError::ChunkUpload { orphaned, .. } | VfsError::ChunkCombine { orphaned, .. } => {
                orphaned
            }
            _ => &[],
        }
    }

    /// True for missing paths, including not-found reported by a backend.
    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound(_) => true,
            VfsError::Storage(err) => err.is_not_found(),
            VfsError::Metadata(MetadataError::NotFound { .. }) => true,
            _ => false,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
