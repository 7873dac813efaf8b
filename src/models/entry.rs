//! Synthesized filesystem views over flat object keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directory bit used in `mode()` values, matching `S_IFDIR`.
pub const MODE_DIR: u32 = 0o040000;

/// Whether a path resolves to a file or a directory.
///
/// Object stores have no native directories. The kind is derived at query
/// time from key shape and prefix probes and is never stored.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }

    /// Fixed permission bits: `0755` for directories, `0644` for files.
    pub fn mode(self) -> u32 {
        match self {
            EntryKind::Directory => MODE_DIR | 0o755,
            EntryKind::File => 0o644,
        }
    }
}

/// One child of a directory listing.
///
/// Created and discarded inside a single `readdir` call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Child name relative to the listed directory (no slashes).
    pub name: String,

    pub kind: EntryKind,

    /// Payload size for files, zero for directories.
    pub size: i64,

    /// Object timestamp for files; newest child timestamp for directories.
    pub mod_time: DateTime<Utc>,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Result of `stat` on a single path.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// Base name of the path, `/` for the bucket root.
    pub name: String,
    pub kind: EntryKind,
    pub size: i64,
    pub mod_time: DateTime<Utc>,
    /// Content hash when known from the metadata store.
    pub content_hash: Option<String>,
}

impl FileInfo {
    pub fn directory(name: impl Into<String>, mod_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: 0,
            mod_time,
            content_hash: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn mode(&self) -> u32 {
        self.kind.mode()
    }
}
