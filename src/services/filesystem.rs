//! src/services/filesystem.rs
//!
//! VirtualFileSystem: hierarchical operations over a flat object store.
//!
//! Directories exist only as key prefixes and zero-length `/`-terminated
//! marker objects; whether a path is a file or a directory is decided per
//! call from a one-item prefix probe and never cached. File records in the
//! metadata store are kept in step after each operation, but the two
//! backends are not updated atomically: multi-step operations report the
//! step they stopped at instead of rolling back.

use crate::{
    models::{
        entry::{DirectoryEntry, EntryKind, FileInfo},
        file_record::{FileRecord, HashStatus, RecordStatus, base_name},
        object::ObjectInfo,
        upload::{UploadMode, UploadSummary, WriterSettings},
    },
    services::{
        error::{RenameStep, VfsError, VfsResult},
        file_handle::FileHandle,
        memory_budget::MemoryBudget,
        metadata_store::{ContentUpdate, MetadataError, MetadataStore},
        object_store::{ObjectStore, StorageError},
        path_validator::{validate_bucket, validate_path},
        streaming_writer::StreamingWriter,
    },
};
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashSet, btree_map::Entry},
    sync::Arc,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";
pub const DEFAULT_LIST_PAGE_SIZE: usize = 1000;

/// Behavior shared by every filesystem opened from one service.
#[derive(Clone, Copy, Debug)]
pub struct FsOptions {
    pub writer: WriterSettings,
    pub upload_mode: UploadMode,
    /// Maximum objects fetched per listing call.
    pub list_page_size: usize,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            writer: WriterSettings::default(),
            upload_mode: UploadMode::Streaming,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }
}

/// Shared collaborators; opens a filesystem per caller identity.
#[derive(Clone)]
pub struct FsService {
    pub store: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub budget: Arc<MemoryBudget>,
    pub options: FsOptions,
}

impl FsService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        options: FsOptions,
    ) -> Self {
        Self {
            store,
            metadata,
            budget: Arc::new(MemoryBudget::new(options.writer.memory_ceiling)),
            options,
        }
    }

    /// Filesystem view of `bucket` acting as `owner_id`.
    pub fn filesystem(&self, bucket: &str, owner_id: Uuid) -> VfsResult<VirtualFileSystem> {
        validate_bucket(bucket)?;
        Ok(VirtualFileSystem {
            service: self.clone(),
            bucket: bucket.to_string(),
            owner_id,
        })
    }
}

#[derive(Clone)]
pub struct VirtualFileSystem {
    service: FsService,
    bucket: String,
    owner_id: Uuid,
}

impl VirtualFileSystem {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub(crate) fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.service.store
    }

    fn page_size(&self) -> usize {
        self.service.options.list_page_size.max(1)
    }

    /// Object key for a path: canonical form without the leading `/`.
    /// The bucket root maps to the empty key.
    fn key_for(&self, path: &str) -> VfsResult<String> {
        let canonical = validate_path(&self.bucket, path)?;
        Ok(canonical.trim_start_matches('/').to_string())
    }

    /// First object under `key/`, if any. Present means directory.
    async fn probe_directory(&self, key: &str) -> VfsResult<Option<ObjectInfo>> {
        let prefix = format!("{key}/");
        let mut found = self.service.store.list(&self.bucket, &prefix, 1).await?;
        Ok(found.pop())
    }

    async fn is_directory(&self, key: &str) -> VfsResult<bool> {
        if key.is_empty() || key.ends_with('/') {
            return Ok(true);
        }
        Ok(self.probe_directory(key).await?.is_some())
    }

    /// Create a directory marker. Recreating an existing one is fine.
    pub async fn mkdir(&self, path: &str) -> VfsResult<()> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Ok(());
        }
        let marker = format!("{key}/");
        self.service
            .store
            .put(
                &self.bucket,
                &marker,
                Box::new(tokio::io::empty()),
                0,
                Some(DIRECTORY_CONTENT_TYPE),
            )
            .await?;
        debug!(bucket = %self.bucket, marker = %marker, "created directory marker");
        Ok(())
    }

    /// Open a path for reading. Directories yield a handle that only
    /// supports `readdir`.
    pub async fn open_for_read(&self, path: &str) -> VfsResult<FileHandle> {
        let key = self.key_for(path)?;
        let canonical = format!("/{key}");
        if self.is_directory(&key).await? {
            return Ok(FileHandle::directory(self.clone(), canonical, key));
        }

        let reader = self
            .service
            .store
            .get(&self.bucket, &key)
            .await
            .map_err(|err| not_found_or(err, &canonical))?;
        Ok(FileHandle::reader(self.clone(), canonical, key, reader))
    }

    /// Open a path for writing. No existence check; nothing reaches the
    /// store until the first flush or `close`.
    pub fn open_for_write(&self, path: &str) -> VfsResult<FileHandle> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Err(VfsError::InvalidOperation("cannot write to the bucket root"));
        }
        let canonical = format!("/{key}");
        let options = self.service.options;
        let handle = match options.upload_mode {
            UploadMode::Streaming => {
                let writer = StreamingWriter::new(
                    self.service.store.clone(),
                    self.service.budget.clone(),
                    self.bucket.clone(),
                    key.clone(),
                    options.writer,
                );
                FileHandle::streaming(self.clone(), canonical, key, writer)
            }
            UploadMode::Buffered => {
                FileHandle::buffered(self.clone(), canonical, key, options.writer.chunk_threshold)
            }
        };
        Ok(handle)
    }

    pub async fn readdir(&self, path: &str) -> VfsResult<Vec<DirectoryEntry>> {
        self.readdir_limited(path, 0).await
    }

    /// List direct children of `path` from one listing page.
    ///
    /// Keys below a child directory collapse into one directory entry; a
    /// name seen both as a file and as a prefix is reported as a directory.
    /// Entries come back sorted by name. `count > 0` truncates the result.
    pub async fn readdir_limited(&self, path: &str, count: usize) -> VfsResult<Vec<DirectoryEntry>> {
        let key = self.key_for(path)?;
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };

        let objects = self
            .service
            .store
            .list(&self.bucket, &prefix, self.page_size())
            .await?;
        if objects.is_empty() && !key.is_empty() {
            return Err(VfsError::NotFound(format!("/{key}")));
        }

        let mut entries: BTreeMap<String, DirectoryEntry> = BTreeMap::new();
        for obj in objects {
            let Some(relative) = obj.key.strip_prefix(&prefix) else {
                continue;
            };
            let (name, kind) = match relative.split_once('/') {
                Some((head, _)) => (head, EntryKind::Directory),
                None => (relative, EntryKind::File),
            };
            if name.is_empty() {
                continue;
            }

            match entries.entry(name.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(DirectoryEntry {
                        name: name.to_string(),
                        kind,
                        size: if kind.is_dir() { 0 } else { obj.size },
                        mod_time: obj.last_modified,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    if kind.is_dir() {
                        entry.kind = EntryKind::Directory;
                        entry.size = 0;
                    }
                    if entry.is_dir() && obj.last_modified > entry.mod_time {
                        entry.mod_time = obj.last_modified;
                    }
                }
            }
        }

        let mut listed: Vec<DirectoryEntry> = entries.into_values().collect();
        if count > 0 {
            listed.truncate(count);
        }
        Ok(listed)
    }

    /// Remove a file, or a directory and everything beneath it.
    ///
    /// Missing paths are not an error. Directory removal deletes object by
    /// object and can stop part way, reported as `PartialRemove`.
    pub async fn remove(&self, path: &str) -> VfsResult<()> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Err(VfsError::InvalidOperation("refusing to remove the bucket root"));
        }

        if self.is_directory(&key).await? {
            return self.remove_directory(&key).await;
        }

        self.service.store.delete(&self.bucket, &key).await?;
        self.service
            .metadata
            .delete(&self.bucket, &key, self.owner_id)
            .await?;
        info!(bucket = %self.bucket, key = %key, "removed file");
        Ok(())
    }

    async fn remove_directory(&self, key: &str) -> VfsResult<()> {
        let prefix = format!("{key}/");
        let mut deleted: HashSet<String> = HashSet::new();

        loop {
            let objects = match self
                .service
                .store
                .list(&self.bucket, &prefix, self.page_size())
                .await
            {
                Ok(objects) => objects,
                Err(err) => return Err(partial_remove(deleted.len(), &prefix, err.into())),
            };
            if objects.is_empty() {
                break;
            }

            for obj in objects {
                if deleted.contains(&obj.key) {
                    let err = StorageError::Backend(format!("object `{}` survived delete", obj.key));
                    return Err(partial_remove(deleted.len(), &obj.key, err.into()));
                }
                if let Err(err) = self.service.store.delete(&self.bucket, &obj.key).await {
                    return Err(partial_remove(deleted.len(), &obj.key, err.into()));
                }
                if let Err(err) = self
                    .service
                    .metadata
                    .delete(&self.bucket, &obj.key, self.owner_id)
                    .await
                {
                    return Err(partial_remove(deleted.len(), &obj.key, err.into()));
                }
                deleted.insert(obj.key);
            }
        }

        info!(
            bucket = %self.bucket,
            prefix = %prefix,
            deleted = deleted.len(),
            "removed directory"
        );
        Ok(())
    }

    /// Move a file or directory.
    ///
    /// Each object moves by copy, delete-source, then metadata update. A
    /// failure after the copy is reported as `PartialRename` naming the
    /// step; nothing is rolled back.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> VfsResult<()> {
        let old_key = self.key_for(old_path)?;
        let new_key = self.key_for(new_path)?;
        if old_key.is_empty() || new_key.is_empty() {
            return Err(VfsError::InvalidOperation("cannot rename the bucket root"));
        }
        if old_key == new_key {
            return Ok(());
        }
        if new_key.starts_with(&format!("{old_key}/")) {
            return Err(VfsError::InvalidOperation("cannot move a directory into itself"));
        }

        if self.is_directory(&old_key).await? {
            self.rename_directory(&old_key, &new_key).await
        } else {
            self.rename_object(&old_key, &new_key).await
        }
    }

    async fn rename_object(&self, old_key: &str, new_key: &str) -> VfsResult<()> {
        let partial = |step: RenameStep, err: VfsError| VfsError::PartialRename {
            step,
            source_key: old_key.to_string(),
            target_key: new_key.to_string(),
            source: Box::new(err),
        };

        match self
            .service
            .store
            .copy(&self.bucket, old_key, &self.bucket, new_key)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                return Err(VfsError::NotFound(format!("/{old_key}")));
            }
            Err(err) => return Err(partial(RenameStep::Copy, err.into())),
        }

        if let Err(err) = self.service.store.delete(&self.bucket, old_key).await {
            warn!(
                bucket = %self.bucket,
                source = %old_key,
                target = %new_key,
                "rename copied but could not delete source; both keys exist"
            );
            return Err(partial(RenameStep::DeleteSource, err.into()));
        }

        if let Err(err) = self
            .service
            .metadata
            .rename_key(&self.bucket, old_key, new_key, self.owner_id)
            .await
        {
            warn!(
                bucket = %self.bucket,
                source = %old_key,
                target = %new_key,
                "rename moved object but metadata still points at the old key"
            );
            return Err(partial(RenameStep::UpdateMetadata, err.into()));
        }

        info!(bucket = %self.bucket, source = %old_key, target = %new_key, "renamed object");
        Ok(())
    }

    async fn rename_directory(&self, old_key: &str, new_key: &str) -> VfsResult<()> {
        let old_prefix = format!("{old_key}/");
        let new_prefix = format!("{new_key}/");
        let mut moved: HashSet<String> = HashSet::new();

        loop {
            let objects = self
                .service
                .store
                .list(&self.bucket, &old_prefix, self.page_size())
                .await?;
            if objects.is_empty() {
                break;
            }
            for obj in objects {
                if !moved.insert(obj.key.clone()) {
                    return Err(VfsError::PartialRename {
                        step: RenameStep::DeleteSource,
                        source_key: obj.key.clone(),
                        target_key: obj.key.replacen(&old_prefix, &new_prefix, 1),
                        source: Box::new(
                            StorageError::Backend(format!("object `{}` survived delete", obj.key))
                                .into(),
                        ),
                    });
                }
                let relative = &obj.key[old_prefix.len()..];
                let target = format!("{new_prefix}{relative}");
                self.rename_object(&obj.key, &target).await?;
            }
        }

        info!(
            bucket = %self.bucket,
            source = %old_prefix,
            target = %new_prefix,
            moved = moved.len(),
            "renamed directory"
        );
        Ok(())
    }

    /// Describe a path.
    ///
    /// Directory probe first, then the metadata store, then a direct
    /// object-store lookup for objects the metadata store does not know.
    pub async fn stat(&self, path: &str) -> VfsResult<FileInfo> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Ok(FileInfo::directory("/", Utc::now()));
        }
        if let Some(child) = self.probe_directory(&key).await? {
            return Ok(FileInfo::directory(base_name(&key), child.last_modified));
        }

        let record = self
            .service
            .metadata
            .find(&self.bucket, &key, self.owner_id)
            .await?
            .filter(|rec| rec.status == RecordStatus::Active);
        if let Some(rec) = record {
            return Ok(FileInfo {
                name: rec.filename,
                kind: EntryKind::File,
                size: rec.size_bytes,
                mod_time: rec.updated_at,
                content_hash: rec.content_hash,
            });
        }

        let obj = self
            .service
            .store
            .stat(&self.bucket, &key)
            .await
            .map_err(|err| not_found_or(err, &format!("/{key}")))?;
        debug!(bucket = %self.bucket, key = %key, "stat served from object store; no file record");
        Ok(FileInfo {
            name: base_name(&key).to_string(),
            kind: EntryKind::File,
            size: obj.size,
            mod_time: obj.last_modified,
            content_hash: None,
        })
    }

    /// Store-side description of the object behind a file path.
    ///
    /// Unlike [`stat`](Self::stat) this ignores file records, so it always
    /// describes the bytes a read would stream.
    pub async fn stat_object(&self, path: &str) -> VfsResult<ObjectInfo> {
        let key = self.key_for(path)?;
        if key.is_empty() {
            return Err(VfsError::InvalidOperation("the bucket root is not an object"));
        }
        self.service
            .store
            .stat(&self.bucket, &key)
            .await
            .map_err(|err| not_found_or(err, &format!("/{key}")))
    }

    /// Insert or refresh the file record after a write-close.
    ///
    /// Look-up-then-write, not an atomic upsert: concurrent writers to the
    /// same key race and the last one to get here wins.
    pub(crate) async fn record_upload(&self, key: &str, summary: &UploadSummary) -> VfsResult<()> {
        let metadata = &self.service.metadata;
        let update = ContentUpdate {
            size_bytes: summary.size as i64,
            content_hash: summary.content_hash.clone(),
            hash_status: HashStatus::Completed,
            updated_at: Utc::now(),
        };

        if metadata.find(&self.bucket, key, self.owner_id).await?.is_some() {
            metadata
                .update_content(&self.bucket, key, self.owner_id, &update)
                .await?;
            return Ok(());
        }

        let record = FileRecord::new_active(
            &self.bucket,
            key,
            self.owner_id,
            summary.size as i64,
            summary.content_hash.clone(),
            self.service.store.kind(),
        );
        match metadata.insert(&record).await {
            Ok(()) => Ok(()),
            Err(MetadataError::AlreadyExists { .. }) => {
                debug!(key = %key, "file record appeared concurrently; updating instead");
                metadata
                    .update_content(&self.bucket, key, self.owner_id, &update)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn not_found_or(err: StorageError, path: &str) -> VfsError {
    if err.is_not_found() {
        VfsError::NotFound(path.to_string())
    } else {
        VfsError::Storage(err)
    }
}

fn partial_remove(deleted: usize, key: &str, err: VfsError) -> VfsError {
    VfsError::PartialRemove {
        deleted,
        failed_key: key.to_string(),
        source: Box::new(err),
    }
}
