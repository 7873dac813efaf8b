//! src/services/metadata_store.rs
//!
//! Relational bookkeeping for file records, kept beside (not inside) the
//! object store. Every lookup is keyed by `(bucket, object_key, owner_id)`
//! and a missing row is `Ok(None)`, never an error.

use crate::models::file_record::{FileRecord, HashStatus, RecordStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("file record for `{key}` in bucket `{bucket}` not found")]
    NotFound { bucket: String, key: String },
    #[error("file record for `{key}` in bucket `{bucket}` already exists")]
    AlreadyExists { bucket: String, key: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Fields replaced on an existing record after a new upload lands.
#[derive(Clone, Debug)]
pub struct ContentUpdate {
    pub size_bytes: i64,
    pub content_hash: String,
    pub hash_status: HashStatus,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find(
        &self,
        bucket: &str,
        object_key: &str,
        owner_id: Uuid,
    ) -> MetadataResult<Option<FileRecord>>;

    /// Insert a new row. A duplicate key yields `AlreadyExists`.
    async fn insert(&self, record: &FileRecord) -> MetadataResult<()>;

    /// Refresh size/hash/timestamp and mark the row ACTIVE.
    async fn update_content(
        &self,
        bucket: &str,
        object_key: &str,
        owner_id: Uuid,
        update: &ContentUpdate,
    ) -> MetadataResult<()>;

    /// Point a row at a new key, replacing any row already at `new_key`.
    /// Returns whether a row was moved.
    async fn rename_key(
        &self,
        bucket: &str,
        old_key: &str,
        new_key: &str,
        owner_id: Uuid,
    ) -> MetadataResult<bool>;

    /// Returns whether a row was removed.
    async fn delete(&self, bucket: &str, object_key: &str, owner_id: Uuid)
    -> MetadataResult<bool>;
}

/// Apply the embedded schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> sqlx::Result<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find(
        &self,
        bucket: &str,
        object_key: &str,
        owner_id: Uuid,
    ) -> MetadataResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT id, bucket, object_key, owner_id, filename, size_bytes, content_hash,
                    hash_status, storage_type, status, created_at, updated_at
             FROM file_records
             WHERE bucket = ? AND object_key = ? AND owner_id = ?",
        )
        .bind(bucket)
        .bind(object_key)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn insert(&self, record: &FileRecord) -> MetadataResult<()> {
        let result = sqlx::query(
            "INSERT INTO file_records (
                id, bucket, object_key, owner_id, filename, size_bytes, content_hash,
                hash_status, storage_type, status, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.bucket)
        .bind(&record.object_key)
        .bind(record.owner_id)
        .bind(&record.filename)
        .bind(record.size_bytes)
        .bind(&record.content_hash)
        .bind(record.hash_status)
        .bind(&record.storage_type)
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(MetadataError::AlreadyExists {
                bucket: record.bucket.clone(),
                key: record.object_key.clone(),
            }),
            Err(err) => Err(MetadataError::Sqlx(err)),
        }
    }

    async fn update_content(
        &self,
        bucket: &str,
        object_key: &str,
        owner_id: Uuid,
        update: &ContentUpdate,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE file_records
             SET size_bytes = ?, content_hash = ?, hash_status = ?, status = ?, updated_at = ?
             WHERE bucket = ? AND object_key = ? AND owner_id = ?",
        )
        .bind(update.size_bytes)
        .bind(&update.content_hash)
        .bind(update.hash_status)
        .bind(RecordStatus::Active)
        .bind(update.updated_at)
        .bind(bucket)
        .bind(object_key)
        .bind(owner_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound {
                bucket: bucket.to_string(),
                key: object_key.to_string(),
            });
        }
        Ok(())
    }

    async fn rename_key(
        &self,
        bucket: &str,
        old_key: &str,
        new_key: &str,
        owner_id: Uuid,
    ) -> MetadataResult<bool> {
        let mut tx = self.db.begin().await?;
        let source_rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_records WHERE bucket = ? AND object_key = ? AND owner_id = ?",
        )
        .bind(bucket)
        .bind(old_key)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;
        if source_rows == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "DELETE FROM file_records WHERE bucket = ? AND object_key = ? AND owner_id = ?",
        )
        .bind(bucket)
        .bind(new_key)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        let filename = crate::models::file_record::base_name(new_key).to_string();
        let result = sqlx::query(
            "UPDATE file_records SET object_key = ?, filename = ?, updated_at = ?
             WHERE bucket = ? AND object_key = ? AND owner_id = ?",
        )
        .bind(new_key)
        .bind(filename)
        .bind(Utc::now())
        .bind(bucket)
        .bind(old_key)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(
        &self,
        bucket: &str,
        object_key: &str,
        owner_id: Uuid,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "DELETE FROM file_records WHERE bucket = ? AND object_key = ? AND owner_id = ?",
        )
        .bind(bucket)
        .bind(object_key)
        .bind(owner_id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
