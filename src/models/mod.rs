//! Core data models for the bucket-backed virtual filesystem.
//!
//! Object snapshots come from the object store, file records live in the
//! metadata store, and directory entries are synthesized per listing call.
//! Persisted rows map to SQLite via `sqlx::FromRow` and serialize as JSON
//! via `serde`.

pub mod entry;
pub mod file_record;
pub mod object;
pub mod upload;
