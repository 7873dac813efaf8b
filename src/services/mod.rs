//! Storage plumbing and the virtual filesystem built on top of it.
//!
//! `object_store` defines the flat backend seam with local-disk and
//! in-memory implementations; `metadata_store` keeps per-file records in
//! SQLite. `filesystem`, `file_handle` and `streaming_writer` layer the
//! hierarchical view and bounded-memory uploads over both.

pub mod error;
pub mod file_handle;
pub mod filesystem;
pub mod local_store;
pub mod memory_budget;
pub mod memory_store;
pub mod metadata_store;
pub mod object_store;
pub mod path_validator;
pub mod streaming_writer;
