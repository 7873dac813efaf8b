//! bucketfs: a hierarchical filesystem view over a flat object store,
//! with bounded-memory streaming uploads and a SQLite file-record index.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
