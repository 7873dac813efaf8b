//! Defines routes for the filesystem surface.
//!
//! ## Structure
//! - **Probes**
//!   - `GET /healthz`: liveness
//!   - `GET /readyz`: metadata database, object store round trip and write-buffer gauge
//!
//! - **Filesystem endpoints** on `/{bucket}/{*path}`
//!   - `GET`: stream a file or list a directory (JSON)
//!   - `HEAD`: stat as headers
//!   - `PUT`: streaming upload
//!   - `DELETE`: remove a file or directory tree
//!   - `POST`: `?op=mkdir`, `?op=rename&to=/new/path`
//!
//! A bare `/{bucket}` addresses the bucket root. Every request carries the
//! caller identity in `x-owner-id`.

use crate::{
    handlers::{
        fs_handlers::{delete_path, get_path, head_path, post_path, put_path},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{Router, routing::get};

/// Build the router. Shared state (`AppState`) is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{*path}",
            get(get_path)
                .head(head_path)
                .put(put_path)
                .delete(delete_path)
                .post(post_path),
        )
}
