//! Shared state handed to every HTTP handler.

use crate::services::filesystem::FsService;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub fs: FsService,
    /// Pool backing both the metadata store and the local object index.
    pub db: Arc<SqlitePool>,
}
