//! HTTP handlers for filesystem operations on `/{bucket}/{*path}`.
//! File bodies stream in both directions; uploads go through a write
//! handle so memory stays bounded by the writer's buffer.

use crate::{
    errors::AppError,
    models::{
        entry::{DirectoryEntry, EntryKind, FileInfo},
        object::ObjectInfo,
    },
    services::{filesystem::VirtualFileSystem, path_validator::extract_bucket_and_path},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

/// Header carrying the caller identity, set by an upstream proxy.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Unix permission bits of the entry, in octal.
const FILE_MODE_HEADER: HeaderName = HeaderName::from_static("x-file-mode");

/// Query for `POST`: `?op=mkdir` or `?op=rename&to=/new/path`.
#[derive(Debug, Deserialize)]
pub struct FsOpQuery {
    pub op: String,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub bucket: String,
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
}

fn owner_from(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request(format!("missing {} header", OWNER_HEADER)))?;
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("invalid {} header", OWNER_HEADER)))
}

/// Resolve the request path into a filesystem view and canonical path.
fn open_fs(
    state: &AppState,
    raw_path: &str,
    headers: &HeaderMap,
) -> Result<(VirtualFileSystem, String), AppError> {
    let owner = owner_from(headers)?;
    let (bucket, path) = extract_bucket_and_path(&format!("/{raw_path}"))
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    let fs = state.fs.filesystem(&bucket, owner)?;
    Ok((fs, path))
}

/// GET: stream a file, or list a directory as JSON.
///
/// File headers describe the stored object, not the caller's record, since
/// records may lag behind the object. No `Content-Length` is declared: the
/// object can be replaced between the stat and the read.
pub async fn get_path(
    State(state): State<AppState>,
    Path(raw_path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (fs, path) = open_fs(&state, &raw_path, &headers)?;
    let handle = fs.open_for_read(&path).await?;

    if handle.is_dir() {
        let entries = fs.readdir(&path).await?;
        return Ok(Json(ListingResponse {
            bucket: fs.bucket().to_string(),
            path,
            entries,
        })
        .into_response());
    }

    let object = fs.stat_object(&path).await?;
    let reader = handle.into_reader()?;
    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &object);
    Ok(response)
}

/// HEAD: same headers as GET without a body, plus the object length.
pub async fn head_path(
    State(state): State<AppState>,
    Path(raw_path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (fs, path) = open_fs(&state, &raw_path, &headers)?;
    let info = fs.stat(&path).await?;
    let mut response = Response::new(Body::empty());
    if info.is_dir() {
        set_directory_headers(response.headers_mut(), &info);
    } else {
        let object = fs.stat_object(&path).await?;
        set_object_headers(response.headers_mut(), &object);
        set_header(response.headers_mut(), header::CONTENT_LENGTH, object.size.max(0).to_string());
    }
    Ok(response)
}

/// PUT: stream the request body into a write handle.
///
/// A body error mid-stream aborts the session; orphaned chunk keys are
/// logged for cleanup.
pub async fn put_path(
    State(state): State<AppState>,
    Path(raw_path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let (fs, path) = open_fs(&state, &raw_path, &headers)?;
    let mut handle = fs.open_for_write(&path)?;
    let mut stream = body.into_data_stream();

    while let Some(next) = stream.next().await {
        let outcome = match next {
            Ok(bytes) => handle.write(&bytes).await.map_err(AppError::from),
            Err(err) => Err(AppError::bad_request(format!("request body interrupted: {}", err))),
        };
        if let Err(err) = outcome {
            let orphaned = handle.abort();
            warn!(
                bucket = %fs.bucket(),
                path = %path,
                orphaned = ?orphaned,
                "upload aborted: {}",
                err
            );
            return Err(err);
        }
    }

    let summary = match handle.close().await {
        Ok(Some(summary)) => summary,
        Ok(None) => return Err(AppError::internal("write handle produced no upload summary")),
        Err(err) => {
            warn!(
                bucket = %fs.bucket(),
                path = %path,
                orphaned = ?err.orphaned_keys(),
                "upload failed at close: {}",
                err
            );
            return Err(err.into());
        }
    };
    info!(
        bucket = %fs.bucket(),
        path = %path,
        size = summary.size,
        chunks = summary.chunk_count,
        "upload complete"
    );

    let mut response = (StatusCode::CREATED, Json(&summary)).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", summary.content_hash)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// DELETE: remove a file or a whole directory.
pub async fn delete_path(
    State(state): State<AppState>,
    Path(raw_path): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let (fs, path) = open_fs(&state, &raw_path, &headers)?;
    fs.remove(&path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST: `?op=mkdir` or `?op=rename&to=/new/path` (same bucket).
pub async fn post_path(
    State(state): State<AppState>,
    Path(raw_path): Path<String>,
    Query(q): Query<FsOpQuery>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let (fs, path) = open_fs(&state, &raw_path, &headers)?;
    match q.op.as_str() {
        "mkdir" => {
            fs.mkdir(&path).await?;
            Ok(StatusCode::CREATED)
        }
        "rename" => {
            let to = q
                .to
                .ok_or_else(|| AppError::bad_request("rename requires a `to` parameter"))?;
            fs.rename(&path, &to).await?;
            Ok(StatusCode::NO_CONTENT)
        }
        other => Err(AppError::bad_request(format!("unknown operation `{}`", other))),
    }
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

fn set_object_headers(headers: &mut HeaderMap, object: &ObjectInfo) {
    let content_type = object
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    set_header(headers, header::CONTENT_TYPE, content_type);
    if !object.etag.is_empty() {
        set_header(headers, header::ETAG, format!("\"{}\"", object.etag));
    }
    set_header(headers, header::LAST_MODIFIED, object.last_modified.to_rfc2822());
    set_header(headers, FILE_MODE_HEADER, format!("{:o}", EntryKind::File.mode()));
}

fn set_directory_headers(headers: &mut HeaderMap, info: &FileInfo) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-directory"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    set_header(headers, header::LAST_MODIFIED, info.mod_time.to_rfc2822());
    set_header(headers, FILE_MODE_HEADER, format!("{:o}", info.mode()));
}
