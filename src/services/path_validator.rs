//! src/services/path_validator.rs
//!
//! Pure validation for bucket names and filesystem paths. Every bucket and
//! path that crosses the trust boundary passes through here before any
//! filesystem operation runs; nothing in this module performs I/O.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("request path is empty")]
    EmptyRequest,
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucket { name: String, reason: String },
    #[error("path `{0}` contains a parent-directory segment")]
    Traversal(String),
    #[error("path `{0}` contains control characters")]
    ControlCharacter(String),
    #[error("path `{path}` escapes bucket `{bucket}`")]
    EscapesBucket { bucket: String, path: String },
}

pub type PathResult<T> = Result<T, PathError>;

/// Validate a bucket name.
///
/// Rejects names that are empty, `.`, or contain `..`, `/`, `\` or ASCII
/// control characters. Such names never reach a storage call.
pub fn validate_bucket(name: &str) -> PathResult<()> {
    let invalid = |reason: &str| PathError::InvalidBucket {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name == "." {
        return Err(invalid("must not be `.`"));
    }
    if name.contains("..") {
        return Err(invalid("must not contain `..`"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("must not contain path separators"));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(invalid("must not contain control characters"));
    }
    Ok(())
}

/// Collapse repeated separators, drop `.` segments and force a single
/// leading `/`. Trailing separators are dropped; the root is `/`.
///
/// Callers must reject `..` before calling this.
pub fn canonicalize(raw: &str) -> String {
    let segments: Vec<&str> = raw
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Validate `raw_path` inside `bucket` and return its canonical form.
///
/// Any `..` anywhere in the raw input fails, even when it would not escape
/// the root. The canonical `/{bucket}{path}` is re-checked for containment
/// in `/{bucket}` after normalization.
pub fn validate_path(bucket: &str, raw_path: &str) -> PathResult<String> {
    validate_bucket(bucket)?;

    if raw_path.is_empty() {
        return Ok("/".to_string());
    }
    if raw_path.contains("..") {
        return Err(PathError::Traversal(raw_path.to_string()));
    }
    if raw_path.chars().any(|c| c.is_control()) {
        return Err(PathError::ControlCharacter(raw_path.to_string()));
    }

    let canonical = canonicalize(raw_path);
    let base = format!("/{bucket}");
    let full = format!("{base}{canonical}");
    if !is_contained(&base, &full) {
        return Err(PathError::EscapesBucket {
            bucket: bucket.to_string(),
            path: raw_path.to_string(),
        });
    }

    Ok(canonical)
}

/// Split a request path of the form `/{bucket}/{rest}` and validate both.
///
/// Returns `(bucket, canonical_path)`; the path is `/` when only the bucket
/// is given.
pub fn extract_bucket_and_path(url_path: &str) -> PathResult<(String, String)> {
    if url_path.is_empty() || url_path == "/" {
        return Err(PathError::EmptyRequest);
    }
    if url_path.contains("..") {
        return Err(PathError::Traversal(url_path.to_string()));
    }

    let cleaned = canonicalize(url_path);
    let trimmed = cleaned.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(PathError::EmptyRequest);
    }

    let (bucket, rest) = match trimmed.split_once('/') {
        Some((bucket, rest)) => (bucket, format!("/{rest}")),
        None => (trimmed, "/".to_string()),
    };

    let path = validate_path(bucket, &rest)?;
    Ok((bucket.to_string(), path))
}

/// `target` equals `base` or sits beneath it on a segment boundary.
fn is_contained(base: &str, target: &str) -> bool {
    match target.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest.starts_with('/') && !rest.split('/').any(|seg| seg == ".."),
        None => false,
    }
}
