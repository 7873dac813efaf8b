//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok"), no I/O
//! - GET /readyz   -> metadata database, object store round trip through the
//!   `ObjectStore` trait, and the write-buffer gauge

use crate::{services::object_store::ObjectStore, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, io::Cursor};
use tracing::warn;
use uuid::Uuid;

/// Bucket holding short-lived readiness objects under random keys.
const READY_BUCKET: &str = ".readyz";
const READY_PAYLOAD: &[u8] = b"readyz";

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when every check passes, 503 otherwise. The write-buffer gauge is
/// informational and never fails readiness.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("metadata", CheckStatus::from(check_metadata(&state).await));
    checks.insert("object_store", CheckStatus::from(check_object_store(&state).await));

    let ready = checks.values().all(|c| c.ok);
    if !ready {
        warn!(checks = ?checks, "readiness check failed");
    }

    let budget = &state.fs.budget;
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        backend: state.fs.store.kind(),
        checks,
        memory: MemoryGauge {
            in_use: budget.in_use(),
            peak: budget.peak(),
            ceiling: budget.ceiling(),
            under_pressure: budget.under_pressure(),
        },
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_metadata(state: &AppState) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {v}")),
        Err(e) => Err(format!("error: {e}")),
    }
}

/// Put, stat, list and delete one object through the store interface, so
/// the probe covers whatever backend is configured.
async fn check_object_store(state: &AppState) -> Result<(), String> {
    let store = &state.fs.store;
    let key = format!("probe-{}", Uuid::new_v4().simple());
    let size = READY_PAYLOAD.len() as u64;

    store
        .put(READY_BUCKET, &key, Box::new(Cursor::new(READY_PAYLOAD)), size, None)
        .await
        .map_err(|e| format!("put failed: {e}"))?;

    let outcome = verify_stored(store.as_ref(), &key, size).await;

    let cleanup = store
        .delete(READY_BUCKET, &key)
        .await
        .map_err(|e| format!("delete failed: {e}"));
    outcome.and(cleanup)
}

async fn verify_stored(store: &dyn ObjectStore, key: &str, size: u64) -> Result<(), String> {
    let info = store
        .stat(READY_BUCKET, key)
        .await
        .map_err(|e| format!("stat failed: {e}"))?;
    if info.size as u64 != size {
        return Err(format!("stored {} bytes, expected {size}", info.size));
    }
    store
        .list(READY_BUCKET, "", 1)
        .await
        .map_err(|e| format!("list failed: {e}"))?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    backend: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
    memory: MemoryGauge,
}

#[derive(Serialize)]
struct MemoryGauge {
    in_use: u64,
    peak: u64,
    ceiling: u64,
    under_pressure: bool,
}

#[derive(Serialize, Debug)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}
