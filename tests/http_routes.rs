//! HTTP surface tests, driven through the router with `oneshot`.
//!
//! Covers:
//! - PUT streaming into files, small and chunked
//! - GET file bodies vs. JSON listings, HEAD headers
//! - POST mkdir/rename, DELETE
//! - Identity header and path validation failures
//! - A request body that breaks mid-upload
//! - Readiness probing the object store

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use bucketfs::{
    models::upload::WriterSettings,
    routes::routes::routes,
    services::{
        filesystem::{FsOptions, FsService},
        memory_store::MemoryObjectStore,
        metadata_store::{SqliteMetadataStore, run_migrations},
    },
    state::AppState,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const KIB: usize = 1024;

struct TestApp {
    router: Router,
    store: Arc<MemoryObjectStore>,
}

async fn app(writer: WriterSettings) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("bucketfs=debug")
        .with_test_writer()
        .try_init();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    let db = Arc::new(pool);

    let store = Arc::new(MemoryObjectStore::new());
    let metadata = Arc::new(SqliteMetadataStore::new(db.clone()));
    let options = FsOptions {
        writer,
        ..FsOptions::default()
    };
    let state = AppState {
        fs: FsService::new(store.clone(), metadata, options),
        db,
    };
    TestApp {
        router: routes().with_state(state),
        store,
    }
}

fn small_writer() -> WriterSettings {
    WriterSettings {
        buffer_size: KIB,
        memory_ceiling: 1024 * KIB as u64,
        chunk_threshold: 4 * KIB as u64,
    }
}

impl TestApp {
    async fn send(&self, method: Method, uri: &str, owner: Uuid, body: Body) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-owner-id", owner.to_string())
            .body(body)
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn put(&self, uri: &str, owner: Uuid, data: impl Into<Bytes>) -> Response {
        self.send(Method::PUT, uri, owner, Body::from(data.into())).await
    }

    async fn get(&self, uri: &str, owner: Uuid) -> Response {
        self.send(Method::GET, uri, owner, Body::empty()).await
    }
}

async fn body_bytes(response: Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn entry_names(listing: &Value) -> Vec<String> {
    listing["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap().to_string())
        .collect()
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Uploads and reads
// ============================================================================

#[tokio::test]
async fn test_put_then_get_round_trip() {
    let app = app(WriterSettings::default()).await;
    let owner = Uuid::new_v4();

    let response = app.put("/bk/hello.txt", owner, "Hello, World!").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let expected_md5 = format!("{:x}", md5::compute(b"Hello, World!"));
    assert_eq!(
        header_str(&response, header::ETAG),
        Some(format!("\"{expected_md5}\"").as_str())
    );
    let summary = body_json(response).await;
    assert_eq!(summary["size"], 13);
    assert_eq!(summary["content_hash"], expected_md5.as_str());
    assert_eq!(summary["chunk_count"], 0);
    assert_eq!(app.store.put_calls().len(), 1);

    let response = app.get("/bk/hello.txt", owner).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        Some("application/octet-stream")
    );
    assert_eq!(header_str(&response, header::HeaderName::from_static("x-file-mode")), Some("644"));
    assert_eq!(body_bytes(response).await, &b"Hello, World!"[..]);
}

#[tokio::test]
async fn test_streamed_put_in_pieces_crosses_into_chunks() {
    let app = app(small_writer()).await;
    let owner = Uuid::new_v4();
    let data: Vec<u8> = (0..10 * KIB).map(|i| (i % 251) as u8).collect();
    let pieces: Vec<Result<Bytes, std::io::Error>> = data
        .chunks(700)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let response = app
        .send(
            Method::PUT,
            "/bk/big.bin",
            owner,
            Body::from_stream(futures::stream::iter(pieces)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let summary = body_json(response).await;
    assert_eq!(summary["size"], 10 * KIB);
    assert!(summary["chunk_count"].as_u64().unwrap() > 0);

    let response = app.get("/bk/big.bin", owner).await;
    assert_eq!(body_bytes(response).await, data);
    assert_eq!(app.store.keys("bk"), vec!["big.bin".to_string()]);
}

#[tokio::test]
async fn test_interrupted_body_aborts_without_creating_file() {
    let app = app(WriterSettings {
        buffer_size: 4,
        ..small_writer()
    })
    .await;
    let owner = Uuid::new_v4();
    let pieces: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"abcdefgh")),
        Err(std::io::Error::other("client went away")),
    ];

    let response = app
        .send(
            Method::PUT,
            "/bk/partial.bin",
            owner,
            Body::from_stream(futures::stream::iter(pieces)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.store.object_bytes("bk", "partial.bin").is_none());
    let response = app.send(Method::HEAD, "/bk/partial.bin", owner, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_headers_follow_object_after_another_owner_overwrites() {
    let app = app(WriterSettings::default()).await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    assert_eq!(app.put("/bk/shared", alice, "Hello, World!").await.status(), StatusCode::CREATED);
    assert_eq!(app.put("/bk/shared", bob, "abc").await.status(), StatusCode::CREATED);

    let response = app.send(Method::HEAD, "/bk/shared", alice, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("3"));
    let expected_etag = format!("\"{:x}\"", md5::compute(b"abc"));
    assert_eq!(header_str(&response, header::ETAG), Some(expected_etag.as_str()));

    let response = app.get("/bk/shared", alice).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::ETAG), Some(expected_etag.as_str()));
    assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    assert_eq!(body_bytes(response).await, &b"abc"[..]);
}

// ============================================================================
// Directories
// ============================================================================

#[tokio::test]
async fn test_mkdir_listing_rename_and_delete() {
    let app = app(WriterSettings::default()).await;
    let owner = Uuid::new_v4();

    let response = app.send(Method::POST, "/bk/docs?op=mkdir", owner, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.put("/bk/docs/a.txt", owner, "alpha").await.status(), StatusCode::CREATED);
    assert_eq!(app.put("/bk/top.txt", owner, "top").await.status(), StatusCode::CREATED);

    let response = app.get("/bk", owner).await;
    assert_eq!(response.status(), StatusCode::OK);
    let root = body_json(response).await;
    assert_eq!(root["bucket"], "bk");
    assert_eq!(root["path"], "/");
    assert_eq!(entry_names(&root), vec!["docs", "top.txt"]);
    assert_eq!(root["entries"][0]["kind"], "directory");
    assert_eq!(root["entries"][1]["kind"], "file");
    assert_eq!(root["entries"][1]["size"], 3);

    let response = app.send(Method::HEAD, "/bk/docs", owner, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        Some("application/x-directory")
    );
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("0"));

    let response = app
        .send(
            Method::POST,
            "/bk/docs/a.txt?op=rename&to=/docs/b.txt",
            owner,
            Body::empty(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let listing = body_json(app.get("/bk/docs", owner).await).await;
    assert_eq!(entry_names(&listing), vec!["b.txt"]);
    assert_eq!(body_bytes(app.get("/bk/docs/b.txt", owner).await).await, &b"alpha"[..]);

    let response = app.send(Method::DELETE, "/bk/docs", owner, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.get("/bk/docs", owner).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.store.keys("bk"), vec!["top.txt".to_string()]);
}

#[tokio::test]
async fn test_rename_without_target_and_unknown_op_are_rejected() {
    let app = app(WriterSettings::default()).await;
    let owner = Uuid::new_v4();
    app.put("/bk/f", owner, "x").await;

    let response = app.send(Method::POST, "/bk/f?op=rename", owner, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app.send(Method::POST, "/bk/f?op=chmod", owner, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["status"], 400);
}

// ============================================================================
// Request validation
// ============================================================================

#[tokio::test]
async fn test_missing_or_malformed_owner_is_bad_request() {
    let app = app(WriterSettings::default()).await;

    let request = Request::builder().uri("/bk/f").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .uri("/bk/f")
        .header("x-owner-id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_traversal_and_root_writes_are_rejected() {
    let app = app(WriterSettings::default()).await;
    let owner = Uuid::new_v4();

    assert_eq!(app.get("/bk/a/../../etc", owner).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        app.put("/bk/%2e%2e/escape", owner, "x").await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(app.put("/bk", owner, "x").await.status(), StatusCode::CONFLICT);
    assert!(app.store.put_calls().is_empty());
}

#[tokio::test]
async fn test_get_missing_file_is_not_found() {
    let app = app(WriterSettings::default()).await;
    let response = app.get("/bk/nope.txt", Uuid::new_v4()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Probes
// ============================================================================

#[tokio::test]
async fn test_readiness_round_trips_through_object_store() {
    let app = app(WriterSettings::default()).await;

    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ready = body_json(response).await;
    assert_eq!(ready["status"], "ok");
    assert_eq!(ready["backend"], "memory");
    assert_eq!(ready["checks"]["metadata"]["ok"], true);
    assert_eq!(ready["checks"]["object_store"]["ok"], true);
    assert_eq!(ready["memory"]["in_use"], 0);

    assert_eq!(app.store.put_calls().len(), 1);
    assert!(app.store.keys(".readyz").is_empty());
}
