//! HTTP server
//!
//! Exposes the Turborepo remote cache API on top of the [`Provider`], plus
//! health, metrics and shutdown endpoints used by the CI workflow.

pub mod compat;
pub mod handlers;
pub mod protocol;
pub mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::provider::Provider;
use crate::tracker::Tracker;
use protocol::StatusResponse;
use shutdown::ShutdownCoordinator;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<Provider>,
    pub tracker: Arc<Tracker>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub started_at: Instant,
    /// Largest accepted upload, in bytes
    pub max_payload: u64,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        provider: Arc<Provider>,
        tracker: Arc<Tracker>,
        shutdown: Arc<ShutdownCoordinator>,
        max_payload: u64,
        request_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            tracker,
            shutdown,
            started_at: Instant::now(),
            max_payload,
            request_timeout,
        }
    }

    /// Whole seconds since the server started
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Build the gateway's router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/ping", get(handlers::ping))
        .route("/shutdown", delete(handlers::shutdown))
        .route(
            "/v8/artifacts/{hash}",
            get(handlers::download_artifact)
                .head(handlers::head_artifact)
                .put(handlers::upload_artifact),
        )
        .route(
            "/artifacts/{hash}",
            get(handlers::download_artifact)
                .head(handlers::head_artifact)
                .put(handlers::upload_artifact),
        )
        .route("/v8/artifacts/status", get(compat::artifacts_status))
        .route("/v5/user/tokens/current", get(compat::current_token))
        .route("/v2/user", get(compat::user))
        .route("/v2/teams", get(compat::teams))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_deadline))
        .layer(middleware::from_fn_with_state(state.clone(), reject_when_draining))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Refuse new work once draining has started
///
/// `DELETE /shutdown` stays reachable so repeated requests get their
/// idempotent answer.
async fn reject_when_draining(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.shutdown.is_draining() && request.uri().path() != "/shutdown" {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse::error("Server is shutting down")),
        )
            .into_response();
    }

    next.run(request).await
}

/// Bound the time spent producing a response
async fn enforce_deadline(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();

    match tokio::time::timeout(state.request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(path = %path, timeout_secs = state.request_timeout.as_secs(), "Request timed out");
            GatewayError::Timeout.into_response()
        }
    }
}

/// Bind the listener and serve until shutdown or Ctrl-C
pub async fn serve(config: &GatewayConfig, provider: Arc<Provider>, tracker: Arc<Tracker>) -> Result<()> {
    let coordinator = Arc::new(ShutdownCoordinator::new(
        config.shutdown_token.clone(),
        config.shutdown_grace,
    ));
    let backend = provider.kind();
    let state = AppState::new(
        provider,
        tracker,
        Arc::clone(&coordinator),
        config.max_payload,
        config.request_timeout,
    );

    let address = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!(address = %address, backend = backend.as_str(), "Cache gateway listening");

    let terminate = coordinator.termination_token();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = terminate.cancelled() => {}
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Interrupted, shutting down"),
                    Err(e) => {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                        terminate.cancelled().await;
                    }
                },
            }
        })
        .await
        .context("Server error")?;

    info!("Cache gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::remote::tests::MemoryCacheClient;
    use crate::backend::{Backend, FilesystemBackend, RemoteBackend};
    use crate::remote::{CacheClient, RemoteCacheError};
    use crate::tracker::TrackerSnapshot;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, HeaderValue, Method};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use tower::ServiceExt;

    const TOKEN: &str = "secret";

    /// Cache service that rejects every call
    struct FailingClient;

    #[async_trait]
    impl CacheClient for FailingClient {
        async fn save(&self, _key: &str, _archive: &Path, _size: u64) -> Result<(), RemoteCacheError> {
            Err(RemoteCacheError::Server(500, "boom".into()))
        }

        async fn find(&self, _key: &str) -> Result<Option<String>, RemoteCacheError> {
            Err(RemoteCacheError::Server(500, "boom".into()))
        }

        async fn restore(&self, _destination: &Path, _key: &str) -> Result<Option<String>, RemoteCacheError> {
            Err(RemoteCacheError::Server(500, "boom".into()))
        }
    }

    /// Cache service that never answers in time
    struct StalledClient;

    #[async_trait]
    impl CacheClient for StalledClient {
        async fn save(&self, _key: &str, _archive: &Path, _size: u64) -> Result<(), RemoteCacheError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        async fn find(&self, _key: &str) -> Result<Option<String>, RemoteCacheError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn restore(&self, _destination: &Path, _key: &str) -> Result<Option<String>, RemoteCacheError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    struct Harness {
        state: AppState,
        artifacts: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn state_for(backend: Backend, max_payload: u64, request_timeout: Duration) -> AppState {
        let tracker = Arc::new(Tracker::new());
        let provider = Arc::new(Provider::new(backend, Arc::clone(&tracker)));
        let shutdown = Arc::new(ShutdownCoordinator::new(TOKEN.into(), Duration::from_millis(500)));
        AppState::new(provider, tracker, shutdown, max_payload, request_timeout)
    }

    fn harness(max_payload: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        let backend = Backend::Filesystem(FilesystemBackend::new(artifacts.clone()).unwrap());

        Harness {
            state: state_for(backend, max_payload, Duration::from_secs(30)),
            artifacts,
            _dir: dir,
        }
    }

    fn remote_harness(client: Arc<dyn CacheClient>, request_timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let backend = Backend::Remote(RemoteBackend::new(client, staging.clone()).unwrap());

        Harness {
            state: state_for(backend, 1024, request_timeout),
            artifacts: staging,
            _dir: dir,
        }
    }

    fn upload(path: &str, tag: Option<HeaderValue>, body: &'static [u8]) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::put(path).header(header::CONTENT_LENGTH, body.len());
        if let Some(tag) = tag {
            builder = builder.header(protocol::ARTIFACT_TAG_HEADER, tag);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn send(state: &AppState, request: axum::http::Request<Body>) -> Response {
        router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn get_path(state: &AppState, path: &str) -> Response {
        send(state, axum::http::Request::get(path).body(Body::empty()).unwrap()).await
    }

    async fn shutdown_with(state: &AppState, token: Option<&str>) -> Response {
        let mut builder = axum::http::Request::builder().method(Method::DELETE).uri("/shutdown");
        if let Some(token) = token {
            builder = builder.header(protocol::SHUTDOWN_TOKEN_HEADER, token);
        }
        send(state, builder.body(Body::empty()).unwrap()).await
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let h = harness(1024);

        let upload = axum::http::Request::put("/v8/artifacts/abc123")
            .header(header::CONTENT_LENGTH, "5")
            .header(protocol::ARTIFACT_TAG_HEADER, "v1")
            .body(Body::from("hello"))
            .unwrap();
        let response = send(&h.state, upload).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "ok": true }));

        let response = get_path(&h.state, "/v8/artifacts/abc123").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(body_bytes(response).await, b"hello");

        let metrics = body_json(get_path(&h.state, "/metrics").await).await;
        assert_eq!(metrics["cache"]["hits"], 1);
        assert_eq!(metrics["cache"]["misses"], 0);
        assert_eq!(metrics["cache"]["hitRate"], 100.0);
        assert_eq!(metrics["operations"]["uploads"], 1);
        assert_eq!(metrics["operations"]["downloads"], 1);
        assert_eq!(metrics["operations"]["bytesUploaded"], 5);
        assert_eq!(metrics["operations"]["bytesDownloaded"], 5);
    }

    #[tokio::test]
    async fn test_alias_route_shares_storage() {
        let h = harness(1024);

        let upload = axum::http::Request::put("/artifacts/shared")
            .body(Body::from("data"))
            .unwrap();
        assert_eq!(send(&h.state, upload).await.status(), StatusCode::OK);

        let response = get_path(&h.state, "/v8/artifacts/shared").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"data");
    }

    #[tokio::test]
    async fn test_head_missing_is_not_found() {
        let h = harness(1024);

        let head = axum::http::Request::head("/v8/artifacts/deadbeef")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h.state, head).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_a_miss() {
        let h = harness(1024);

        let response = get_path(&h.state, "/v8/artifacts/deadbeef").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, serde_json::json!({ "ok": false }));

        let metrics = body_json(get_path(&h.state, "/metrics").await).await;
        assert_eq!(metrics["cache"]["hits"], 0);
        assert_eq!(metrics["cache"]["misses"], 1);
        assert_eq!(metrics["cache"]["hitRate"], 0.0);
    }

    #[tokio::test]
    async fn test_declared_oversize_rejected_before_reading() {
        let h = harness(8);

        let upload = axum::http::Request::put("/v8/artifacts/big")
            .header(header::CONTENT_LENGTH, "100")
            .body(Body::from("tiny"))
            .unwrap();
        let response = send(&h.state, upload).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(response).await["ok"], false);

        assert!(!h.artifacts.join("big").exists());
        assert_eq!(h.state.tracker.snapshot().save.count, 0);
    }

    #[tokio::test]
    async fn test_streamed_oversize_stores_nothing() {
        let h = harness(8);

        let upload = axum::http::Request::put("/v8/artifacts/big")
            .body(Body::from(vec![7u8; 64]))
            .unwrap();
        let response = send(&h.state, upload).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        assert!(!h.artifacts.join("big").exists());
        let leftovers = std::fs::read_dir(&h.artifacts).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(h.state.tracker.snapshot().uploads, 0);
    }

    #[tokio::test]
    async fn test_invalid_hash_rejected() {
        let h = harness(1024);

        let upload = axum::http::Request::put("/v8/artifacts/bad%20hash")
            .body(Body::from("x"))
            .unwrap();
        assert_eq!(send(&h.state, upload).await.status(), StatusCode::BAD_REQUEST);

        let response = get_path(&h.state, "/v8/artifacts/..").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_shutdown_requires_token() {
        let h = harness(1024);

        let response = shutdown_with(&h.state, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Unauthorized");

        let response = shutdown_with(&h.state, Some("guess")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(!h.state.shutdown.is_draining());
        assert_eq!(get_path(&h.state, "/metrics").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_drains() {
        let h = harness(1024);

        let response = shutdown_with(&h.state, Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "ok": true }));

        let response = shutdown_with(&h.state, Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "ok": true, "message": "Already shutting down" })
        );

        let response = get_path(&h.state, "/metrics").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "Server is shutting down");

        let response = get_path(&h.state, "/v8/artifacts/abc").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_and_ping() {
        let h = harness(1024);

        let health = body_json(get_path(&h.state, "/").await).await;
        assert_eq!(health["ok"], true);
        assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
        assert!(health["uptime"].is_u64());

        let ping = body_json(get_path(&h.state, "/ping").await).await;
        assert_eq!(
            ping,
            serde_json::json!({ "ok": true, "message": "Cache operational" })
        );

        // Ping goes through the provider but never through the hit counters
        let snapshot = h.state.tracker.snapshot();
        assert_eq!(snapshot.save.count, 1);
        assert_eq!(snapshot.get.count, 1);
        assert_eq!(snapshot.hits + snapshot.misses, 0);
    }

    #[tokio::test]
    async fn test_compat_routes() {
        let h = harness(1024);

        let status = body_json(get_path(&h.state, "/v8/artifacts/status").await).await;
        assert_eq!(status, serde_json::json!({ "ok": true, "status": "enabled" }));

        let token = body_json(get_path(&h.state, "/v5/user/tokens/current").await).await;
        assert_eq!(token["token"]["id"], "turbogha");

        let user = body_json(get_path(&h.state, "/v2/user").await).await;
        assert_eq!(user["user"]["username"], "turbogha");

        let teams = body_json(get_path(&h.state, "/v2/teams").await).await;
        assert_eq!(teams["teams"][0]["membership"]["role"], "OWNER");
    }

    #[tokio::test]
    async fn test_remote_round_trip_returns_tag() {
        let h = remote_harness(Arc::new(MemoryCacheClient::default()), Duration::from_secs(30));

        let response = send(&h.state, upload("/v8/artifacts/abc123", Some(HeaderValue::from_static("v1")), b"hello")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_path(&h.state, "/v8/artifacts/abc123").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[protocol::ARTIFACT_TAG_HEADER], "v1");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(body_bytes(response).await, b"hello");

        let snapshot = h.state.tracker.snapshot();
        assert_eq!(snapshot.uploads, 1);
        assert_eq!(snapshot.downloads, 1);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.bytes_uploaded, 5);
        assert_eq!(snapshot.bytes_downloaded, 5);
    }

    #[tokio::test]
    async fn test_non_utf8_tag_is_kept() {
        let h = remote_harness(Arc::new(MemoryCacheClient::default()), Duration::from_secs(30));
        let tag = HeaderValue::from_bytes("café".as_bytes()).unwrap();

        let response = send(&h.state, upload("/v8/artifacts/abc", Some(tag), b"hello")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_path(&h.state, "/v8/artifacts/abc").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[protocol::ARTIFACT_TAG_HEADER].as_bytes(),
            "café".as_bytes()
        );
    }

    #[tokio::test]
    async fn test_head_leaves_counters_alone() {
        let h = remote_harness(Arc::new(MemoryCacheClient::default()), Duration::from_secs(30));
        send(&h.state, upload("/v8/artifacts/abc", Some(HeaderValue::from_static("v1")), b"hello")).await;

        let head = axum::http::Request::head("/v8/artifacts/abc").body(Body::empty()).unwrap();
        let response = send(&h.state, head).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[protocol::ARTIFACT_TAG_HEADER], "v1");
        assert!(body_bytes(response).await.is_empty());

        let head = axum::http::Request::head("/artifacts/other").body(Body::empty()).unwrap();
        assert_eq!(send(&h.state, head).await.status(), StatusCode::NOT_FOUND);

        let snapshot = h.state.tracker.snapshot();
        assert_eq!(snapshot.hits + snapshot.misses, 0);
        assert_eq!(snapshot.downloads, 0);
        assert_eq!(snapshot.bytes_downloaded, 0);
        assert_eq!(snapshot.get.count, 0);
        // Nothing was restored into staging
        assert_eq!(std::fs::read_dir(&h.artifacts).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_head_reports_filesystem_size() {
        let h = harness(1024);
        send(&h.state, upload("/v8/artifacts/abc", None, b"hello")).await;

        let head = axum::http::Request::head("/v8/artifacts/abc").body(Body::empty()).unwrap();
        let response = send(&h.state, head).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(h.state.tracker.snapshot().hits, 0);
    }

    #[tokio::test]
    async fn test_failed_upload_is_server_error() {
        let h = remote_harness(Arc::new(FailingClient), Duration::from_secs(30));

        let response = send(&h.state, upload("/v8/artifacts/abc", Some(HeaderValue::from_static("v1")), b"hello")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().starts_with("Remote cache error"));

        let snapshot = h.state.tracker.snapshot();
        assert_eq!(snapshot.uploads, 0);
        assert_eq!(snapshot.bytes_uploaded, 0);
        assert_eq!(snapshot.save.count, 1);
    }

    #[tokio::test]
    async fn test_failed_download_counts_as_miss() {
        let h = remote_harness(Arc::new(FailingClient), Duration::from_secs(30));

        let response = get_path(&h.state, "/v8/artifacts/abc").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["ok"], false);

        let snapshot = h.state.tracker.snapshot();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.get.count, 1);
    }

    #[tokio::test]
    async fn test_ping_reports_backend_failure() {
        let h = remote_harness(Arc::new(FailingClient), Duration::from_secs(30));

        let response = get_path(&h.state, "/ping").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().unwrap().starts_with("Remote cache error"));
    }

    #[tokio::test]
    async fn test_timeout_leaves_tracker_untouched() {
        let h = remote_harness(Arc::new(StalledClient), Duration::from_millis(50));

        let response = get_path(&h.state, "/v8/artifacts/abc").await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body_json(response).await["error"], "Request timed out");

        let response = send(&h.state, upload("/v8/artifacts/abc", None, b"hello")).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        assert_eq!(h.state.tracker.snapshot(), TrackerSnapshot::default());
    }
}
