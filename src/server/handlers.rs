//! Route handlers

use std::borrow::Cow;
use std::io::{self, Cursor};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error, info, warn};

use super::protocol::{
    HealthResponse, MetricsResponse, StatusResponse, ARTIFACT_TAG_HEADER, SHUTDOWN_TOKEN_HEADER,
};
use super::shutdown::ShutdownOutcome;
use super::AppState;
use crate::artifact::{ArtifactHash, ArtifactReader, LimitedReader};
use crate::backend::{ArtifactStat, FetchedArtifact};
use crate::error::GatewayError;
use crate::tracker::{format_summary, Operation};

/// Payload stored and fetched by `/ping`
const PING_PAYLOAD: &[u8] = b"ping";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Tag sent with an upload, empty meaning none
///
/// Bytes that are not UTF-8 are replaced instead of dropping the tag.
fn artifact_tag(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(ARTIFACT_TAG_HEADER)?;
    let tag = String::from_utf8_lossy(value.as_bytes());
    if let Cow::Owned(replaced) = &tag {
        debug!(tag = %replaced, "Artifact tag is not valid UTF-8, replaced invalid bytes");
    }
    Some(tag.into_owned()).filter(|t| !t.is_empty())
}

/// Declared body length; absent or malformed counts as 0
fn declared_length(headers: &HeaderMap) -> u64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Adapt a request body into an artifact stream capped at `limit` bytes
fn body_reader(body: Body, limit: u64) -> ArtifactReader {
    let stream = body.into_data_stream().map_err(io::Error::other);
    Box::pin(LimitedReader::new(StreamReader::new(stream), limit))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        uptime: state.uptime_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let snapshot = state.tracker.snapshot();
    Json(MetricsResponse::from_snapshot(&snapshot, state.uptime_secs()))
}

/// Store and immediately fetch a throwaway artifact
pub async fn ping(State(state): State<AppState>) -> Json<StatusResponse> {
    let round_trip = async {
        let hash = ArtifactHash::parse(&format!("ping-{}", Utc::now().timestamp_millis()))?;
        let payload: ArtifactReader = Box::pin(Cursor::new(PING_PAYLOAD));

        state.provider.save(&hash, Some("ping"), payload).await?;
        Ok::<_, GatewayError>(state.provider.get(&hash).await?)
    };

    match round_trip.await {
        Ok(Some(_)) => Json(StatusResponse::message(true, "Cache operational")),
        Ok(None) => {
            warn!("Ping artifact was stored but could not be fetched");
            Json(StatusResponse::message(false, "Cache test failed"))
        }
        Err(e) => {
            warn!(error = %e, "Ping failed");
            Json(StatusResponse::error(e.to_string()))
        }
    }
}

pub async fn shutdown(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, GatewayError> {
    match state.shutdown.begin(header_str(&headers, SHUTDOWN_TOKEN_HEADER)) {
        ShutdownOutcome::Rejected => Err(GatewayError::Unauthorized),
        ShutdownOutcome::AlreadyDraining => {
            Ok(Json(StatusResponse::message(true, "Already shutting down")))
        }
        ShutdownOutcome::Started => {
            let snapshot = state.tracker.snapshot();
            println!("{}", format_summary(&snapshot));
            for operation in Operation::ALL {
                let timing = snapshot.timing(operation);
                debug!(
                    operation = operation.as_str(),
                    calls = timing.count,
                    avg_ms = timing.average_ms(),
                    "Operation timing"
                );
            }
            state.shutdown.schedule_termination();
            Ok(Json(StatusResponse::ok()))
        }
    }
}

pub async fn upload_artifact(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<StatusResponse>, GatewayError> {
    let hash = ArtifactHash::parse(&hash)?;

    let declared = declared_length(&headers);
    if declared > state.max_payload {
        warn!(hash = %hash, declared = declared, limit = state.max_payload, "Rejected oversized upload");
        return Err(GatewayError::PayloadTooLarge);
    }

    let tag = artifact_tag(&headers);
    let reader = body_reader(body, state.max_payload);

    if let Err(e) = state.provider.save(&hash, tag.as_deref(), reader).await {
        error!(hash = %hash, error = %e, "Upload failed");
        return Err(e.into());
    }

    // Declared length, not bytes actually received
    state.tracker.record_upload(declared);
    info!(hash = %hash, tag = ?tag, size = declared, "Artifact uploaded");

    Ok(Json(StatusResponse::ok()))
}

pub async fn download_artifact(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, GatewayError> {
    let hash = match ArtifactHash::parse(&hash) {
        Ok(hash) => hash,
        Err(e) => {
            state.tracker.record_miss();
            return Err(e);
        }
    };

    match state.provider.get(&hash).await {
        Ok(Some(artifact)) => {
            state.tracker.record_hit(artifact.size);
            debug!(hash = %hash, size = ?artifact.size, "Cache hit");
            Ok(artifact_response(artifact))
        }
        Ok(None) => {
            state.tracker.record_miss();
            debug!(hash = %hash, "Cache miss");
            Ok((StatusCode::NOT_FOUND, Json(StatusResponse::failed())).into_response())
        }
        Err(e) => {
            // Failed lookups count as misses for the hit rate
            state.tracker.record_miss();
            error!(hash = %hash, error = %e, "Download failed");
            Err(e.into())
        }
    }
}

/// Existence check; leaves the hit and download counters alone
pub async fn head_artifact(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, GatewayError> {
    let hash = ArtifactHash::parse(&hash)?;

    match state.provider.stat(&hash).await {
        Ok(Some(stat)) => {
            let mut response = StatusCode::OK.into_response();
            artifact_headers(&mut response, stat);
            Ok(response)
        }
        Ok(None) => Ok(StatusCode::NOT_FOUND.into_response()),
        Err(e) => {
            error!(hash = %hash, error = %e, "Existence check failed");
            Err(e.into())
        }
    }
}

/// Stream an artifact back without buffering it
fn artifact_response(artifact: FetchedArtifact) -> Response {
    let mut response = Body::from_stream(ReaderStream::new(artifact.reader)).into_response();
    artifact_headers(
        &mut response,
        ArtifactStat {
            size: artifact.size,
            tag: artifact.tag,
        },
    );
    response
}

fn artifact_headers(response: &mut Response, stat: ArtifactStat) {
    let headers = response.headers_mut();

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Some(size) = stat.size {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    }
    if let Some(tag) = stat.tag {
        match HeaderValue::from_bytes(tag.as_bytes()) {
            Ok(value) => {
                headers.insert(ARTIFACT_TAG_HEADER, value);
            }
            Err(_) => warn!(tag = %tag, "Artifact tag is not a valid header value"),
        }
    }
}
