//! JSON bodies exchanged with cache clients
//!
//! Every JSON response carries an `ok` boolean.

use serde::Serialize;

use crate::tracker::TrackerSnapshot;

/// Header carrying the shutdown secret
pub const SHUTDOWN_TOKEN_HEADER: &str = "x-shutdown-token";

/// Header carrying the artifact tag on upload and download
pub const ARTIFACT_TAG_HEADER: &str = "x-artifact-tag";

/// Generic `{ ok, message?, error? }` response
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
            error: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            ok: false,
            message: None,
            error: None,
        }
    }

    pub fn message(ok: bool, message: impl Into<String>) -> Self {
        Self {
            ok,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    /// Seconds since startup
    pub uptime: u64,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub uploads: u64,
    pub downloads: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingStats {
    pub avg_save_ms: u64,
    pub avg_get_ms: u64,
}

/// Metrics endpoint response
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub ok: bool,
    pub uptime: u64,
    pub cache: CacheStats,
    pub operations: OperationStats,
    pub timing: TimingStats,
}

impl MetricsResponse {
    pub fn from_snapshot(snapshot: &TrackerSnapshot, uptime: u64) -> Self {
        Self {
            ok: true,
            uptime,
            cache: CacheStats {
                hits: snapshot.hits,
                misses: snapshot.misses,
                hit_rate: snapshot.hit_rate(),
            },
            operations: OperationStats {
                uploads: snapshot.uploads,
                downloads: snapshot.downloads,
                bytes_uploaded: snapshot.bytes_uploaded,
                bytes_downloaded: snapshot.bytes_downloaded,
            },
            timing: TimingStats {
                avg_save_ms: snapshot.save.average_ms(),
                avg_get_ms: snapshot.get.average_ms(),
            },
        }
    }
}
