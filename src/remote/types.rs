//! Remote cache service wire types

use serde::{Deserialize, Serialize};

/// Response from the cache lookup endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactCacheEntry {
    /// Key of the matched entry (may differ from the requested key)
    #[serde(default)]
    pub cache_key: Option<String>,
    /// Pre-signed URL the archive can be downloaded from
    #[serde(default)]
    pub archive_location: Option<String>,
}

/// Request body for reserving a new cache entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveCacheRequest<'a> {
    pub key: &'a str,
    pub version: &'a str,
    pub cache_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveCacheResponse {
    pub cache_id: u64,
}

/// Request body for committing an uploaded entry
#[derive(Debug, Serialize)]
pub struct CommitCacheRequest {
    pub size: u64,
}
