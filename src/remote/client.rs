//! GitHub Actions cache service client
//!
//! Talks to the artifact-cache API exposed to workflow runs through
//! `ACTIONS_CACHE_URL`: lookup by key prefix, reserve, chunked upload, commit.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::errors::RemoteCacheError;
use super::types::{ArtifactCacheEntry, CommitCacheRequest, ReserveCacheRequest, ReserveCacheResponse};
use super::CacheClient;

/// API version negotiated through the Accept header
const ACCEPT_HEADER: &str = "application/json;api-version=6.0-preview.1";

/// HTTP client timeout (covers a whole archive download)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Delay before each retry
const RETRY_BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

/// Size of each PATCH upload request
const UPLOAD_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// Client for the GitHub Actions cache service
#[derive(Clone)]
pub struct ActionsCacheClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Service base URL (`ACTIONS_CACHE_URL`)
    base_url: String,
    /// Runtime bearer token (`ACTIONS_RUNTIME_TOKEN`)
    token: String,
    /// Entry version; entries are only visible to lookups with the same version
    version: String,
}

impl ActionsCacheClient {
    /// Create a client for the service at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - Cache service URL
    /// * `token` - Runtime token used as bearer credential
    /// * `namespace` - Salt for the entry version, isolating unrelated gateways
    pub fn new(base_url: &str, token: &str, namespace: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let version = version_digest(namespace);
        debug!(base_url = base_url, version = %version, "Remote cache client ready");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            version,
        })
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}/_apis/artifactcache/{}", self.base_url, resource)
    }

    /// Execute an operation with retry logic and backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, key: &str, f: F) -> Result<T, RemoteCacheError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteCacheError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = RETRY_BACKOFF_MS
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or(2000);
                    warn!(
                        operation = operation,
                        key = key,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "Retrying cache operation"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(operation = operation, key = key, error = %e, "Cache operation failed");
                    return Err(e);
                }
            }
        }
    }

    /// Look up the best entry for `key`
    async fn lookup(&self, key: &str) -> Result<Option<ArtifactCacheEntry>, RemoteCacheError> {
        let url = format!(
            "{}?keys={}&version={}",
            self.endpoint("cache"),
            urlencoding::encode(key),
            self.version
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let entry = ensure_success(response).await?.json().await?;
        Ok(Some(entry))
    }

    /// Stream an archive into `destination`, returning its size
    async fn download(&self, location: &str, destination: &Path) -> Result<u64, RemoteCacheError> {
        let response = ensure_success(self.http_client.get(location).send().await?).await?;

        let mut file = File::create(destination).await?;
        let mut body = StreamReader::new(response.bytes_stream().map_err(io::Error::other));
        let size = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;

        Ok(size)
    }

    /// Reserve an entry for `key`
    ///
    /// Returns `None` when the entry already exists (or is being uploaded).
    async fn reserve(&self, key: &str, size: u64) -> Result<Option<u64>, RemoteCacheError> {
        let request = ReserveCacheRequest {
            key,
            version: &self.version,
            cache_size: size,
        };

        let response = self
            .http_client
            .post(self.endpoint("caches"))
            .bearer_auth(&self.token)
            .header(ACCEPT, ACCEPT_HEADER)
            .json(&request)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }

        let reserved: ReserveCacheResponse = ensure_success(response).await?.json().await?;
        Ok(Some(reserved.cache_id))
    }

    async fn upload_chunk(&self, cache_id: u64, offset: u64, chunk: Bytes) -> Result<(), RemoteCacheError> {
        let end = offset + chunk.len() as u64 - 1;

        let response = self
            .http_client
            .patch(self.endpoint(&format!("caches/{cache_id}")))
            .bearer_auth(&self.token)
            .header(ACCEPT, ACCEPT_HEADER)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_RANGE, format!("bytes {offset}-{end}/*"))
            .body(chunk)
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }

    async fn commit(&self, cache_id: u64, size: u64) -> Result<(), RemoteCacheError> {
        let response = self
            .http_client
            .post(self.endpoint(&format!("caches/{cache_id}")))
            .bearer_auth(&self.token)
            .header(ACCEPT, ACCEPT_HEADER)
            .json(&CommitCacheRequest { size })
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheClient for ActionsCacheClient {
    async fn save(&self, key: &str, archive: &Path, size: u64) -> Result<(), RemoteCacheError> {
        let Some(cache_id) = self.with_retry("reserve", key, move || self.reserve(key, size)).await? else {
            info!(key = key, "Cache entry already exists, skipping upload");
            return Ok(());
        };

        let mut file = File::open(archive).await?;
        let mut offset: u64 = 0;

        loop {
            let mut buf = Vec::new();
            let read = (&mut file).take(UPLOAD_CHUNK_SIZE).read_to_end(&mut buf).await?;
            if read == 0 {
                break;
            }

            let chunk = Bytes::from(buf);
            self.with_retry("upload", key, move || self.upload_chunk(cache_id, offset, chunk.clone()))
                .await?;
            offset += read as u64;
        }

        self.with_retry("commit", key, move || self.commit(cache_id, offset))
            .await?;

        debug!(key = key, cache_id = cache_id, size = offset, "Committed cache entry");
        Ok(())
    }

    async fn find(&self, key: &str) -> Result<Option<String>, RemoteCacheError> {
        let entry = self.with_retry("lookup", key, move || self.lookup(key)).await?;
        Ok(entry.and_then(|entry| entry.cache_key))
    }

    async fn restore(&self, destination: &Path, key: &str) -> Result<Option<String>, RemoteCacheError> {
        let Some(entry) = self.with_retry("lookup", key, move || self.lookup(key)).await? else {
            debug!(key = key, "No cache entry");
            return Ok(None);
        };

        let (Some(found_key), Some(location)) = (entry.cache_key, entry.archive_location) else {
            warn!(key = key, "Cache entry without key or archive location");
            return Ok(None);
        };

        let location = location.as_str();
        let size = self
            .with_retry("download", key, move || self.download(location, destination))
            .await?;

        debug!(key = key, found = %found_key, size = size, "Restored cache entry");
        Ok(Some(found_key))
    }
}

/// Turn a non-success response into a typed error
async fn ensure_success(response: Response) -> Result<Response, RemoteCacheError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteCacheError::from_status(status.as_u16(), &body))
}

/// Entry version for a namespace (hex SHA-1)
fn version_digest(namespace: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"|turbogha");
    format!("{:x}", hasher.finalize())
}
