//! Remote cache service client

pub mod client;
pub mod errors;
pub mod types;

use std::path::Path;

use async_trait::async_trait;

pub use client::ActionsCacheClient;
pub use errors::RemoteCacheError;

/// Archive-level operations offered by a remote cache service
///
/// `restore` may return an entry whose key differs from the requested one
/// (the service prefix-matches); callers must compare it themselves.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Upload the file at `archive` (`size` bytes) under `key`
    async fn save(&self, key: &str, archive: &Path, size: u64) -> Result<(), RemoteCacheError>;

    /// Look up the best match for `key` without downloading it
    ///
    /// Returns the key of the matched entry, or `None` when nothing matched.
    async fn find(&self, key: &str) -> Result<Option<String>, RemoteCacheError>;

    /// Download the best match for `key` into `destination`
    ///
    /// Returns the key of the restored entry, or `None` when nothing matched.
    async fn restore(
        &self,
        destination: &Path,
        key: &str,
    ) -> Result<Option<String>, RemoteCacheError>;
}
