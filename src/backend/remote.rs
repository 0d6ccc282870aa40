//! Remote cache backend
//!
//! Stages uploads in a local temp file before handing them to the cache
//! service, and restores downloads into a temp file that lives as long as the
//! returned stream. The service may answer a lookup with a different (prefix
//! matching) key; such answers are treated as misses.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{Context as _, Result};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tracing::{debug, info};

use super::{ArtifactStat, FetchedArtifact};
use crate::artifact::{ArtifactHash, ArtifactReader, CacheKey};
use crate::error::BackendError;
use crate::remote::CacheClient;

/// Remote cache service backend
pub struct RemoteBackend {
    client: Arc<dyn CacheClient>,
    /// Directory for staged uploads and restored downloads
    staging_dir: PathBuf,
}

impl RemoteBackend {
    pub fn new(client: Arc<dyn CacheClient>, staging_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&staging_dir)
            .with_context(|| format!("Failed to create staging directory: {:?}", staging_dir))?;

        info!(staging_dir = %staging_dir.display(), "Remote cache backend initialized");
        Ok(Self { client, staging_dir })
    }

    /// Stage `reader` and save it under the key for (`hash`, `tag`)
    pub async fn store(
        &self,
        hash: &ArtifactHash,
        tag: Option<&str>,
        mut reader: ArtifactReader,
    ) -> Result<(), BackendError> {
        let key = CacheKey::new(hash, tag);
        let staged = self.staging_file(&key)?;

        let mut file = File::from_std(staged.reopen()?);
        let size = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        drop(file);

        self.client.save(key.as_str(), staged.path(), size).await?;

        info!(key = %key, size = size, "Saved cache entry");
        Ok(())
    }

    /// Restore the artifact for `hash`
    ///
    /// Returns `None` on a miss or when the service answers with a key for a
    /// different artifact.
    pub async fn fetch(&self, hash: &ArtifactHash) -> Result<Option<FetchedArtifact>, BackendError> {
        let expected = CacheKey::lookup(hash);
        let staged = self.staging_file(&expected)?.into_temp_path();

        let Some(found) = self.client.restore(&staged, expected.as_str()).await? else {
            return Ok(None);
        };

        let (found_key, tag) = CacheKey::split(&found);
        if found_key != expected.as_str() {
            info!(expected = %expected, found = found_key, "Cache key mismatch");
            return Ok(None);
        }

        let file = File::open(&staged).await?;
        let size = file.metadata().await?.len();
        debug!(key = %found, size = size, "Restored artifact");

        Ok(Some(FetchedArtifact {
            size: Some(size),
            tag: tag.map(str::to_owned),
            reader: Box::pin(StagedReader { file, _path: staged }),
        }))
    }

    /// Look up the artifact for `hash` without downloading it
    ///
    /// The service does not report sizes on lookup, so `size` is unknown.
    pub async fn stat(&self, hash: &ArtifactHash) -> Result<Option<ArtifactStat>, BackendError> {
        let expected = CacheKey::lookup(hash);
        let Some(found) = self.client.find(expected.as_str()).await? else {
            return Ok(None);
        };

        let (found_key, tag) = CacheKey::split(&found);
        if found_key != expected.as_str() {
            info!(expected = %expected, found = found_key, "Cache key mismatch");
            return Ok(None);
        }

        Ok(Some(ArtifactStat {
            size: None,
            tag: tag.map(str::to_owned),
        }))
    }

    /// Fresh temp file in the staging directory, named after `key`
    fn staging_file(&self, key: &CacheKey) -> io::Result<NamedTempFile> {
        let prefix: String = key
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '#') { c } else { '_' })
            .take(128)
            .collect();

        tempfile::Builder::new()
            .prefix(&format!("{prefix}."))
            .suffix(".tmp")
            .tempfile_in(&self.staging_dir)
    }
}

/// Restored file that is deleted once the reader is dropped
struct StagedReader {
    file: File,
    _path: TempPath,
}

impl AsyncRead for StagedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}
