//! Local filesystem backend
//!
//! Stores one file per artifact hash under the cache directory. Tags are not
//! persisted. Writes go to a temp file that is renamed into place, so a failed
//! upload never leaves a partial artifact behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{ArtifactStat, FetchedArtifact};
use crate::artifact::{ArtifactHash, ArtifactReader};
use crate::error::BackendError;

/// Prefix and suffix of in-flight upload files
const TEMP_PREFIX: &str = ".upload-";
const TEMP_SUFFIX: &str = ".tmp";

/// Filesystem-backed artifact store
#[derive(Debug)]
pub struct FilesystemBackend {
    /// Root directory for stored artifacts
    cache_dir: PathBuf,
}

impl FilesystemBackend {
    /// Create the backend, creating `cache_dir` if needed
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {:?}", cache_dir))?;

        let backend = Self { cache_dir };

        // Clean up any stale temp files from previous runs
        backend.cleanup();

        info!(cache_dir = %backend.cache_dir().display(), "Filesystem cache initialized");
        Ok(backend)
    }

    /// Consume `reader` entirely and store it as the artifact for `hash`
    pub async fn store(&self, hash: &ArtifactHash, mut reader: ArtifactReader) -> Result<(), BackendError> {
        let destination = self.artifact_path(hash);

        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.cache_dir)?;

        let mut file = File::from_std(tmp.reopen()?);
        let size = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        drop(file);

        tmp.persist(&destination).map_err(|e| e.error)?;

        debug!(
            hash = %hash,
            local = %destination.display(),
            size = size,
            "Stored artifact"
        );
        Ok(())
    }

    /// Open the artifact for `hash`, or `None` if it was never stored
    pub async fn fetch(&self, hash: &ArtifactHash) -> Result<Option<FetchedArtifact>, BackendError> {
        let path = self.artifact_path(hash);

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(hash = %hash, "Filesystem cache MISS");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata().await?.len();
        debug!(hash = %hash, size = size, "Filesystem cache HIT");

        Ok(Some(FetchedArtifact {
            size: Some(size),
            reader: Box::pin(file),
            tag: None,
        }))
    }

    /// Size of the artifact for `hash`, or `None` if it was never stored
    pub async fn stat(&self, hash: &ArtifactHash) -> Result<Option<ArtifactStat>, BackendError> {
        match tokio::fs::metadata(self.artifact_path(hash)).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(ArtifactStat {
                size: Some(metadata.len()),
                tag: None,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove temp files left by interrupted uploads
    pub fn cleanup(&self) {
        if let Ok(read_dir) = fs::read_dir(&self.cache_dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                let is_temp = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX));
                if is_temp {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    /// Location of the artifact for `hash`
    pub fn artifact_path(&self, hash: &ArtifactHash) -> PathBuf {
        self.cache_dir.join(hash.as_str())
    }

    /// Get the cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
