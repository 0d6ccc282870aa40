//! Artifact storage backends
//!
//! A process uses exactly one backend, chosen at startup: the remote cache
//! service when it is configured, the local filesystem otherwise.

pub mod filesystem;
pub mod remote;

use std::fmt;

pub use filesystem::FilesystemBackend;
pub use remote::RemoteBackend;

use crate::artifact::{ArtifactHash, ArtifactReader};
use crate::config::RemoteSettings;
use crate::error::BackendError;

/// A stored artifact opened for reading
pub struct FetchedArtifact {
    /// Size in bytes, when the backend knows it
    pub size: Option<u64>,
    pub reader: ArtifactReader,
    /// Tag the artifact was saved with, when the backend keeps tags
    pub tag: Option<String>,
}

impl fmt::Debug for FetchedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedArtifact")
            .field("size", &self.size)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// What is known about a stored artifact without opening it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStat {
    pub size: Option<u64>,
    pub tag: Option<String>,
}

/// Which backend variant serves this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Filesystem,
    Remote,
}

impl BackendKind {
    /// Pick the backend for the given remote settings
    pub fn select(remote: &RemoteSettings) -> Self {
        if remote.is_valid() {
            BackendKind::Remote
        } else {
            BackendKind::Filesystem
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Filesystem => "filesystem",
            BackendKind::Remote => "remote",
        }
    }
}

/// The storage backend in use
pub enum Backend {
    Filesystem(FilesystemBackend),
    Remote(RemoteBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Filesystem(_) => BackendKind::Filesystem,
            Backend::Remote(_) => BackendKind::Remote,
        }
    }

    /// Persist the whole of `reader` as the artifact (`hash`, `tag`)
    ///
    /// The filesystem variant ignores the tag.
    pub async fn store(
        &self,
        hash: &ArtifactHash,
        tag: Option<&str>,
        reader: ArtifactReader,
    ) -> Result<(), BackendError> {
        match self {
            Backend::Filesystem(fs) => fs.store(hash, reader).await,
            Backend::Remote(remote) => remote.store(hash, tag, reader).await,
        }
    }

    /// Look up the artifact for `hash` without reading its content
    pub async fn stat(&self, hash: &ArtifactHash) -> Result<Option<ArtifactStat>, BackendError> {
        match self {
            Backend::Filesystem(fs) => fs.stat(hash).await,
            Backend::Remote(remote) => remote.stat(hash).await,
        }
    }

    /// Open the artifact for `hash`; `None` means no cache entry
    pub async fn fetch(&self, hash: &ArtifactHash) -> Result<Option<FetchedArtifact>, BackendError> {
        match self {
            Backend::Filesystem(fs) => fs.fetch(hash).await,
            Backend::Remote(remote) => remote.fetch(hash).await,
        }
    }
}
