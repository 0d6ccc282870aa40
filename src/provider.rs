//! Cache provider
//!
//! Owns the backend chosen for this process and times every call to it.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info};

use crate::artifact::{ArtifactHash, ArtifactReader};
use crate::backend::{
    ArtifactStat, Backend, BackendKind, FetchedArtifact, FilesystemBackend, RemoteBackend,
};
use crate::config::GatewayConfig;
use crate::error::BackendError;
use crate::remote::ActionsCacheClient;
use crate::tracker::{Operation, Tracker};

/// Run `operation` and record its wall-clock duration under `name`
///
/// The duration is recorded whether the operation succeeds or fails; its
/// output is returned untouched.
pub async fn timed<F>(name: Operation, tracker: &Tracker, operation: F) -> F::Output
where
    F: Future,
{
    let started = Instant::now();
    let output = operation.await;
    let elapsed = started.elapsed();

    tracker.record_timing(name, elapsed);
    debug!(operation = name.as_str(), elapsed_ms = elapsed.as_millis() as u64, "Timed cache operation");
    output
}

/// Instrumented access to the process's storage backend
pub struct Provider {
    backend: Backend,
    tracker: Arc<Tracker>,
}

impl Provider {
    pub fn new(backend: Backend, tracker: Arc<Tracker>) -> Self {
        Self { backend, tracker }
    }

    /// Build the backend selected by `config`
    pub fn from_config(config: &GatewayConfig, tracker: Arc<Tracker>) -> Result<Self> {
        let backend = match BackendKind::select(&config.remote) {
            BackendKind::Remote => {
                let url = config.remote.cache_url.as_deref().unwrap_or_default();
                let token = config.remote.runtime_token.as_deref().unwrap_or_default();
                let client = ActionsCacheClient::new(url, token, &config.remote.namespace)?;
                Backend::Remote(RemoteBackend::new(Arc::new(client), config.staging_dir())?)
            }
            BackendKind::Filesystem => {
                info!("Remote cache not configured, using filesystem cache");
                Backend::Filesystem(FilesystemBackend::new(config.artifacts_dir())?)
            }
        };

        info!(backend = backend.kind().as_str(), "Cache provider ready");
        Ok(Self::new(backend, tracker))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Store an artifact
    pub async fn save(
        &self,
        hash: &ArtifactHash,
        tag: Option<&str>,
        reader: ArtifactReader,
    ) -> Result<(), BackendError> {
        timed(Operation::Save, &self.tracker, self.backend.store(hash, tag, reader)).await
    }

    /// Fetch an artifact; `None` is a cache miss
    pub async fn get(&self, hash: &ArtifactHash) -> Result<Option<FetchedArtifact>, BackendError> {
        timed(Operation::Get, &self.tracker, self.backend.fetch(hash)).await
    }

    /// Check whether an artifact exists; not timed
    pub async fn stat(&self, hash: &ArtifactHash) -> Result<Option<ArtifactStat>, BackendError> {
        self.backend.stat(hash).await
    }
}
