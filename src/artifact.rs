//! Artifact identity and byte-stream plumbing
//!
//! Callers name artifacts by an opaque hash plus an optional tag. The remote
//! backend stores them under a [`CacheKey`] derived from both; the filesystem
//! backend keys on the hash alone.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::error::GatewayError;

/// Prefix shared by every remote cache key
pub const CACHE_KEY_PREFIX: &str = "turbogha_";

/// Separator between the hash part and the tag part of a remote cache key
pub const TAG_SEPARATOR: char = '#';

/// Longest accepted artifact hash
const MAX_HASH_LEN: usize = 256;

/// Artifact byte stream handed between the gateway and the backends
pub type ArtifactReader = Pin<Box<dyn AsyncRead + Send>>;

/// Caller-supplied artifact identifier
///
/// Restricted to `[A-Za-z0-9._-]` so it can never contain the tag separator
/// and always maps to a single file name inside the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactHash(String);

impl ArtifactHash {
    /// Validate a raw hash taken from a request path
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let valid_chars = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if raw.is_empty() || raw.len() > MAX_HASH_LEN || !valid_chars || raw == "." || raw == ".." {
            return Err(GatewayError::InvalidHash(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key under which the remote backend stores an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the storage key for a (hash, tag) pair
    ///
    /// An empty tag is the same as no tag.
    pub fn new(hash: &ArtifactHash, tag: Option<&str>) -> Self {
        match tag.filter(|t| !t.is_empty()) {
            Some(tag) => Self(format!("{CACHE_KEY_PREFIX}{hash}{TAG_SEPARATOR}{tag}")),
            None => Self(format!("{CACHE_KEY_PREFIX}{hash}")),
        }
    }

    /// Key used to look an artifact up by hash alone
    pub fn lookup(hash: &ArtifactHash) -> Self {
        Self::new(hash, None)
    }

    /// Split a key returned by the remote service into its key part and tag
    pub fn split(raw: &str) -> (&str, Option<&str>) {
        match raw.split_once(TAG_SEPARATOR) {
            Some((key, tag)) if !tag.is_empty() => (key, Some(tag)),
            Some((key, _)) => (key, None),
            None => (raw, None),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raised inside an [`io::Error`] when a body outgrows its ceiling
#[derive(Debug, thiserror::Error)]
#[error("payload exceeds limit of {limit} bytes")]
pub struct BodyLimitExceeded {
    pub limit: u64,
}

/// Reader that fails once more than `limit` bytes have passed through
///
/// Never truncates: the read that crosses the ceiling errors instead.
pub struct LimitedReader<R> {
    inner: R,
    limit: u64,
    consumed: u64,
}

impl<R> LimitedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            consumed: 0,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LimitedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.consumed += (buf.filled().len() - before) as u64;
                if this.consumed > this.limit {
                    // An erroring read must leave the buffer as it found it
                    buf.set_filled(before);
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        BodyLimitExceeded { limit: this.limit },
                    )));
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
