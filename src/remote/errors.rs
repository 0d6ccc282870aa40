//! Remote cache service error types
//!
//! Maps HTTP status codes and transport failures to variants the retry loop
//! can reason about.

/// Remote cache service error types
#[derive(Debug, thiserror::Error)]
pub enum RemoteCacheError {
    #[error("Authentication rejected by cache service")]
    Unauthorized,

    #[error("Rate limited by cache service")]
    RateLimited,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteCacheError {
    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteCacheError::RateLimited
                | RemoteCacheError::Timeout
                | RemoteCacheError::Network(_)
                | RemoteCacheError::Server(_, _)
        )
    }

    /// Create an error from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => RemoteCacheError::Unauthorized,
            403 => RemoteCacheError::Forbidden(body.to_string()),
            408 => RemoteCacheError::Timeout,
            429 => RemoteCacheError::RateLimited,
            500..=599 => RemoteCacheError::Server(status, body.to_string()),
            _ => RemoteCacheError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for RemoteCacheError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteCacheError::Timeout
        } else if err.is_connect() {
            RemoteCacheError::Network(err.to_string())
        } else {
            RemoteCacheError::Request(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            RemoteCacheError::from_status(401, ""),
            RemoteCacheError::Unauthorized
        ));
        assert!(matches!(
            RemoteCacheError::from_status(429, ""),
            RemoteCacheError::RateLimited
        ));
        assert!(matches!(
            RemoteCacheError::from_status(503, "busy"),
            RemoteCacheError::Server(503, _)
        ));
        assert!(matches!(
            RemoteCacheError::from_status(400, "bad key"),
            RemoteCacheError::Request(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(RemoteCacheError::from_status(502, "").is_retryable());
        assert!(RemoteCacheError::from_status(408, "").is_retryable());
        assert!(RemoteCacheError::Network("reset".into()).is_retryable());
        assert!(!RemoteCacheError::from_status(401, "").is_retryable());
        assert!(!RemoteCacheError::from_status(404, "").is_retryable());
    }
}
