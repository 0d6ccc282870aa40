//! Gateway error types
//!
//! Backend adapters fail with [`BackendError`]; route handlers convert those
//! (and their own validation failures) into [`GatewayError`], which renders as
//! a `{ ok: false, error }` JSON body with a matching status code.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::artifact::BodyLimitExceeded;
use crate::remote::RemoteCacheError;
use crate::server::protocol::StatusResponse;

/// Failure raised by a storage backend while storing or fetching an artifact
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Payload too large: body exceeds {limit} bytes")]
    BodyLimitExceeded { limit: u64 },

    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("Remote cache error: {0}")]
    Remote(#[from] RemoteCacheError),
}

impl From<io::Error> for BackendError {
    fn from(err: io::Error) -> Self {
        // The request body limiter travels through tokio::io::copy as an io::Error
        let limit = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<BodyLimitExceeded>())
            .map(|exceeded| exceeded.limit);

        match limit {
            Some(limit) => BackendError::BodyLimitExceeded { limit },
            None => BackendError::Io(err),
        }
    }
}

/// Error returned by a route handler
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid artifact hash: {0:?}")]
    InvalidHash(String),

    #[error("Request timed out")]
    Timeout,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl GatewayError {
    /// HTTP status reported for this error
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidHash(_) => StatusCode::BAD_REQUEST,
            GatewayError::Timeout => StatusCode::REQUEST_TIMEOUT,
            GatewayError::Backend(BackendError::BodyLimitExceeded { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            GatewayError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(StatusResponse::error(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_limit_io_error_maps_to_typed_variant() {
        let err = io::Error::new(
            io::ErrorKind::InvalidData,
            BodyLimitExceeded { limit: 10 },
        );
        match BackendError::from(err) {
            BackendError::BodyLimitExceeded { limit } => assert_eq!(limit, 10),
            other => panic!("Expected BodyLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        assert!(matches!(BackendError::from(err), BackendError::Io(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(GatewayError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::InvalidHash("..".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Backend(BackendError::BodyLimitExceeded { limit: 1 }).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        let io = BackendError::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(
            GatewayError::Backend(io).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_message() {
        assert_eq!(GatewayError::Unauthorized.to_string(), "Unauthorized");
    }
}
