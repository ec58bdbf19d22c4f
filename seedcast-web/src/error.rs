//! Error types for the control plane and their HTTP mapping

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use seedcast_core::{
    DescriptorError, DownloadError, SeedcastError, SessionError, StorageError, SwarmError,
};

/// Error returned by a request handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request could not be understood
    #[error("Bad request: {reason}")]
    BadRequest {
        /// What was wrong with the request
        reason: String,
    },

    /// Failure from the distribution core
    #[error(transparent)]
    Core(#[from] SeedcastError),
}

macro_rules! from_core_error {
    ($($error:ty),* $(,)?) => {
        $(
            impl From<$error> for ApiError {
                fn from(error: $error) -> Self {
                    ApiError::Core(error.into())
                }
            }
        )*
    };
}

from_core_error!(
    DescriptorError,
    StorageError,
    SwarmError,
    SessionError,
    DownloadError,
);

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Core(e) if e.is_decode_error() => StatusCode::BAD_REQUEST,
            ApiError::Core(e) if e.is_unsupported_backend() => StatusCode::NOT_IMPLEMENTED,
            ApiError::Core(e) if e.is_cancellation() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Core(SeedcastError::Swarm(
                SwarmError::NotFound { .. } | SwarmError::PieceUnavailable { .. },
            )) => StatusCode::NOT_FOUND,
            ApiError::Core(SeedcastError::Download(DownloadError::Interrupted { .. })) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Core(SeedcastError::Storage(StorageError::SourceMismatch { .. })) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Core(
                SeedcastError::Storage(StorageError::Allocation { .. })
                | SeedcastError::Download(DownloadError::Storage(StorageError::Allocation { .. })),
            ) => StatusCode::INSUFFICIENT_STORAGE,
            ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(status = %status, "{message}");
        } else {
            tracing::warn!(status = %status, "{message}");
        }
        (status, message).into_response()
    }
}

/// Errors that stop the control-plane server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Requested listen address
        address: SocketAddr,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// Server loop failed while running
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use seedcast_core::StorageMethod;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let decode: ApiError = DescriptorError::Decode {
            reason: "not bencode".to_string(),
        }
        .into();
        assert_eq!(decode.status_code(), StatusCode::BAD_REQUEST);

        let disk: ApiError = SessionError::Storage(StorageError::Unsupported {
            method: StorageMethod::Disk,
        })
        .into();
        assert_eq!(disk.status_code(), StatusCode::NOT_IMPLEMENTED);

        let aborted: ApiError = SessionError::Aborted.into();
        assert_eq!(aborted.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let oversized: ApiError = DownloadError::Storage(StorageError::Allocation {
            length: u64::MAX,
            reason: "capacity overflow".to_string(),
        })
        .into();
        assert_eq!(oversized.status_code(), StatusCode::INSUFFICIENT_STORAGE);

        let io: ApiError = StorageError::Io(std::io::Error::other("gone")).into();
        assert_eq!(io.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
