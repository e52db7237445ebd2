//! Error types for the strata-remote crate.

use strata_core::ResultType;
use thiserror::Error;

/// Alias for `Result<T, RemoteError>`.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures talking to the remote entity service.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service could not be reached at all.
    #[error("remote service unavailable at {url}: {reason}")]
    Unavailable { url: String, reason: String },

    /// The request did not complete within the configured timeout.
    #[error("remote `{operation}` timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The service has no route for the operation.
    #[error("remote route `{operation}` not configured")]
    RouteNotConfigured { operation: String },

    /// Any other non-success status.
    #[error("remote `{operation}` returned HTTP {status}")]
    Status { operation: String, status: u16 },

    #[error("remote transport error: {0}")]
    Transport(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl RemoteError {
    /// The tagged result a driver reports for this failure.
    pub fn result_type(&self) -> ResultType {
        match self {
            Self::Unavailable { .. } => ResultType::NotAvailable,
            Self::Timeout { .. } => ResultType::Timeout,
            Self::RouteNotConfigured { .. } => ResultType::RouteNotConfigured,
            Self::Status { status: 503, .. } => ResultType::NotAvailable,
            Self::Status { .. } | Self::Transport(_) | Self::Json(_) | Self::Url(_) => {
                ResultType::InternalError
            }
        }
    }
}
