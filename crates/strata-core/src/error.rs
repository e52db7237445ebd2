//! Core error types.
//!
//! Errors here never cross the driver boundary: backends turn them into a
//! tagged [`ResultType`](crate::result::ResultType) before returning.

/// Unified error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A driver configuration is missing a field or has a bad value.
    #[error("invalid configuration `{id}`: {reason}")]
    InvalidConfiguration { id: String, reason: String },

    /// A volume could not be resolved.
    #[error("volume `{volume_id}` unavailable: {reason}")]
    VolumeUnavailable { volume_id: String, reason: String },

    /// A driver constructor rejected its configuration.
    #[error("driver construction failed for `{configuration_id}`: {reason}")]
    Construction {
        configuration_id: String,
        reason: String,
    },

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;
