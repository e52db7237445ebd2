//! Provider error types.

use thiserror::Error;

/// Errors raised by configuration profiles and platform startup.
///
/// Reconciliation itself never fails: per-configuration problems become
/// `DriverLoadError` events.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Core(#[from] strata_core::CoreError),

    #[error(transparent)]
    Module(#[from] strata_modules::ModuleError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration file {path}: {reason}")]
    ConfigurationFile { path: String, reason: String },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Convenience alias used throughout the drivers crate.
pub type Result<T> = std::result::Result<T, ProviderError>;
