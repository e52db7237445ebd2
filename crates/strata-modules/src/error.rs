//! Module system error types.

use thiserror::Error;

/// Errors raised while managing packages and modules.
///
/// Load failures surface from
/// [`ModuleManager::resolve`](crate::ModuleManager::resolve) and are also
/// published as `ModuleLoadError` events.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error in {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("invalid version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("package not found: {package_id}@{version}")]
    PackageNotFound { package_id: String, version: String },

    #[error("plugin entry point `{entry}` is not registered")]
    UnknownEntryPoint { entry: String },

    #[error("package {package_id}@{version} declares no {capability} types")]
    NoMatchingTypes {
        package_id: String,
        version: String,
        capability: String,
    },
}

/// Convenience alias used throughout the modules crate.
pub type Result<T> = std::result::Result<T, ModuleError>;
