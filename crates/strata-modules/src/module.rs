//! Loaded modules.

use strata_core::DriverType;

use crate::package::Package;

/// The driver types discovered inside one loaded package version.
#[derive(Debug, Clone)]
pub struct Module {
    /// `{package id}:{version}`
    pub key: String,
    pub package: Package,
    pub types: Vec<DriverType>,
    pub description: Option<String>,
    pub load_context_id: String,
}

impl Module {
    pub fn key_for(package_id: &str, version: &str) -> String {
        format!("{package_id}:{version}")
    }

    pub fn package_id(&self) -> &str {
        &self.package.id
    }

    pub fn version(&self) -> &str {
        &self.package.version
    }
}
