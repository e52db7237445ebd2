//! Packages and package stores.
//!
//! A [`Package`] is an immutable, versioned unit of plugin code with a
//! `dist` directory. The [`DirectoryPackageStore`] keeps packages on disk as
//! `<root>/<id>/<version>/package.toml` plus `dist/`, and announces installs
//! and removals on the platform [`EventBus`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{EventBus, PlatformEvent, hash::ContentHasher};

use crate::error::{ModuleError, Result};
use crate::staging::copy_dir;
use crate::version::{self, PackageVersion};

const MANIFEST_FILE: &str = "package.toml";
const DIST_DIR: &str = "dist";

/// The `package.toml` written alongside every installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub id: String,
    pub version: String,
    pub category: String,
    #[serde(default = "Utc::now")]
    pub build_date: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PackageManifest {
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            category: category.into(),
            build_date: Utc::now(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_build_date(mut self, build_date: DateTime<Utc>) -> Self {
        self.build_date = build_date;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: String,
    pub version: String,
    pub category: String,
    pub build_date: DateTime<Utc>,
    pub description: Option<String>,
    /// Directory holding `package.toml` and `dist/`.
    pub location: PathBuf,
}

impl Package {
    pub fn from_manifest(manifest: PackageManifest, location: impl Into<PathBuf>) -> Self {
        Self {
            id: manifest.id,
            version: manifest.version,
            category: manifest.category,
            build_date: manifest.build_date,
            description: manifest.description,
            location: location.into(),
        }
    }

    /// `id@version`, for logs.
    pub fn key(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.location.join(DIST_DIR)
    }

    pub fn parsed_version(&self) -> Result<PackageVersion> {
        PackageVersion::parse(&self.version)
    }

    /// Content hash over `category:id:version:build timestamp`. A rebuilt
    /// package with the same version gets a new hash.
    pub fn hash(&self) -> String {
        ContentHasher::new()
            .field(&self.category)
            .field(&self.id)
            .field(&self.version)
            .field(&self.build_date.timestamp().to_string())
            .finish()
    }
}

/// Resolves versioned packages.
#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn get(&self, package_id: &str, version: &str) -> Option<Package>;

    /// Every known version of a package.
    async fn versions(&self, package_id: &str) -> Vec<Package>;

    /// Highest known version of a package.
    async fn get_latest(&self, package_id: &str) -> Option<Package> {
        let versions = self.versions(package_id).await;
        version::highest(versions.iter(), |p| p.version.as_str()).cloned()
    }

    async fn list(&self) -> Vec<Package>;
}

/// Packages stored as directories on disk.
pub struct DirectoryPackageStore {
    root: PathBuf,
    events: EventBus,
    packages: RwLock<BTreeMap<(String, String), Package>>,
}

impl DirectoryPackageStore {
    pub fn new(root: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            root: root.into(),
            events,
            packages: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every `<id>/<version>/package.toml` under the root. Malformed
    /// manifests are logged and skipped. Returns the number indexed.
    pub async fn scan(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.root).await? {
            tracing::warn!(path = %self.root.display(), "package root does not exist");
            return Ok(0);
        }

        let mut found = Vec::new();
        let mut ids = tokio::fs::read_dir(&self.root).await?;
        while let Some(id_entry) = ids.next_entry().await? {
            if !id_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut versions = tokio::fs::read_dir(id_entry.path()).await?;
            while let Some(version_entry) = versions.next_entry().await? {
                let location = version_entry.path();
                match read_manifest(&location).await {
                    Ok(manifest) => found.push(Package::from_manifest(manifest, location)),
                    Err(err) => {
                        tracing::warn!(
                            path = %location.display(),
                            error = %err,
                            "skipping package"
                        );
                    }
                }
            }
        }

        let count = found.len();
        let mut packages = self.packages.write().unwrap_or_else(PoisonError::into_inner);
        for package in found {
            packages.insert((package.id.clone(), package.version.clone()), package);
        }
        tracing::info!(root = %self.root.display(), count, "package store scanned");
        Ok(count)
    }

    /// Install a package from a directory of distributable files, replacing
    /// any existing copy of the same version.
    pub async fn install(&self, manifest: PackageManifest, dist_source: &Path) -> Result<Package> {
        PackageVersion::parse(&manifest.version)?;

        let location = self.root.join(&manifest.id).join(&manifest.version);
        if tokio::fs::try_exists(&location).await? {
            tokio::fs::remove_dir_all(&location).await?;
        }
        copy_dir(dist_source, &location.join(DIST_DIR)).await?;

        let body = toml::to_string(&manifest).map_err(|e| ModuleError::Manifest {
            path: location.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(location.join(MANIFEST_FILE), body).await?;

        let package = Package::from_manifest(manifest, location);
        self.packages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((package.id.clone(), package.version.clone()), package.clone());

        tracing::info!(package = %package.key(), category = %package.category, "package installed");
        self.events.publish(PlatformEvent::PackageAdded {
            package_id: package.id.clone(),
            version: package.version.clone(),
            category: package.category.clone(),
        });
        Ok(package)
    }

    /// Remove an installed version. Returns the removed package, if any.
    pub async fn remove(&self, package_id: &str, version: &str) -> Result<Option<Package>> {
        let removed = self
            .packages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(package_id.to_owned(), version.to_owned()));

        let Some(package) = removed else {
            return Ok(None);
        };

        if tokio::fs::try_exists(&package.location).await? {
            tokio::fs::remove_dir_all(&package.location).await?;
        }

        tracing::info!(package = %package.key(), "package removed");
        self.events.publish(PlatformEvent::PackageRemoved {
            package_id: package.id.clone(),
            version: package.version.clone(),
            category: package.category.clone(),
        });
        Ok(Some(package))
    }
}

#[async_trait]
impl PackageStore for DirectoryPackageStore {
    async fn get(&self, package_id: &str, version: &str) -> Option<Package> {
        self.packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(package_id.to_owned(), version.to_owned()))
            .cloned()
    }

    async fn versions(&self, package_id: &str) -> Vec<Package> {
        self.packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.id == package_id)
            .cloned()
            .collect()
    }

    async fn list(&self) -> Vec<Package> {
        self.packages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

async fn read_manifest(location: &Path) -> Result<PackageManifest> {
    let path = location.join(MANIFEST_FILE);
    let body = tokio::fs::read_to_string(&path).await?;
    toml::from_str(&body).map_err(|e| ModuleError::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
