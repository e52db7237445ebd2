//! Storage volumes.
//!
//! A [`Volume`] is a resolved storage location a driver binds to. The
//! [`DirectoryVolumeProvider`] maps each volume id to a directory under a
//! root and caches the result in a [`DashMap`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub path: PathBuf,
}

impl Volume {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Path of a file inside this volume.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// Resolves volume ids to volumes.
pub trait VolumeProvider: Send + Sync {
    fn get_volume(&self, volume_id: &str) -> Result<Volume>;
}

/// Volumes as subdirectories of a root, created on first use.
#[derive(Clone)]
pub struct DirectoryVolumeProvider {
    root: PathBuf,
    volumes: Arc<DashMap<String, Volume>>,
}

impl DirectoryVolumeProvider {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            volumes: Arc::new(DashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl VolumeProvider for DirectoryVolumeProvider {
    fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        if let Some(volume) = self.volumes.get(volume_id) {
            return Ok(volume.value().clone());
        }

        // Volume ids become directory names; reject anything that could
        // escape the root.
        if volume_id.is_empty()
            || volume_id.contains(['/', '\\'])
            || volume_id == "."
            || volume_id == ".."
        {
            return Err(CoreError::VolumeUnavailable {
                volume_id: volume_id.to_owned(),
                reason: "invalid volume id".into(),
            });
        }

        let path = self.root.join(volume_id);
        std::fs::create_dir_all(&path).map_err(|e| CoreError::VolumeUnavailable {
            volume_id: volume_id.to_owned(),
            reason: e.to_string(),
        })?;

        let volume = Volume::new(volume_id, path);
        tracing::debug!(volume_id = %volume_id, path = %volume.path.display(), "volume resolved");
        self.volumes.insert(volume_id.to_owned(), volume.clone());
        Ok(volume)
    }
}
