//! Configuration profiles.
//!
//! A profile is the declarative source of driver configurations. Changes
//! are announced on the platform [`EventBus`] as `ConfigurationChanged` /
//! `ConfigurationRemoved`, which the driver provider debounces into a
//! reconciliation pass.
//!
//! [`FileConfigurationProfile`] reads one `*.toml` file per configuration
//! from a directory and, once [`watch`](FileConfigurationProfile::watch)ed,
//! reloads whenever that directory changes.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use strata_core::{DriverConfiguration, EventBus, PlatformEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ProviderError, Result};

/// Source of driver configurations.
pub trait ConfigurationProfile: Send + Sync {
    /// Every configuration, ordered by id.
    fn configurations(&self) -> Vec<DriverConfiguration>;

    fn get(&self, id: &str) -> Option<DriverConfiguration>;
}

// ---------------------------------------------------------------------------
// In-memory profile
// ---------------------------------------------------------------------------

/// Configurations held in memory.
pub struct MemoryConfigurationProfile {
    events: EventBus,
    configurations: RwLock<BTreeMap<String, DriverConfiguration>>,
}

impl MemoryConfigurationProfile {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            configurations: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add or replace a configuration. Emits `ConfigurationChanged` only if
    /// the content hash changed. Returns whether it did.
    pub fn add(&self, configuration: DriverConfiguration) -> bool {
        let id = configuration.id.clone();
        let changed = {
            let mut configurations = self.write();
            let changed = configurations
                .get(&id)
                .is_none_or(|existing| existing.hash() != configuration.hash());
            configurations.insert(id.clone(), configuration);
            changed
        };
        if changed {
            tracing::debug!(configuration_id = %id, "configuration changed");
            self.events.publish(PlatformEvent::ConfigurationChanged {
                configuration_id: id,
            });
        }
        changed
    }

    pub fn remove(&self, id: &str) -> Option<DriverConfiguration> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            tracing::debug!(configuration_id = %id, "configuration removed");
            self.events.publish(PlatformEvent::ConfigurationRemoved {
                configuration_id: id.to_owned(),
            });
        }
        removed
    }

    /// Make the profile hold exactly `configurations`, emitting events for
    /// each difference.
    pub fn replace_all(&self, configurations: Vec<DriverConfiguration>) {
        let incoming: HashSet<String> = configurations.iter().map(|c| c.id.clone()).collect();
        let stale: Vec<String> = self
            .read()
            .keys()
            .filter(|id| !incoming.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.remove(&id);
        }
        for configuration in configurations {
            self.add(configuration);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, DriverConfiguration>> {
        self.configurations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, DriverConfiguration>> {
        self.configurations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigurationProfile for MemoryConfigurationProfile {
    fn configurations(&self) -> Vec<DriverConfiguration> {
        self.read().values().cloned().collect()
    }

    fn get(&self, id: &str) -> Option<DriverConfiguration> {
        self.read().get(id).cloned()
    }
}

// ---------------------------------------------------------------------------
// File-backed profile
// ---------------------------------------------------------------------------

/// Configurations loaded from `*.toml` files in a directory.
pub struct FileConfigurationProfile {
    dir: PathBuf,
    inner: MemoryConfigurationProfile,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileConfigurationProfile {
    pub fn new(dir: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            dir: dir.into(),
            inner: MemoryConfigurationProfile::new(events),
            watcher: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read the directory. Unreadable or malformed files are logged and
    /// skipped so one bad file never hides the others. Returns how many
    /// configurations were loaded.
    pub fn reload(&self) -> Result<usize> {
        if !self.dir.exists() {
            tracing::warn!(path = %self.dir.display(), "configuration directory does not exist");
            self.inner.replace_all(Vec::new());
            return Ok(0);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in &paths {
            match read_configuration(path) {
                Ok(configuration) => loaded.push(configuration),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "skipping configuration file"
                    );
                }
            }
        }

        let count = loaded.len();
        self.inner.replace_all(loaded);
        tracing::info!(path = %self.dir.display(), count, "configurations loaded");
        Ok(count)
    }

    /// Watch the directory and reload on every change until the returned
    /// task is aborted.
    pub fn watch(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event)
                if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() =>
            {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(err) => tracing::error!(error = %err, "configuration watcher error"),
        })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);

        let profile = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Editors write in several steps; drain what is queued.
                while rx.try_recv().is_ok() {}
                if let Err(err) = profile.reload() {
                    tracing::warn!(error = %err, "configuration reload failed");
                }
            }
        }))
    }
}

impl ConfigurationProfile for FileConfigurationProfile {
    fn configurations(&self) -> Vec<DriverConfiguration> {
        self.inner.configurations()
    }

    fn get(&self, id: &str) -> Option<DriverConfiguration> {
        self.inner.get(id)
    }
}

fn read_configuration(path: &Path) -> Result<DriverConfiguration> {
    let body = std::fs::read_to_string(path)?;
    let configuration: DriverConfiguration =
        toml::from_str(&body).map_err(|e| ProviderError::ConfigurationFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    configuration.validate()?;
    Ok(configuration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Arc<PlatformEvent>>) -> Vec<PlatformEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push((*event).clone());
        }
        out
    }

    #[test]
    fn memory_profile_emits_only_on_hash_change() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let profile = MemoryConfigurationProfile::new(bus);

        let config = DriverConfiguration::new("c1", "strata.memory", "*");
        assert!(profile.add(config.clone()));
        assert!(!profile.add(config.clone()));
        assert!(profile.add(config.with_name("renamed")));
        assert!(profile.remove("c1").is_some());
        assert!(profile.remove("c1").is_none());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], PlatformEvent::ConfigurationRemoved { .. }));
    }

    #[test]
    fn file_profile_loads_and_diffs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cache.toml"),
            "id = \"cache\"\npackage_id = \"strata.memory\"\n[parameters]\nttl = \"60\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("db.toml"),
            "id = \"db\"\npackage_id = \"strata.sqlite\"\npackage_version = \"1.*\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let bus = EventBus::new(16);
        let profile = FileConfigurationProfile::new(dir.path(), bus.clone());
        assert_eq!(profile.reload().unwrap(), 2);
        assert_eq!(
            profile.get("cache").unwrap().parameter("ttl"),
            Some("60")
        );

        let mut rx = bus.subscribe();
        std::fs::remove_file(dir.path().join("db.toml")).unwrap();
        assert_eq!(profile.reload().unwrap(), 1);
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![PlatformEvent::ConfigurationRemoved {
                configuration_id: "db".into()
            }]
        );
    }

    #[test]
    fn missing_package_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.toml"), "id = \"x\"\npackage_id = \"\"\n").unwrap();
        let profile = FileConfigurationProfile::new(dir.path(), EventBus::default());
        assert_eq!(profile.reload().unwrap(), 0);
    }
}
