//! The plugin catalog.
//!
//! Plugin code is linked into the binary; each plugin crate exports a
//! `static` [`PluginEntry`] declaring the driver types it provides and
//! their capability tags. A package's entry file names the catalog entry it
//! activates, so which plugins run is chosen by installed packages and
//! configuration rather than by what happens to be linked.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use strata_core::DriverType;

/// Entry point declared by one plugin crate.
pub struct PluginEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub types: &'static [DriverType],
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("types", &self.types.iter().map(|t| t.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Registered plugin entry points, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct PluginCatalog {
    entries: Arc<BTreeMap<&'static str, &'static PluginEntry>>,
}

impl PluginCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry point, replacing any with the same name.
    #[must_use]
    pub fn with(mut self, entry: &'static PluginEntry) -> Self {
        Arc::make_mut(&mut self.entries).insert(entry.name, entry);
        self
    }

    pub fn get(&self, name: &str) -> Option<&'static PluginEntry> {
        self.entries.get(name).copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }
}

/// Contents of a package's entry file.
///
/// ```toml
/// entry = "strata-memory"
/// description = "Volatile TTL cache"
/// types = ["MemoryObjectDriver"]   # optional subset
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EntryManifest {
    pub entry: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
}

impl EntryManifest {
    /// Types of `entry` this manifest activates.
    pub fn select<'a>(&self, entry: &'a PluginEntry) -> Vec<&'a DriverType> {
        entry
            .types
            .iter()
            .filter(|t| {
                self.types
                    .as_ref()
                    .is_none_or(|wanted| wanted.iter().any(|w| w == t.name))
            })
            .collect()
    }
}

/// Maps a package id to its expected entry file name.
pub type EntryFilter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// `<package id>.plugin`
pub fn default_entry_filter() -> EntryFilter {
    Arc::new(|package_id: &str| format!("{package_id}.plugin"))
}
