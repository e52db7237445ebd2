//! Load contexts.
//!
//! A [`LoadContext`] is the isolation boundary for one loaded package
//! version. Its id is a hash of `category:package id:version`, it owns one
//! staged working directory, and it remembers the types it resolved so a
//! repeated request never loads twice. Contexts live in a
//! [`LoadContextRegistry`] until explicitly removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use strata_core::{Capability, DriverType};

use crate::catalog::{EntryManifest, PluginCatalog};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Load context id for a package version within a capability category.
///
/// 64-bit FNV-1a of `category:package id:version`, as 16 hex digits. The id
/// only needs to be stable and collision-free across one process.
pub fn load_context_id(category: &str, package_id: &str, version: &str) -> String {
    let key = format!("{category}:{package_id}:{version}");
    let hash = key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    format!("{hash:016x}")
}

/// One isolation boundary.
pub struct LoadContext {
    id: String,
    entry_path: PathBuf,
    unloaded: AtomicBool,
    loaded: Mutex<HashMap<PathBuf, Resolved>>,
}

#[derive(Clone)]
struct Resolved {
    types: Vec<DriverType>,
    description: Option<String>,
}

impl LoadContext {
    fn new(id: String, entry_path: PathBuf) -> Self {
        Self {
            id,
            entry_path,
            unloaded: AtomicBool::new(false),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    /// Set once the context has been removed from its registry.
    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Acquire)
    }

    /// Description declared by the entry file at `path`, once loaded.
    pub fn description(&self, path: &Path) -> Option<String> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .and_then(|r| r.description.clone())
    }
}

/// Registered load contexts, keyed by id.
#[derive(Clone)]
pub struct LoadContextRegistry {
    catalog: PluginCatalog,
    contexts: Arc<DashMap<String, Arc<LoadContext>>>,
}

impl LoadContextRegistry {
    #[must_use]
    pub fn new(catalog: PluginCatalog) -> Self {
        Self {
            catalog,
            contexts: Arc::new(DashMap::new()),
        }
    }

    /// Return the context registered under `context_id`, creating it if
    /// this id has not been seen. An existing context is never replaced.
    pub fn add_load_context(&self, context_id: &str, entry_path: &Path) -> Arc<LoadContext> {
        let entry = self
            .contexts
            .entry(context_id.to_owned())
            .or_insert_with(|| {
                tracing::debug!(
                    context_id = %context_id,
                    entry = %entry_path.display(),
                    "load context created"
                );
                Arc::new(LoadContext::new(context_id.to_owned(), entry_path.to_path_buf()))
            });
        Arc::clone(entry.value())
    }

    pub fn get(&self, context_id: &str) -> Option<Arc<LoadContext>> {
        self.contexts.get(context_id).map(|c| Arc::clone(c.value()))
    }

    /// Evict and unload a context. Returns whether it existed.
    pub fn remove_load_context(&self, context_id: &str) -> bool {
        match self.contexts.remove(context_id) {
            Some((_, context)) => {
                context.unloaded.store(true, Ordering::Release);
                context
                    .loaded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                tracing::info!(context_id = %context_id, "load context unloaded");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Types declared by the entry file at `path` that carry `capability`.
    ///
    /// Read failures, unknown entry points and non-matching types all yield
    /// an empty list. Results are remembered per path.
    pub fn get_types_from_file(
        &self,
        context: &LoadContext,
        path: &Path,
        capability: Capability,
    ) -> Vec<DriverType> {
        if context.is_unloaded() {
            tracing::warn!(context_id = %context.id, "types requested from unloaded context");
            return Vec::new();
        }

        let mut loaded = context
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(resolved) = loaded.get(path) {
            return filter_types(&resolved.types, capability);
        }

        let Some(resolved) = self.resolve(context, path) else {
            return Vec::new();
        };
        let types = filter_types(&resolved.types, capability);
        loaded.insert(path.to_path_buf(), resolved);
        types
    }

    fn resolve(&self, context: &LoadContext, path: &Path) -> Option<Resolved> {
        let body = match std::fs::read_to_string(path) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(
                    context_id = %context.id,
                    path = %path.display(),
                    error = %err,
                    "entry file unreadable"
                );
                return None;
            }
        };
        let manifest: EntryManifest = match toml::from_str(&body) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(
                    context_id = %context.id,
                    path = %path.display(),
                    error = %err,
                    "entry file malformed"
                );
                return None;
            }
        };
        let Some(entry) = self.catalog.get(&manifest.entry) else {
            tracing::warn!(
                context_id = %context.id,
                entry = %manifest.entry,
                "entry point not in catalog"
            );
            return None;
        };

        let types: Vec<DriverType> = manifest.select(entry).into_iter().cloned().collect();
        tracing::debug!(
            context_id = %context.id,
            entry = %entry.name,
            count = types.len(),
            "entry file resolved"
        );
        Some(Resolved {
            types,
            description: manifest
                .description
                .or_else(|| Some(entry.description.to_owned())),
        })
    }
}

fn filter_types(types: &[DriverType], capability: Capability) -> Vec<DriverType> {
    types
        .iter()
        .filter(|t| t.supports(capability))
        .cloned()
        .collect()
}
