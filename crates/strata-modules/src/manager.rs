//! The module manager.
//!
//! [`ModuleManager`] caches one [`Module`] per `(package id, version)` for a
//! fixed capability and set of package categories. Modules load lazily on
//! the first `get` that needs them: the package is staged, a load context
//! is registered for it, and the entry file's types are resolved through
//! the plugin catalog.
//!
//! Version requests resolve as follows:
//!
//! - exact (`1.2.0`) -- cached module, else loaded from the package store.
//! - latest (`*`) -- the highest version loaded so far, else the store's
//!   latest.
//! - pattern (`1.*`) -- the highest store version matching the pattern,
//!   falling back to cached modules when the store has none.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use strata_core::{Capability, DriverType, EventBus, PlatformEvent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::catalog::{EntryFilter, PluginCatalog, default_entry_filter};
use crate::context::{LoadContextRegistry, load_context_id};
use crate::error::{ModuleError, Result};
use crate::module::Module;
use crate::package::{Package, PackageStore};
use crate::staging;
use crate::version::{self, LATEST, PackageVersion, VersionPattern};

/// Settings for a [`ModuleManager`].
#[derive(Clone)]
pub struct ModuleManagerConfig {
    /// Capability every returned type must carry.
    pub capability: Capability,
    /// Package categories this manager serves.
    pub categories: Vec<String>,
    /// Root under which packages are staged.
    pub modules_root: PathBuf,
    pub entry_filter: EntryFilter,
}

impl ModuleManagerConfig {
    pub fn new(category: impl Into<String>, modules_root: impl Into<PathBuf>) -> Self {
        Self {
            capability: Capability::Driver,
            categories: vec![category.into()],
            modules_root: modules_root.into(),
            entry_filter: default_entry_filter(),
        }
    }

    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    #[must_use]
    pub fn with_entry_filter(mut self, filter: EntryFilter) -> Self {
        self.entry_filter = filter;
        self
    }
}

#[derive(Default)]
struct ModuleCache {
    modules: HashMap<String, Arc<Module>>,
    latest: HashMap<String, Arc<Module>>,
    by_package: HashMap<String, Vec<Arc<Module>>>,
}

impl ModuleCache {
    fn remove(&mut self, module: &Module) -> Option<Arc<Module>> {
        let removed = self.modules.remove(&module.key);
        if let Some(list) = self.by_package.get_mut(module.package_id()) {
            list.retain(|m| m.key != module.key);
        }
        if self
            .latest
            .get(module.package_id())
            .is_some_and(|m| m.key == module.key)
        {
            self.latest.remove(module.package_id());
        }
        removed
    }

    fn insert(&mut self, module: Arc<Module>) {
        let id = module.package_id().to_owned();
        self.modules.insert(module.key.clone(), Arc::clone(&module));

        let list = self.by_package.entry(id.clone()).or_default();
        list.retain(|m| m.key != module.key);
        list.push(Arc::clone(&module));

        let newer = match self.latest.get(&id) {
            None => true,
            Some(current) => match (
                PackageVersion::parse(module.version()),
                PackageVersion::parse(current.version()),
            ) {
                (Ok(candidate), Ok(current)) => candidate > current,
                (Ok(_), Err(_)) => true,
                _ => false,
            },
        };
        if newer {
            self.latest.insert(id, module);
        }
    }
}

/// Caches loaded modules for one capability.
pub struct ModuleManager {
    config: ModuleManagerConfig,
    store: Arc<dyn PackageStore>,
    contexts: LoadContextRegistry,
    events: EventBus,
    cache: Mutex<ModuleCache>,
}

impl ModuleManager {
    pub fn new(
        config: ModuleManagerConfig,
        store: Arc<dyn PackageStore>,
        catalog: PluginCatalog,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            contexts: LoadContextRegistry::new(catalog),
            events,
            cache: Mutex::new(ModuleCache::default()),
        }
    }

    pub fn contexts(&self) -> &LoadContextRegistry {
        &self.contexts
    }

    pub fn capability(&self) -> Capability {
        self.config.capability
    }

    /// Resolve a module. Returns `None` when nothing usable is found; load
    /// failures are reported as `ModuleLoadError` events.
    pub async fn get(&self, package_id: &str, version: &str) -> Option<Arc<Module>> {
        self.resolve(package_id, version).await.ok().flatten()
    }

    /// Resolve a module, keeping "not there" apart from "failed to load".
    ///
    /// `Ok(None)` means no package (or cached module) matches the request,
    /// or its category is not served. `Err` means a matching package exists
    /// but could not be loaded; a `ModuleLoadError` event has been published.
    #[instrument(skip(self))]
    pub async fn resolve(&self, package_id: &str, version: &str) -> Result<Option<Arc<Module>>> {
        let mut cache = self.cache.lock().await;

        if version == LATEST {
            if let Some(module) = cache.latest.get(package_id) {
                return Ok(Some(Arc::clone(module)));
            }
            let Some(package) = self.store.get_latest(package_id).await else {
                return Ok(None);
            };
            return self.get_or_load(&mut cache, package).await;
        }

        if version::is_wildcard(version) {
            let pattern = VersionPattern::new(version).inspect_err(|err| {
                tracing::warn!(package_id, version, error = %err, "bad version pattern");
            })?;

            let candidates: Vec<Package> = self
                .store
                .versions(package_id)
                .await
                .into_iter()
                .filter(|p| pattern.matches(&p.version))
                .collect();
            if let Some(best) = version::highest(candidates.iter(), |p| p.version.as_str()) {
                let best = best.clone();
                return self.get_or_load(&mut cache, best).await;
            }

            let Some(known) = cache.by_package.get(package_id) else {
                return Ok(None);
            };
            let matching: Vec<&Arc<Module>> =
                known.iter().filter(|m| pattern.matches(m.version())).collect();
            let best = version::highest(matching.into_iter(), |m| m.version());
            return Ok(best.map(|m| Arc::clone(m)));
        }

        match self.store.get(package_id, version).await {
            Some(package) => self.get_or_load(&mut cache, package).await,
            None => Ok(cache
                .modules
                .get(&Module::key_for(package_id, version))
                .cloned()),
        }
    }

    /// Discovered types of the resolved module, or empty.
    pub async fn get_types(&self, package_id: &str, version: &str) -> Vec<DriverType> {
        self.get(package_id, version)
            .await
            .map(|m| m.types.clone())
            .unwrap_or_default()
    }

    /// Every module currently cached.
    pub async fn modules(&self) -> Vec<Arc<Module>> {
        let cache = self.cache.lock().await;
        let mut modules: Vec<Arc<Module>> = cache.modules.values().cloned().collect();
        modules.sort_by(|a, b| a.key.cmp(&b.key));
        modules
    }

    async fn get_or_load(
        &self,
        cache: &mut ModuleCache,
        package: Package,
    ) -> Result<Option<Arc<Module>>> {
        if !self.config.categories.contains(&package.category) {
            tracing::debug!(
                package = %package.key(),
                category = %package.category,
                "category not served"
            );
            return Ok(None);
        }

        let key = Module::key_for(&package.id, &package.version);
        let stale = match cache.modules.get(&key) {
            Some(module) if module.package.hash() == package.hash() => {
                return Ok(Some(Arc::clone(module)));
            }
            Some(module) => Some(Arc::clone(module)),
            None => None,
        };

        // Same version, rebuilt package. The new build reuses the context
        // id, so the old context goes first; the stale module stays cached
        // until the new one has loaded.
        let stale_context = stale.as_ref().and_then(|module| {
            tracing::info!(module = %key, "package rebuilt, reloading module");
            let context = self.contexts.get(&module.load_context_id);
            self.contexts.remove_load_context(&module.load_context_id);
            context
        });

        match self.load_module(&package).await {
            Ok(module) => {
                if let Some(stale) = &stale {
                    cache.remove(stale);
                }
                let module = Arc::new(module);
                cache.insert(Arc::clone(&module));
                tracing::info!(
                    module = %module.key,
                    types = module.types.len(),
                    "module loaded"
                );
                self.events.publish(PlatformEvent::ModuleAdded {
                    module_key: module.key.clone(),
                    package_id: package.id.clone(),
                    version: package.version.clone(),
                });
                Ok(Some(module))
            }
            Err(err) => {
                if let Some(context) = stale_context {
                    self.contexts
                        .add_load_context(context.id(), context.entry_path());
                }
                tracing::warn!(package = %package.key(), error = %err, "module load failed");
                self.events.publish(PlatformEvent::ModuleLoadError {
                    package_id: package.id.clone(),
                    version: package.version.clone(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn load_module(&self, package: &Package) -> Result<Module> {
        let working_dir = staging::stage(package, &self.config.modules_root).await?;
        let entry_path = working_dir.join((self.config.entry_filter)(&package.id));

        let context_id = load_context_id(&package.category, &package.id, &package.version);
        let context = self.contexts.add_load_context(&context_id, &entry_path);
        let types = self
            .contexts
            .get_types_from_file(&context, &entry_path, self.config.capability);

        if types.is_empty() {
            self.contexts.remove_load_context(&context_id);
            return Err(ModuleError::NoMatchingTypes {
                package_id: package.id.clone(),
                version: package.version.clone(),
                capability: self.config.capability.to_string(),
            });
        }

        Ok(Module {
            key: Module::key_for(&package.id, &package.version),
            description: context
                .description(&entry_path)
                .or_else(|| package.description.clone()),
            package: package.clone(),
            types,
            load_context_id: context_id,
        })
    }

    /// Apply a package lifecycle event to the cache.
    pub async fn handle_event(&self, event: &PlatformEvent) {
        match event {
            PlatformEvent::PackageAdded {
                package_id,
                category,
                ..
            } if self.config.categories.contains(category) => {
                let mut cache = self.cache.lock().await;
                cache.latest.remove(package_id);
                cache.by_package.remove(package_id);
                tracing::debug!(
                    package_id = %package_id,
                    "package added, resolution indexes dropped"
                );
            }
            PlatformEvent::PackageRemoved {
                package_id,
                version,
                category,
            } if self.config.categories.contains(category) => {
                self.unload(package_id, version, category).await;
            }
            _ => {}
        }
    }

    async fn unload(&self, package_id: &str, version: &str, category: &str) {
        let key = Module::key_for(package_id, version);
        let removed = {
            let mut cache = self.cache.lock().await;
            let existing = cache.modules.get(&key).cloned();
            existing.and_then(|module| cache.remove(&module))
        };

        self.contexts
            .remove_load_context(&load_context_id(category, package_id, version));

        if removed.is_some() {
            tracing::info!(module = %key, "module removed");
            self.events.publish(PlatformEvent::ModuleRemoved {
                module_key: key,
                package_id: package_id.to_owned(),
                version: version.to_owned(),
            });
        }
    }

    /// Follow package events on the bus until it closes.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => manager.handle_event(&event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "module manager lagged behind package events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
