//! The driver provider.
//!
//! [`DriverProvider`] owns the live driver instances, keyed by configuration
//! id. A reconciliation pass ([`load`](DriverProvider::load)) compares each
//! enabled configuration's `(configuration hash, package hash)` identity with
//! what is installed and only rebuilds configurations whose identity moved.
//! Configuration and package events re-arm a shared debounce timer so a
//! burst of edits triggers one pass.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use strata_core::{DriverConfiguration, DriverInstance, EventBus, PlatformEvent, VolumeProvider};
use strata_modules::{Module, ModuleManager};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::debounce::Debouncer;
use crate::profile::ConfigurationProfile;

/// Default debounce window for reconciliation.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Summary of an installed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverInformation {
    pub configuration_id: String,
    pub name: String,
    pub description: Option<String>,
    pub package_id: String,
    pub package_version: String,
    pub driver_types: Vec<String>,
}

#[derive(Clone)]
struct InstalledDriver {
    type_name: &'static str,
    instance: DriverInstance,
}

#[derive(Default)]
struct ProviderState {
    drivers: HashMap<String, Vec<InstalledDriver>>,
    installed_configurations: HashMap<String, String>,
    installed_module_hashes: HashMap<String, String>,
    information: HashMap<String, DriverInformation>,
}

/// Outcome counters of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub installed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// Live driver instances reconciled against configuration and packages.
pub struct DriverProvider {
    modules: Arc<ModuleManager>,
    profile: Arc<dyn ConfigurationProfile>,
    volumes: Arc<dyn VolumeProvider>,
    events: EventBus,
    debounce: Duration,
    state: Mutex<ProviderState>,
    // Serializes passes; `state` is only held for short sections.
    reconcile: tokio::sync::Mutex<()>,
}

impl DriverProvider {
    pub fn new(
        modules: Arc<ModuleManager>,
        profile: Arc<dyn ConfigurationProfile>,
        volumes: Arc<dyn VolumeProvider>,
        events: EventBus,
    ) -> Self {
        Self {
            modules,
            profile,
            volumes,
            events,
            debounce: DEFAULT_DEBOUNCE,
            state: Mutex::new(ProviderState::default()),
            reconcile: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Run one reconciliation pass.
    #[instrument(skip(self))]
    pub async fn load(&self) -> ReconcileSummary {
        let _pass = self.reconcile.lock().await;
        let mut summary = ReconcileSummary::default();
        let mut seen: HashSet<String> = HashSet::new();

        for configuration in self.profile.configurations() {
            if !configuration.enabled {
                summary.skipped += 1;
                continue;
            }
            if let Err(err) = configuration.validate() {
                self.report_error(&configuration.id, err.to_string());
                summary.failed += 1;
                seen.insert(configuration.id.clone());
                continue;
            }

            let resolved = self
                .modules
                .resolve(&configuration.package_id, &configuration.package_version)
                .await;
            let module = match resolved {
                Ok(Some(module)) => module,
                Ok(None) => {
                    tracing::debug!(
                        configuration_id = %configuration.id,
                        package_id = %configuration.package_id,
                        package_version = %configuration.package_version,
                        "no module resolved, skipping"
                    );
                    summary.skipped += 1;
                    continue;
                }
                Err(err) => {
                    // The package is there but would not load; whatever is
                    // already running for this id stays.
                    self.report_error(&configuration.id, err.to_string());
                    summary.failed += 1;
                    seen.insert(configuration.id.clone());
                    continue;
                }
            };
            if module.types.is_empty() {
                summary.skipped += 1;
                continue;
            }
            seen.insert(configuration.id.clone());

            let configuration_hash = configuration.hash();
            let package_hash = module.package.hash();
            if self.is_installed(&configuration.id, &configuration_hash, &package_hash) {
                summary.unchanged += 1;
                continue;
            }

            match self.instantiate(&configuration, &module).await {
                Ok(fresh) => {
                    let previous = self.install(
                        &configuration,
                        &module,
                        fresh,
                        configuration_hash,
                        package_hash,
                    );
                    dispose_all(previous).await;
                    summary.installed += 1;
                }
                Err(message) => {
                    // The previous instances, if any, keep running.
                    self.report_error(&configuration.id, message);
                    summary.failed += 1;
                }
            }
        }

        let stale: Vec<String> = self
            .lock()
            .drivers
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.remove_driver(&id).await;
            summary.removed += 1;
        }

        tracing::info!(
            installed = summary.installed,
            unchanged = summary.unchanged,
            failed = summary.failed,
            skipped = summary.skipped,
            removed = summary.removed,
            "driver reconciliation complete"
        );
        summary
    }

    fn is_installed(&self, id: &str, configuration_hash: &str, package_hash: &str) -> bool {
        let state = self.lock();
        state.installed_configurations.get(id).map(String::as_str) == Some(configuration_hash)
            && state.installed_module_hashes.get(id).map(String::as_str) == Some(package_hash)
    }

    /// Construct one instance per discovered type and bind its volume. On
    /// any failure, instances built so far are disposed.
    async fn instantiate(
        &self,
        configuration: &DriverConfiguration,
        module: &Module,
    ) -> std::result::Result<Vec<InstalledDriver>, String> {
        let mut built: Vec<InstalledDriver> = Vec::with_capacity(module.types.len());
        for driver_type in &module.types {
            let result = async {
                let instance = driver_type
                    .construct(configuration.clone())
                    .map_err(|e| format!("{}: {e}", driver_type.name))?;
                let volume = self
                    .volumes
                    .get_volume(configuration.volume_id())
                    .map_err(|e| e.to_string())?;
                instance
                    .driver()
                    .bind_volume(volume)
                    .await
                    .map_err(|e| format!("{}: {e}", driver_type.name))?;
                Ok::<_, String>(instance)
            }
            .await;

            match result {
                Ok(instance) => built.push(InstalledDriver {
                    type_name: driver_type.name,
                    instance,
                }),
                Err(message) => {
                    dispose_all(built).await;
                    return Err(message);
                }
            }
        }
        Ok(built)
    }

    fn install(
        &self,
        configuration: &DriverConfiguration,
        module: &Module,
        fresh: Vec<InstalledDriver>,
        configuration_hash: String,
        package_hash: String,
    ) -> Vec<InstalledDriver> {
        let id = configuration.id.clone();
        let type_names: Vec<String> = fresh.iter().map(|d| d.type_name.to_owned()).collect();

        let previous = {
            let mut state = self.lock();
            state
                .installed_configurations
                .insert(id.clone(), configuration_hash);
            state.installed_module_hashes.insert(id.clone(), package_hash);
            state.information.insert(
                id.clone(),
                DriverInformation {
                    configuration_id: id.clone(),
                    name: configuration.name.clone(),
                    description: configuration.description.clone(),
                    package_id: module.package.id.clone(),
                    package_version: module.package.version.clone(),
                    driver_types: type_names.clone(),
                },
            );
            state.drivers.insert(id.clone(), fresh).unwrap_or_default()
        };

        for driver_type in type_names {
            tracing::info!(configuration_id = %id, driver_type = %driver_type, "driver added");
            self.events.publish(PlatformEvent::DriverAdded {
                configuration_id: id.clone(),
                driver_type,
            });
        }
        previous
    }

    async fn remove_driver(&self, id: &str) {
        let removed = {
            let mut state = self.lock();
            state.installed_configurations.remove(id);
            state.installed_module_hashes.remove(id);
            state.information.remove(id);
            state.drivers.remove(id)
        };
        if let Some(drivers) = removed {
            dispose_all(drivers).await;
            tracing::info!(configuration_id = %id, "driver removed");
            self.events.publish(PlatformEvent::DriverRemoved {
                configuration_id: id.to_owned(),
            });
        }
    }

    fn report_error(&self, id: &str, message: String) {
        tracing::warn!(configuration_id = %id, error = %message, "driver load failed");
        self.events.publish(PlatformEvent::DriverLoadError {
            configuration_id: id.to_owned(),
            message,
        });
    }

    // ── lookups ──────────────────────────────────────────────────────

    /// First installed instance for `configuration_id` exposing trait
    /// object `C` (for example `dyn EntityReadDriver<ObjectEntity>`).
    pub fn get_driver<C>(&self, configuration_id: &str) -> Option<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.lock()
            .drivers
            .get(configuration_id)?
            .iter()
            .find_map(|d| d.instance.get::<C>())
    }

    /// Every installed instance exposing `C`, ordered by configuration id.
    pub fn get_drivers<C>(&self) -> Vec<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let state = self.lock();
        let mut ids: Vec<&String> = state.drivers.keys().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| state.drivers[id].iter())
            .filter_map(|d| d.instance.get::<C>())
            .collect()
    }

    /// Installed instances for one configuration.
    pub fn instances(&self, configuration_id: &str) -> Vec<DriverInstance> {
        self.lock()
            .drivers
            .get(configuration_id)
            .map(|ds| ds.iter().map(|d| d.instance.clone()).collect())
            .unwrap_or_default()
    }

    pub fn information(&self) -> Vec<DriverInformation> {
        let mut info: Vec<DriverInformation> = self.lock().information.values().cloned().collect();
        info.sort_by(|a, b| a.configuration_id.cmp(&b.configuration_id));
        info
    }

    pub fn configuration_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().drivers.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Reconcile on every configuration or package event, debounced.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let debouncer = Debouncer::new(self.debounce, move || {
            let weak = weak.clone();
            async move {
                if let Some(provider) = weak.upgrade() {
                    provider.load().await;
                }
            }
        });

        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.triggers_reconciliation() => debouncer.trigger(),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "driver provider lagged, reconciling");
                        debouncer.trigger();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Dispose every instance and forget all bookkeeping.
    pub async fn shutdown(&self) {
        let _pass = self.reconcile.lock().await;
        let drivers: Vec<InstalledDriver> = {
            let mut state = self.lock();
            state.installed_configurations.clear();
            state.installed_module_hashes.clear();
            state.information.clear();
            state.drivers.drain().flat_map(|(_, ds)| ds).collect()
        };
        let count = drivers.len();
        dispose_all(drivers).await;
        tracing::info!(count, "driver provider shut down");
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn dispose_all(drivers: Vec<InstalledDriver>) {
    futures::future::join_all(drivers.iter().map(|d| d.instance.driver().dispose())).await;
}
