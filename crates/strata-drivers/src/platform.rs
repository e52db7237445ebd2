//! The platform context.
//!
//! [`Platform`] is built once at startup and owns every shared component:
//! the event bus, package store, module manager, volume provider,
//! configuration profile and driver provider. Nothing in the workspace keeps
//! process-wide state; components reach each other through this object.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{DirectoryVolumeProvider, EventBus, VolumeProvider};
use strata_modules::{
    DirectoryPackageStore, ModuleManager, ModuleManagerConfig, PackageStore, PluginCatalog,
};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::profile::{ConfigurationProfile, FileConfigurationProfile};
use crate::provider::{DEFAULT_DEBOUNCE, DriverProvider};

/// Package category served by the driver module manager.
pub const DRIVER_CATEGORY: &str = "driver";

/// Filesystem layout and timing for a [`Platform`].
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub packages_dir: PathBuf,
    pub modules_dir: PathBuf,
    pub volumes_dir: PathBuf,
    pub configurations_dir: PathBuf,
    pub debounce: Duration,
    /// Watch the configuration directory for edits.
    pub watch_configurations: bool,
}

impl PlatformSettings {
    /// Default layout rooted at `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            packages_dir: root.join("packages"),
            modules_dir: root.join("_modules"),
            volumes_dir: root.join("volumes"),
            configurations_dir: root.join("config").join("drivers"),
            debounce: DEFAULT_DEBOUNCE,
            watch_configurations: true,
        }
    }
}

pub struct Platform {
    pub events: EventBus,
    pub packages: Arc<DirectoryPackageStore>,
    pub modules: Arc<ModuleManager>,
    pub volumes: Arc<DirectoryVolumeProvider>,
    pub profile: Arc<FileConfigurationProfile>,
    pub drivers: Arc<DriverProvider>,
    tasks: Vec<JoinHandle<()>>,
}

impl Platform {
    /// Build every component, scan packages and configurations, run one
    /// reconciliation pass and start the background listeners.
    pub async fn start(settings: PlatformSettings, catalog: PluginCatalog) -> Result<Self> {
        for dir in [
            &settings.packages_dir,
            &settings.modules_dir,
            &settings.volumes_dir,
            &settings.configurations_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let events = EventBus::default();

        let packages = Arc::new(DirectoryPackageStore::new(
            &settings.packages_dir,
            events.clone(),
        ));
        packages.scan().await?;

        let modules = Arc::new(ModuleManager::new(
            ModuleManagerConfig::new(DRIVER_CATEGORY, &settings.modules_dir),
            Arc::clone(&packages) as Arc<dyn PackageStore>,
            catalog,
            events.clone(),
        ));

        let volumes = Arc::new(DirectoryVolumeProvider::new(&settings.volumes_dir));

        let profile = Arc::new(FileConfigurationProfile::new(
            &settings.configurations_dir,
            events.clone(),
        ));
        profile.reload()?;

        let drivers = Arc::new(
            DriverProvider::new(
                Arc::clone(&modules),
                Arc::clone(&profile) as Arc<dyn ConfigurationProfile>,
                Arc::clone(&volumes) as Arc<dyn VolumeProvider>,
                events.clone(),
            )
            .with_debounce(settings.debounce),
        );

        let mut tasks = vec![modules.start(), drivers.start()];
        if settings.watch_configurations {
            tasks.push(profile.watch()?);
        }

        drivers.load().await;
        tracing::info!(
            packages = %settings.packages_dir.display(),
            configurations = %settings.configurations_dir.display(),
            "platform started"
        );

        Ok(Self {
            events,
            packages,
            modules,
            volumes,
            profile,
            drivers,
            tasks,
        })
    }

    /// Stop listeners and dispose every driver.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.drivers.shutdown().await;
        tracing::info!("platform stopped");
    }
}
