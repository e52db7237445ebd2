//! CLI entry point for Strata.
//!
//! This binary provides the `strata` command: `run` starts the platform and
//! keeps drivers reconciled, `status` reports installed drivers after one
//! pass, `packages` manages the driver package store.

mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use strata_core::EventBus;
use strata_drivers::{DRIVER_CATEGORY, Platform, PlatformSettings};
use strata_modules::{DirectoryPackageStore, PackageManifest, PackageStore, PluginCatalog};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, PackageAction};
use crate::config::{LogFormat, StrataConfig};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = StrataConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run => {
            init_tracing(&config.platform.log_level, config.platform.log_format);
            cmd_run(&config).await
        }
        Commands::Status { json } => {
            init_tracing("warn", config.platform.log_format);
            cmd_status(&config, json).await
        }
        Commands::Packages { action } => {
            init_tracing("warn", config.platform.log_format);
            cmd_packages(&config, action).await
        }
    }
}

/// Every backend linked into this binary.
fn catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with(&strata_memory::PLUGIN)
        .with(&strata_sqlite::PLUGIN)
        .with(&strata_remote::PLUGIN)
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(config: &StrataConfig) -> Result<()> {
    let settings = config.settings();
    info!(root = %config.platform.root.display(), "starting Strata");

    let platform = Platform::start(settings, catalog())
        .await
        .context("failed to start platform")?;
    info!(
        drivers = platform.drivers.configuration_ids().len(),
        "platform ready, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    platform.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

async fn cmd_status(config: &StrataConfig, json: bool) -> Result<()> {
    let settings = PlatformSettings {
        watch_configurations: false,
        ..config.settings()
    };
    let platform = Platform::start(settings.clone(), catalog())
        .await
        .context("failed to start platform")?;

    let mut information = platform.drivers.information();
    information.sort_by(|a, b| a.configuration_id.cmp(&b.configuration_id));

    if json {
        println!("{}", serde_json::to_string_pretty(&information)?);
    } else {
        println!();
        println!("  Strata Status");
        println!("  =============");
        println!();
        println!("  Packages:        {}", settings.packages_dir.display());
        println!("  Configurations:  {}", settings.configurations_dir.display());
        println!("  Volumes:         {}", settings.volumes_dir.display());
        println!();
        if information.is_empty() {
            println!("  No drivers installed.");
        }
        for driver in &information {
            println!(
                "  {:<24} {}@{}  [{}]",
                driver.configuration_id,
                driver.package_id,
                driver.package_version,
                driver.driver_types.join(", "),
            );
        }
        println!();
    }

    platform.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: packages
// ---------------------------------------------------------------------------

async fn cmd_packages(config: &StrataConfig, action: PackageAction) -> Result<()> {
    let settings = config.settings();
    let store = DirectoryPackageStore::new(&settings.packages_dir, EventBus::default());
    store.scan().await.context("failed to scan packages")?;

    match action {
        PackageAction::List => {
            let packages = store.list().await;
            if packages.is_empty() {
                println!("No packages installed in {}", settings.packages_dir.display());
            }
            for package in packages {
                println!(
                    "{:<24} {:<10} {:<8} {}",
                    package.id,
                    package.version,
                    package.category,
                    package.description.unwrap_or_default(),
                );
            }
        }
        PackageAction::Install {
            id,
            version,
            dist,
            description,
        } => {
            let mut manifest = PackageManifest::new(id, version, DRIVER_CATEGORY);
            if let Some(description) = description {
                manifest = manifest.with_description(description);
            }
            let package = store
                .install(manifest, &dist)
                .await
                .context("failed to install package")?;
            println!("Installed {} at {}", package.key(), package.location.display());
        }
        PackageAction::Remove { id, version } => {
            match store
                .remove(&id, &version)
                .await
                .context("failed to remove package")?
            {
                Some(package) => println!("Removed {}", package.key()),
                None => println!("Package {id}@{version} is not installed"),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Install the tracing subscriber. `RUST_LOG` wins over `default_level`.
fn init_tracing(default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
