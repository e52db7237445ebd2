//! CLI argument definitions for Strata.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Strata -- pluggable entity storage platform.
#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Strata -- pluggable entity storage platform",
    long_about = "Loads driver packages, reconciles driver configurations against them \
                  and serves entity storage backends until interrupted."
)]
pub struct Cli {
    /// Path to the platform configuration file.
    #[arg(long, short, global = true, default_value = "strata.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the platform and keep drivers reconciled until Ctrl-C.
    Run,

    /// Run one reconciliation pass and report the installed drivers.
    Status {
        /// Print driver information as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage driver packages.
    Packages {
        #[command(subcommand)]
        action: PackageAction,
    },
}

/// Actions for managing driver packages.
#[derive(Subcommand)]
pub enum PackageAction {
    /// List installed packages.
    List,
    /// Install a package from a directory of build artifacts.
    Install {
        /// Package id.
        id: String,
        /// Package version, e.g. 1.2.0.
        version: String,
        /// Directory copied into the package's `dist/`.
        dist: PathBuf,
        /// Optional description recorded in the manifest.
        #[arg(long, short)]
        description: Option<String>,
    },
    /// Remove one installed package version.
    Remove {
        id: String,
        version: String,
    },
}
