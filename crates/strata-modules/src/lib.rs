//! # strata-modules
//!
//! Versioned plugin packages and the machinery that turns them into
//! loaded modules.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ModuleManager  (cache per id:version)        │
//! ├──────────────────────────────────────────────┤
//! │  LoadContextRegistry  (hash(cat:id:ver))      │
//! │  PluginCatalog        (linked entry points)   │
//! ├──────────────────────────────────────────────┤
//! │  staging  (_modules/{id}-{version})           │
//! │  PackageStore  (package.toml + dist/)         │
//! └──────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod context;
pub mod error;
pub mod manager;
pub mod module;
pub mod package;
pub mod staging;
pub mod version;

// ── re-exports ───────────────────────────────────────────────────────

pub use catalog::{EntryFilter, EntryManifest, PluginCatalog, PluginEntry, default_entry_filter};
pub use context::{LoadContext, LoadContextRegistry, load_context_id};
pub use error::{ModuleError, Result};
pub use manager::{ModuleManager, ModuleManagerConfig};
pub use module::Module;
pub use package::{DirectoryPackageStore, Package, PackageManifest, PackageStore};
pub use version::{PackageVersion, VersionPattern};
