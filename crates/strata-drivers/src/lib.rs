//! # strata-drivers
//!
//! Turns declarative driver configurations into live backend instances.
//!
//! - [`profile`] -- configuration sources (in-memory and file-watched TOML).
//! - [`provider`] -- the [`DriverProvider`] and its reconciliation pass.
//! - [`debounce`] -- the timer that coalesces change bursts.
//! - [`platform`] -- the [`Platform`] context wiring everything together.

pub mod debounce;
pub mod error;
pub mod platform;
pub mod profile;
pub mod provider;

pub use debounce::Debouncer;
pub use error::{ProviderError, Result};
pub use platform::{DRIVER_CATEGORY, Platform, PlatformSettings};
pub use profile::{ConfigurationProfile, FileConfigurationProfile, MemoryConfigurationProfile};
pub use provider::{DEFAULT_DEBOUNCE, DriverInformation, DriverProvider, ReconcileSummary};
