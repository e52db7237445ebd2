//! # strata-remote
//!
//! Entity backend that forwards every operation to a remote service over
//! HTTP. Failures of the whole call come back as tagged results per key:
//! unreachable service is `NotAvailable`, a slow one `Timeout`, a missing
//! route `RouteNotConfigured`.
//!
//! Reads are cached for a short TTL in a [`moka`] cache; writes through the
//! driver invalidate what they touch.

pub mod cache;
pub mod client;
pub mod driver;
pub mod error;
pub mod plugin;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheStats, ReadCache};
pub use client::{HttpRemoteClient, RemoteClient};
pub use driver::{
    BASE_URL_PARAMETER, CACHE_CAPACITY_PARAMETER, CACHE_TTL_PARAMETER, RemoteEntityDriver,
    TIMEOUT_PARAMETER,
};
pub use error::{RemoteError, RemoteResult};
pub use plugin::{PLUGIN, RemoteDescriptionDriver, RemoteObjectDriver, remote_capabilities};
