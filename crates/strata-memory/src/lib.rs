//! # strata-memory
//!
//! Working-tier entity backend. Entities live in process memory, are
//! evicted once they go unread for longer than the configured TTL, and are
//! announced to subscribers when they were created after the instance
//! started.
//!
//! Configuration parameters: `ttl` (seconds, default 300) and
//! `sweep_interval` (seconds, default 10).
//!
//! The catalog entry point is [`PLUGIN`], providing `MemoryObjectDriver`
//! and the `MemoryDescriptionDriver` side table.

pub mod driver;
pub mod plugin;
mod sweep;
mod table;

// ── re-exports ───────────────────────────────────────────────────────

pub use driver::{
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL, MemoryEntityDriver, SWEEP_INTERVAL_PARAMETER,
    TTL_PARAMETER,
};
pub use plugin::{MemoryDescriptionDriver, MemoryObjectDriver, PLUGIN};
