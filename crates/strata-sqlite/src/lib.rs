//! # strata-sqlite
//!
//! Persistent entity backend on SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SqliteObjectDriver (driver contract,   │
//! │  relational + pattern queries)          │
//! ├─────────────────────────────────────────┤
//! │  ObjectStore (SQL for `objects`)        │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL, blocking pool) │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Publish is a batch upsert with no compare step: the last write for a
//! uuid wins, so callers that need ordering by `created` must not publish
//! out of order.

pub mod db;
pub mod driver;
pub mod error;
pub mod migration;
pub mod plugin;
pub mod store;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use driver::{DATABASE_PARAMETER, DatabaseLocation, IN_MEMORY_PARAMETER, SqliteObjectDriver};
pub use error::{StoreError, StoreResult};
pub use plugin::PLUGIN;
pub use store::{ColumnQuery, ObjectStore, Tracked, like_pattern};
