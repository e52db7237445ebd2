//! Schema migrations.
//!
//! Migrations are static SQL keyed by version number. Applied versions are
//! tracked in `_migrations`, so each runs exactly once per database.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "objects table",
        sql: r#"
            CREATE TABLE objects (
                uuid            TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                content_type    TEXT NOT NULL,
                parent_uuid     TEXT,
                definition_uuid TEXT,
                source_uuid     TEXT,
                created         INTEGER NOT NULL,
                hash            TEXT NOT NULL
            );
            CREATE INDEX idx_objects_parent ON objects(parent_uuid);
            CREATE INDEX idx_objects_name ON objects(name);
            CREATE INDEX idx_objects_content_type ON objects(content_type);
            CREATE INDEX idx_objects_definition ON objects(definition_uuid);
        "#,
    },
    Migration {
        version: 2,
        description: "expiration bookkeeping",
        sql: r#"
            ALTER TABLE objects ADD COLUMN updated_at INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE objects ADD COLUMN accessed_at INTEGER NOT NULL DEFAULT 0;
            CREATE INDEX idx_objects_updated ON objects(updated_at);
            CREATE INDEX idx_objects_accessed ON objects(accessed_at);
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`. Synchronous; call it from
/// the blocking pool.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(current_version = current, pending = pending.len(), "running pending migrations");
    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(version = migration.version, description = migration.description, "applying migration");

    // `conn.transaction()` needs `&mut Connection`; manage it by hand.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().timestamp()
            ],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;
        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }
    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn objects_table_has_bookkeeping_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO objects \
             (uuid, name, content_type, created, hash, updated_at, accessed_at) \
             VALUES ('u1', 'n', 'directory', 1, 'h', 2, 3)",
            [],
        )
        .unwrap();
        let accessed: i64 = conn
            .query_row("SELECT accessed_at FROM objects WHERE uuid = 'u1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(accessed, 3);
    }
}
