//! Object persistence.
//!
//! [`ObjectStore`] owns the SQL for the `objects` table. Publish is a batch
//! upsert in one transaction with no compare step, so the last write for a
//! uuid wins. Reads stamp `accessed_at`; accepted writes stamp
//! `updated_at`.

use rusqlite::{Connection, OptionalExtension, Row, params};
use strata_core::{Entity, ObjectEntity};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::StoreResult;

const SELECT_COLUMNS: &str =
    "uuid, name, content_type, parent_uuid, definition_uuid, source_uuid, created, hash";

/// Which bookkeeping column an expire call looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    Updated,
    Accessed,
}

impl Tracked {
    fn column(self) -> &'static str {
        match self {
            Self::Updated => "updated_at",
            Self::Accessed => "accessed_at",
        }
    }
}

/// Column lookups that map each query key to matching uuids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnQuery {
    /// Case-insensitive name match; `*` is a wildcard.
    Name,
    /// Case-insensitive content type match.
    ContentType,
    Definition,
}

impl ColumnQuery {
    fn sql(self) -> &'static str {
        match self {
            Self::Name => "SELECT uuid FROM objects WHERE name LIKE ?1 ESCAPE '\\' ORDER BY uuid",
            Self::ContentType => {
                "SELECT uuid FROM objects WHERE lower(content_type) = lower(?1) ORDER BY uuid"
            }
            Self::Definition => "SELECT uuid FROM objects WHERE definition_uuid = ?1 ORDER BY uuid",
        }
    }

    fn bind(self, key: &str) -> String {
        match self {
            Self::Name => like_pattern(key),
            Self::ContentType | Self::Definition => key.to_owned(),
        }
    }
}

/// Translate a `*` wildcard pattern into a LIKE pattern, escaping the
/// characters LIKE treats specially.
pub fn like_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('%'),
            other => out.push(other),
        }
    }
    out
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<ObjectEntity> {
    Ok(ObjectEntity::from_parts(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

/// SQL operations on the `objects` table.
#[derive(Clone)]
pub struct ObjectStore {
    db: Database,
}

impl ObjectStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert a batch. Returns, per object, whether a row already existed.
    #[instrument(skip(self, objects), fields(count = objects.len()))]
    pub async fn upsert(&self, objects: Vec<ObjectEntity>, now: i64) -> StoreResult<Vec<bool>> {
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let mut existed = Vec::with_capacity(objects.len());
                {
                    let mut exists = tx.prepare_cached("SELECT 1 FROM objects WHERE uuid = ?1")?;
                    let mut upsert = tx.prepare_cached(
                        "INSERT INTO objects (uuid, name, content_type, parent_uuid, \
                         definition_uuid, source_uuid, created, hash, updated_at, accessed_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
                         ON CONFLICT(uuid) DO UPDATE SET \
                         name = excluded.name, content_type = excluded.content_type, \
                         parent_uuid = excluded.parent_uuid, \
                         definition_uuid = excluded.definition_uuid, \
                         source_uuid = excluded.source_uuid, created = excluded.created, \
                         hash = excluded.hash, updated_at = excluded.updated_at",
                    )?;
                    for object in &objects {
                        existed.push(exists.exists(params![object.uuid])?);
                        upsert.execute(params![
                            object.uuid,
                            object.name,
                            object.content_type,
                            object.parent_uuid,
                            object.definition_uuid,
                            object.source_uuid,
                            object.created,
                            object.hash(),
                            now,
                        ])?;
                    }
                }
                tx.commit()?;
                debug!(count = existed.len(), "objects upserted");
                Ok(existed)
            })
            .await
    }

    /// Read objects by uuid, stamping `accessed_at` on every hit.
    #[instrument(skip(self, uuids), fields(count = uuids.len()))]
    pub async fn read(
        &self,
        uuids: Vec<String>,
        now: i64,
    ) -> StoreResult<Vec<Option<ObjectEntity>>> {
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let mut found = Vec::with_capacity(uuids.len());
                {
                    let mut select = tx.prepare_cached(&format!(
                        "SELECT {SELECT_COLUMNS} FROM objects WHERE uuid = ?1"
                    ))?;
                    let mut touch =
                        tx.prepare_cached("UPDATE objects SET accessed_at = ?2 WHERE uuid = ?1")?;
                    for uuid in &uuids {
                        let object = select.query_row(params![uuid], object_from_row).optional()?;
                        if object.is_some() {
                            touch.execute(params![uuid, now])?;
                        }
                        found.push(object);
                    }
                }
                tx.commit()?;
                Ok(found)
            })
            .await
    }

    /// Delete by uuid. Returns the number of rows removed.
    #[instrument(skip(self, uuids), fields(count = uuids.len()))]
    pub async fn delete(&self, uuids: Vec<String>) -> StoreResult<usize> {
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = 0;
                {
                    let mut delete = tx.prepare_cached("DELETE FROM objects WHERE uuid = ?1")?;
                    for uuid in &uuids {
                        removed += delete.execute(params![uuid])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
    }

    /// Remove each target whose tracked time is at or before its
    /// timestamp. Returns the targets actually removed.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn expire(
        &self,
        tracked: Tracked,
        requests: Vec<(String, i64)>,
    ) -> StoreResult<Vec<String>> {
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = Vec::new();
                {
                    let mut delete = tx.prepare_cached(&format!(
                        "DELETE FROM objects WHERE uuid = ?1 AND {} <= ?2",
                        tracked.column()
                    ))?;
                    for (uuid, timestamp) in requests {
                        if delete.execute(params![uuid, timestamp])? > 0 {
                            removed.push(uuid);
                        }
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
    }

    /// Remove every object whose tracked time is at or before `threshold`.
    #[instrument(skip(self))]
    pub async fn expire_before(
        &self,
        tracked: Tracked,
        threshold: i64,
    ) -> StoreResult<Vec<String>> {
        self.db
            .execute_mut(move |conn| {
                let column = tracked.column();
                let tx = conn.transaction()?;
                let removed = {
                    let mut select = tx.prepare(&format!(
                        "SELECT uuid FROM objects WHERE {column} <= ?1 ORDER BY uuid"
                    ))?;
                    select
                        .query_map(params![threshold], |row| row.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                };
                tx.execute(
                    &format!("DELETE FROM objects WHERE {column} <= ?1"),
                    params![threshold],
                )?;
                tx.commit()?;
                Ok(removed)
            })
            .await
    }

    /// For each key, the uuids matching it under `query`.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn lookup(
        &self,
        query: ColumnQuery,
        keys: Vec<String>,
    ) -> StoreResult<Vec<(String, Vec<String>)>> {
        self.db
            .execute(move |conn| {
                let mut select = conn.prepare_cached(query.sql())?;
                keys.into_iter()
                    .map(|key| -> StoreResult<(String, Vec<String>)> {
                        let uuids = select
                            .query_map(params![query.bind(&key)], |row| row.get::<_, String>(0))?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        Ok((key, uuids))
                    })
                    .collect()
            })
            .await
    }

    /// Children of each parent. `None` when the parent itself is absent.
    #[instrument(skip(self, parents), fields(count = parents.len()))]
    pub async fn children(
        &self,
        parents: Vec<String>,
    ) -> StoreResult<Vec<(String, Option<Vec<String>>)>> {
        self.db
            .execute(move |conn| {
                let mut exists = conn.prepare_cached("SELECT 1 FROM objects WHERE uuid = ?1")?;
                let mut select = conn.prepare_cached(
                    "SELECT uuid FROM objects WHERE parent_uuid = ?1 ORDER BY uuid",
                )?;
                parents
                    .into_iter()
                    .map(|parent| -> StoreResult<(String, Option<Vec<String>>)> {
                        if !exists.exists(params![parent])? {
                            return Ok((parent, None));
                        }
                        let uuids = select
                            .query_map(params![parent], |row| row.get::<_, String>(0))?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        Ok((parent, Some(uuids)))
                    })
                    .collect()
            })
            .await
    }

    /// Parent of each child. Outer `None` when the child is absent, inner
    /// `None` for root objects.
    #[instrument(skip(self, children), fields(count = children.len()))]
    pub async fn parents(
        &self,
        children: Vec<String>,
    ) -> StoreResult<Vec<(String, Option<Option<String>>)>> {
        self.db
            .execute(move |conn| {
                let mut select =
                    conn.prepare_cached("SELECT parent_uuid FROM objects WHERE uuid = ?1")?;
                children
                    .into_iter()
                    .map(|child| -> StoreResult<(String, Option<Option<String>>)> {
                        let parent = select
                            .query_row(params![child], |row| row.get::<_, Option<String>>(0))
                            .optional()?;
                        Ok((child, parent))
                    })
                    .collect()
            })
            .await
    }

    /// Uuids of objects with no parent.
    pub async fn roots(&self) -> StoreResult<Vec<String>> {
        self.db
            .execute(|conn| {
                let mut select = conn.prepare(
                    "SELECT uuid FROM objects WHERE parent_uuid IS NULL ORDER BY uuid",
                )?;
                let uuids = select
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(uuids)
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<u64> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
                Ok(u64::try_from(count).unwrap_or(0))
            })
            .await
    }

    /// Bookkeeping times for one object, for tests and diagnostics.
    pub async fn times(&self, uuid: &str) -> StoreResult<Option<(i64, i64)>> {
        let uuid = uuid.to_owned();
        self.db
            .execute(move |conn| Ok(tracked_times(conn, &uuid)?))
            .await
    }
}

fn tracked_times(conn: &Connection, uuid: &str) -> rusqlite::Result<Option<(i64, i64)>> {
    conn.query_row(
        "SELECT updated_at, accessed_at FROM objects WHERE uuid = ?1",
        params![uuid],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> ObjectStore {
        ObjectStore::new(Database::in_memory_and_migrate().await.unwrap())
    }

    #[test]
    fn like_pattern_translates_wildcards() {
        assert_eq!(like_pattern("press*"), "press%");
        assert_eq!(like_pattern("50%_off"), "50\\%\\_off");
        assert_eq!(like_pattern("a\\b"), "a\\\\b");
    }

    #[tokio::test]
    async fn upsert_reports_existing_rows_and_keeps_access_time() {
        let store = store().await;
        let first = store.upsert(vec![ObjectEntity::new("u1", "a", 1)], 10).await.unwrap();
        assert_eq!(first, vec![false]);

        store.read(vec!["u1".into()], 20).await.unwrap();
        let second = store.upsert(vec![ObjectEntity::new("u1", "b", 2)], 30).await.unwrap();
        assert_eq!(second, vec![true]);
        assert_eq!(store.times("u1").await.unwrap(), Some((30, 20)));
    }

    #[tokio::test]
    async fn name_lookup_is_case_insensitive_with_wildcards() {
        let store = store().await;
        store
            .upsert(
                vec![
                    ObjectEntity::new("u1", "Press-1", 1),
                    ObjectEntity::new("u2", "press-2", 1),
                    ObjectEntity::new("u3", "lathe", 1),
                ],
                1,
            )
            .await
            .unwrap();
        let found = store
            .lookup(ColumnQuery::Name, vec!["press*".into(), "LATHE".into(), "mill".into()])
            .await
            .unwrap();
        assert_eq!(found[0].1, vec!["u1".to_owned(), "u2".to_owned()]);
        assert_eq!(found[1].1, vec!["u3".to_owned()]);
        assert!(found[2].1.is_empty());
    }

    #[tokio::test]
    async fn expire_before_removes_only_old_rows() {
        let store = store().await;
        store.upsert(vec![ObjectEntity::new("old", "a", 1)], 100).await.unwrap();
        store.upsert(vec![ObjectEntity::new("new", "b", 1)], 200).await.unwrap();
        let removed = store.expire_before(Tracked::Updated, 150).await.unwrap();
        assert_eq!(removed, vec!["old".to_owned()]);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
