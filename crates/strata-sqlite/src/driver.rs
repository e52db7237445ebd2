//! [`SqliteObjectDriver`]: the durable object backend.
//!
//! The database is opened when the volume is bound: `<volume>/<id>.db` by
//! default, the `database` parameter when set, or an in-memory database
//! when `in_memory = "true"`. Until then, and after disposal, every call
//! answers `NotAvailable`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use strata_core::{
    Consumer, ConsumerSet, CoreError, DeleteRequest, Driver, DriverConfiguration, DriverResponse,
    DriverResult, EntityDeleteDriver, EntityExpireAccessDriver, EntityExpireUpdateDriver,
    EntityPublishDriver, EntityReadDriver, EntitySubscribeDriver, ExpireRequest, ExpireResult,
    ObjectEntity, PublishResult, QueryMatch, Result, ResultType, Volume, now_millis,
};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::StoreError;
use crate::store::{ColumnQuery, ObjectStore, Tracked};

/// Parameter overriding the database file path.
pub const DATABASE_PARAMETER: &str = "database";

/// Parameter selecting an in-memory database.
pub const IN_MEMORY_PARAMETER: &str = "in_memory";

/// Where the driver keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// A file under the bound volume, named after the configuration id.
    Volume,
    File(PathBuf),
    InMemory,
}

pub struct SqliteObjectDriver {
    configuration: DriverConfiguration,
    location: DatabaseLocation,
    started_at: i64,
    store: Mutex<Option<ObjectStore>>,
    consumers: ConsumerSet<ObjectEntity>,
    publish_gate: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
}

impl SqliteObjectDriver {
    pub fn new(configuration: DriverConfiguration) -> Result<Self> {
        let in_memory = configuration
            .parameter_as::<bool>(IN_MEMORY_PARAMETER)?
            .unwrap_or(false);
        let location = match configuration.parameter(DATABASE_PARAMETER) {
            _ if in_memory => DatabaseLocation::InMemory,
            Some(path) if !path.trim().is_empty() => DatabaseLocation::File(PathBuf::from(path)),
            _ => DatabaseLocation::Volume,
        };
        Ok(Self {
            configuration,
            location,
            started_at: now_millis(),
            store: Mutex::new(None),
            consumers: ConsumerSet::new(),
            publish_gate: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Attach an already-open database, bypassing volume resolution.
    pub fn attach(&self, db: Database) {
        *self.lock_store() = Some(ObjectStore::new(db));
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, Option<ObjectStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn object_store(&self) -> Option<ObjectStore> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        self.lock_store().clone()
    }

    fn failed<T>(&self, request: impl Into<String>, err: &StoreError) -> DriverResult<T> {
        warn!(driver = %self.id(), %err, "sqlite operation failed");
        DriverResult::internal_error(self.id(), request, err.to_string())
    }

    /// One `NotAvailable` result per key, or a single one for an empty
    /// request.
    fn unavailable<T>(
        &self,
        keys: impl IntoIterator<Item = String>,
        started: Instant,
    ) -> DriverResponse<T> {
        let mut results: Vec<DriverResult<T>> = keys
            .into_iter()
            .map(|key| DriverResult::not_available(self.id(), key))
            .collect();
        if results.is_empty() {
            results.push(DriverResult::not_available(self.id(), ""));
        }
        DriverResponse::since(results, started)
    }

    // ── queries ──────────────────────────────────────────────────────

    /// Objects whose name matches each pattern (`*` wildcards,
    /// case-insensitive).
    pub async fn query_by_name(&self, patterns: &[String]) -> DriverResponse<QueryMatch> {
        self.column_query(ColumnQuery::Name, patterns).await
    }

    pub async fn query_by_content_type(
        &self,
        content_types: &[String],
    ) -> DriverResponse<QueryMatch> {
        self.column_query(ColumnQuery::ContentType, content_types).await
    }

    pub async fn query_by_definition(
        &self,
        definition_uuids: &[String],
    ) -> DriverResponse<QueryMatch> {
        self.column_query(ColumnQuery::Definition, definition_uuids).await
    }

    async fn column_query(
        &self,
        query: ColumnQuery,
        keys: &[String],
    ) -> DriverResponse<QueryMatch> {
        let started = Instant::now();
        if keys.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let Some(store) = self.object_store() else {
            return self.unavailable(keys.iter().cloned(), started);
        };
        match store.lookup(query, keys.to_vec()).await {
            Ok(found) => {
                let results = found
                    .into_iter()
                    .flat_map(|(key, uuids)| self.matches(key, Some(uuids)))
                    .collect();
                DriverResponse::since(results, started)
            }
            Err(err) => DriverResponse::since(vec![self.failed("", &err)], started),
        }
    }

    /// Children of each parent: `NotFound` when the parent is absent,
    /// `Empty` when it has no children.
    pub async fn query_children(&self, parent_uuids: &[String]) -> DriverResponse<QueryMatch> {
        let started = Instant::now();
        if parent_uuids.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let Some(store) = self.object_store() else {
            return self.unavailable(parent_uuids.iter().cloned(), started);
        };
        match store.children(parent_uuids.to_vec()).await {
            Ok(found) => {
                let results = found
                    .into_iter()
                    .flat_map(|(parent, children)| self.matches(parent, children))
                    .collect();
                DriverResponse::since(results, started)
            }
            Err(err) => DriverResponse::since(vec![self.failed("", &err)], started),
        }
    }

    /// Parent of each child: `NotFound` when the child is absent, `Empty`
    /// for root objects.
    pub async fn query_parent(&self, child_uuids: &[String]) -> DriverResponse<QueryMatch> {
        let started = Instant::now();
        if child_uuids.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let Some(store) = self.object_store() else {
            return self.unavailable(child_uuids.iter().cloned(), started);
        };
        match store.parents(child_uuids.to_vec()).await {
            Ok(found) => {
                let results = found
                    .into_iter()
                    .flat_map(|(child, parent)| {
                        self.matches(child, parent.map(|p| p.into_iter().collect()))
                    })
                    .collect();
                DriverResponse::since(results, started)
            }
            Err(err) => DriverResponse::since(vec![self.failed("", &err)], started),
        }
    }

    /// Objects without a parent, answered under the key `root`.
    pub async fn query_root(&self) -> DriverResponse<QueryMatch> {
        let started = Instant::now();
        let Some(store) = self.object_store() else {
            return self.unavailable(["root".to_owned()], started);
        };
        match store.roots().await {
            Ok(uuids) => {
                DriverResponse::since(self.matches("root".to_owned(), Some(uuids)), started)
            }
            Err(err) => DriverResponse::since(vec![self.failed("root", &err)], started),
        }
    }

    /// Number of stored objects.
    pub async fn count(&self) -> DriverResponse<u64> {
        let started = Instant::now();
        let Some(store) = self.object_store() else {
            return self.unavailable(["count".to_owned()], started);
        };
        let result = match store.count().await {
            Ok(count) => DriverResult::ok(self.id(), "count", count),
            Err(err) => self.failed("count", &err),
        };
        DriverResponse::since(vec![result], started)
    }

    fn matches(&self, key: String, uuids: Option<Vec<String>>) -> Vec<DriverResult<QueryMatch>> {
        match uuids {
            None => vec![DriverResult::not_found(self.id(), key)],
            Some(uuids) if uuids.is_empty() => {
                vec![DriverResult::of(self.id(), key, ResultType::Empty)]
            }
            Some(uuids) => uuids
                .into_iter()
                .map(|uuid| {
                    DriverResult::ok(self.id(), key.clone(), QueryMatch::new(key.clone(), uuid))
                })
                .collect(),
        }
    }

    // ── expiration ───────────────────────────────────────────────────

    async fn expire(
        &self,
        tracked: Tracked,
        requests: &[ExpireRequest],
    ) -> DriverResponse<ExpireResult> {
        let started = Instant::now();
        if requests.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let Some(store) = self.object_store() else {
            return self.unavailable(requests.iter().map(|r| r.target.clone()), started);
        };
        let pairs = requests.iter().map(|r| (r.target.clone(), r.timestamp)).collect();
        match store.expire(tracked, pairs).await {
            Ok(removed) => DriverResponse::since(self.expired(removed), started),
            Err(err) => DriverResponse::since(vec![self.failed("", &err)], started),
        }
    }

    async fn expire_before(
        &self,
        tracked: Tracked,
        threshold: i64,
    ) -> DriverResponse<ExpireResult> {
        let started = Instant::now();
        if threshold <= 0 {
            return DriverResponse::single(
                self.id(),
                threshold.to_string(),
                ResultType::InternalError,
                started,
            );
        }
        let Some(store) = self.object_store() else {
            return self.unavailable([threshold.to_string()], started);
        };
        match store.expire_before(tracked, threshold).await {
            Ok(removed) => DriverResponse::since(self.expired(removed), started),
            Err(err) => {
                DriverResponse::since(vec![self.failed(threshold.to_string(), &err)], started)
            }
        }
    }

    fn expired(&self, removed: Vec<String>) -> Vec<DriverResult<ExpireResult>> {
        removed
            .into_iter()
            .map(|uuid| DriverResult::ok(self.id(), uuid.clone(), ExpireResult::new(uuid, 1)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
impl Driver for SqliteObjectDriver {
    fn configuration(&self) -> &DriverConfiguration {
        &self.configuration
    }

    fn is_available(&self) -> bool {
        self.object_store().is_some()
    }

    async fn bind_volume(&self, volume: Volume) -> Result<()> {
        let opened = match &self.location {
            DatabaseLocation::InMemory => Database::in_memory_and_migrate().await,
            DatabaseLocation::File(path) => Database::open_and_migrate(path.clone()).await,
            DatabaseLocation::Volume => {
                Database::open_and_migrate(volume.file(&format!("{}.db", self.id()))).await
            }
        };
        let db = opened.map_err(|e| CoreError::VolumeUnavailable {
            volume_id: volume.id.clone(),
            reason: e.to_string(),
        })?;
        self.attach(db);
        info!(
            driver = %self.id(),
            volume = %volume.id,
            location = ?self.location,
            "sqlite driver bound"
        );
        Ok(())
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lock_store().take();
        self.consumers.close_all();
        info!(driver = %self.id(), "sqlite driver disposed");
    }
}

#[async_trait]
impl EntityReadDriver<ObjectEntity> for SqliteObjectDriver {
    async fn read(&self, uuids: &[String]) -> DriverResponse<ObjectEntity> {
        let started = Instant::now();
        if uuids.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let Some(store) = self.object_store() else {
            return self.unavailable(uuids.iter().cloned(), started);
        };
        let wanted: Vec<String> = uuids.iter().filter(|u| !u.is_empty()).cloned().collect();
        let found = match store.read(wanted, now_millis()).await {
            Ok(found) => found,
            Err(err) => return DriverResponse::since(vec![self.failed("", &err)], started),
        };
        let mut found = found.into_iter();
        let results = uuids
            .iter()
            .map(|uuid| {
                if uuid.is_empty() {
                    return DriverResult::bad_request(self.id(), "");
                }
                match found.next().flatten() {
                    Some(object) => DriverResult::ok(self.id(), uuid.clone(), object),
                    None => DriverResult::not_found(self.id(), uuid.clone()),
                }
            })
            .collect();
        DriverResponse::since(results, started)
    }
}

#[async_trait]
impl EntityPublishDriver<ObjectEntity> for SqliteObjectDriver {
    async fn publish(
        &self,
        entities: Vec<ObjectEntity>,
    ) -> DriverResponse<PublishResult<ObjectEntity>> {
        let started = Instant::now();
        if entities.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::InternalError, started);
        }
        let Some(store) = self.object_store() else {
            return self.unavailable(entities.iter().map(|e| e.uuid.clone()), started);
        };
        let valid: Vec<ObjectEntity> = entities
            .iter()
            .filter(|e| !e.uuid.is_empty())
            .cloned()
            .collect();

        let written = if valid.is_empty() {
            Ok(Vec::new())
        } else {
            // Write and announce under one gate so consumers see batches in
            // the order the database took them.
            let _gate = self.publish_gate.lock().await;
            let written = store.upsert(valid, now_millis()).await;
            if written.is_ok() {
                let announced: Vec<ObjectEntity> = entities
                    .iter()
                    .filter(|e| !e.uuid.is_empty() && e.created > self.started_at)
                    .cloned()
                    .collect();
                self.consumers.push(&announced);
            }
            written
        };

        let results = match written {
            Ok(existed) => {
                let mut existed = existed.into_iter();
                entities
                    .into_iter()
                    .map(|entity| {
                        if entity.uuid.is_empty() {
                            return DriverResult::bad_request(self.id(), "");
                        }
                        let uuid = entity.uuid.clone();
                        let outcome = if existed.next().unwrap_or(false) {
                            PublishResult::changed(entity)
                        } else {
                            PublishResult::created(entity)
                        };
                        DriverResult::ok(self.id(), uuid, outcome)
                    })
                    .collect()
            }
            Err(err) => {
                warn!(driver = %self.id(), %err, "batch upsert failed");
                entities
                    .into_iter()
                    .map(|entity| {
                        if entity.uuid.is_empty() {
                            DriverResult::bad_request(self.id(), "")
                        } else {
                            DriverResult::internal_error(self.id(), entity.uuid, err.to_string())
                        }
                    })
                    .collect()
            }
        };
        DriverResponse::since(results, started)
    }
}

#[async_trait]
impl EntitySubscribeDriver<ObjectEntity> for SqliteObjectDriver {
    async fn subscribe(&self) -> DriverResponse<Consumer<ObjectEntity>> {
        let started = Instant::now();
        if self.disposed.load(Ordering::SeqCst) {
            return DriverResponse::single(self.id(), "all", ResultType::NotAvailable, started);
        }
        DriverResponse::since(
            vec![DriverResult::ok(self.id(), "all", self.consumers.subscribe())],
            started,
        )
    }
}

#[async_trait]
impl EntityDeleteDriver<ObjectEntity> for SqliteObjectDriver {
    async fn delete(&self, requests: &[DeleteRequest]) -> DriverResponse<bool> {
        let started = Instant::now();
        if requests.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let Some(store) = self.object_store() else {
            return self.unavailable(requests.iter().map(|r| r.target.clone()), started);
        };
        let targets: Vec<String> = requests
            .iter()
            .map(|r| r.target.clone())
            .filter(|t| !t.is_empty())
            .collect();
        if let Err(err) = store.delete(targets).await {
            return DriverResponse::since(vec![self.failed("", &err)], started);
        }
        let results = requests
            .iter()
            .map(|r| {
                if r.target.is_empty() {
                    DriverResult::bad_request(self.id(), "")
                } else {
                    DriverResult::ok(self.id(), r.target.clone(), true)
                }
            })
            .collect();
        DriverResponse::since(results, started)
    }
}

#[async_trait]
impl EntityExpireUpdateDriver<ObjectEntity> for SqliteObjectDriver {
    async fn expire_by_update(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult> {
        self.expire(Tracked::Updated, requests).await
    }

    async fn expire_by_update_before(&self, threshold: i64) -> DriverResponse<ExpireResult> {
        self.expire_before(Tracked::Updated, threshold).await
    }
}

#[async_trait]
impl EntityExpireAccessDriver<ObjectEntity> for SqliteObjectDriver {
    async fn expire_by_access(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult> {
        self.expire(Tracked::Accessed, requests).await
    }

    async fn expire_by_access_before(&self, threshold: i64) -> DriverResponse<ExpireResult> {
        self.expire_before(Tracked::Accessed, threshold).await
    }
}
