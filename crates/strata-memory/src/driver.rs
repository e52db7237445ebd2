//! [`MemoryEntityDriver`]: the working-tier backend.
//!
//! All state for one instance sits behind a single mutex that is never held
//! across an await. A background worker evicts entities that have not been
//! read within the TTL; that sweep looks only at access times and is
//! separate from the caller-driven expire operations. After disposal every
//! call answers `NotAvailable`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use strata_core::{
    ChildEntity, ConsumerSet, CoreError, CreatedOnlyCompare, DeleteRequest, Driver,
    DriverConfiguration, DriverResponse, DriverResult, Entity, EntityDeleteDriver,
    EntityExpireAccessDriver, EntityExpireUpdateDriver, EntityPublishDriver, EntityReadDriver,
    EntitySubscribeDriver, ExpireRequest, ExpireResult, HashAndCreatedCompare, PublishCompare,
    PublishResult, Result, ResultType, now_millis,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sweep;
use crate::table::{EntityTable, ParentKey, Slot, lock};

/// Idle time after which an unread entity is evicted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// How often the eviction worker runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration parameter holding the TTL in seconds.
pub const TTL_PARAMETER: &str = "ttl";

/// Configuration parameter holding the sweep interval in seconds.
pub const SWEEP_INTERVAL_PARAMETER: &str = "sweep_interval";

/// In-memory backend for entity family `E`.
pub struct MemoryEntityDriver<E: Entity> {
    configuration: DriverConfiguration,
    ttl: Duration,
    sweep_interval: Duration,
    started_at: i64,
    table: Arc<Mutex<EntityTable<E>>>,
    compare: Arc<dyn PublishCompare<E>>,
    consumers: ConsumerSet<E>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<E: Entity> MemoryEntityDriver<E> {
    /// Build a driver with the default hash-and-created compare policy.
    pub fn new(configuration: DriverConfiguration) -> Result<Self> {
        Self::build(configuration, Arc::new(HashAndCreatedCompare), None)
    }

    fn build(
        configuration: DriverConfiguration,
        compare: Arc<dyn PublishCompare<E>>,
        parent_of: Option<ParentKey<E>>,
    ) -> Result<Self> {
        let ttl = seconds_parameter(&configuration, TTL_PARAMETER, DEFAULT_TTL)?;
        let sweep_interval =
            seconds_parameter(&configuration, SWEEP_INTERVAL_PARAMETER, DEFAULT_SWEEP_INTERVAL)?;
        Ok(Self {
            configuration,
            ttl,
            sweep_interval,
            started_at: now_millis(),
            table: Arc::new(Mutex::new(EntityTable::new(parent_of))),
            compare,
            consumers: ConsumerSet::new(),
            sweeper: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_compare(mut self, compare: Arc<dyn PublishCompare<E>>) -> Self {
        self.compare = compare;
        self
    }

    /// Share the driver and start its eviction worker.
    ///
    /// Without a tokio runtime the driver still works but never evicts.
    pub fn start(self) -> Arc<Self> {
        let driver = Arc::new(self);
        match sweep::spawn(
            Arc::downgrade(&driver.table),
            driver.ttl,
            driver.sweep_interval,
            driver.id().to_owned(),
        ) {
            Some(handle) => *lock(&driver.sweeper) = Some(handle),
            None => warn!(driver = %driver.id(), "no async runtime, TTL sweep disabled"),
        }
        info!(
            driver = %driver.id(),
            ttl_secs = driver.ttl.as_secs(),
            sweep_ms = u64::try_from(driver.sweep_interval.as_millis()).unwrap_or(u64::MAX),
            "memory driver started"
        );
        driver
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Instance start time (unix ms). Only entities created after it are
    /// pushed to consumers.
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
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

    fn expire(
        &self,
        requests: &[ExpireRequest],
        tracked: fn(&Slot<E>) -> i64,
    ) -> DriverResponse<ExpireResult> {
        let started = Instant::now();
        if self.is_disposed() {
            return self.unavailable(requests.iter().map(|r| r.target.clone()), started);
        }
        if requests.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let mut results = Vec::new();
        {
            let mut table = lock(&self.table);
            for request in requests {
                let due = table
                    .slot(&request.target)
                    .is_some_and(|slot| tracked(slot) <= request.timestamp);
                if due && table.remove(&request.target) {
                    results.push(DriverResult::ok(
                        self.id(),
                        request.target.clone(),
                        ExpireResult::new(request.target.clone(), 1),
                    ));
                }
            }
        }
        debug!(driver = %self.id(), count = results.len(), "expired by request");
        DriverResponse::since(results, started)
    }

    fn expire_before(
        &self,
        threshold: i64,
        tracked: fn(&Slot<E>) -> i64,
    ) -> DriverResponse<ExpireResult> {
        let started = Instant::now();
        if self.is_disposed() {
            return self.unavailable([threshold.to_string()], started);
        }
        if threshold <= 0 {
            return DriverResponse::single(
                self.id(),
                threshold.to_string(),
                ResultType::InternalError,
                started,
            );
        }
        let removed = {
            let mut table = lock(&self.table);
            let due = table.keys_where(|slot| tracked(slot) <= threshold);
            due.into_iter()
                .filter(|uuid| table.remove(uuid))
                .collect::<Vec<_>>()
        };
        debug!(driver = %self.id(), threshold, count = removed.len(), "expired by threshold");
        let results = removed
            .into_iter()
            .map(|uuid| DriverResult::ok(self.id(), uuid.clone(), ExpireResult::new(uuid, 1)))
            .collect();
        DriverResponse::since(results, started)
    }

    fn stop_sweeper(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Side-table families
// ---------------------------------------------------------------------------

impl<E: ChildEntity> MemoryEntityDriver<E> {
    /// Build a driver for a family attached to parent keys.
    ///
    /// Writes compare on `created` only, and entries are indexed by parent
    /// so [`query`](Self::query) can list everything under one key.
    pub fn side_table(configuration: DriverConfiguration) -> Result<Self> {
        Self::build(
            configuration,
            Arc::new(CreatedOnlyCompare),
            Some(<E as ChildEntity>::parent_uuid),
        )
    }

    /// Entities attached to each parent. A parent yields one `Ok` result per
    /// attached entity, `Empty` when marked empty, `NotFound` otherwise.
    pub async fn query(&self, parent_ids: &[String]) -> DriverResponse<E> {
        let started = Instant::now();
        if self.is_disposed() {
            return self.unavailable(parent_ids.iter().cloned(), started);
        }
        if parent_ids.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let now = now_millis();
        let mut results = Vec::new();
        {
            let mut table = lock(&self.table);
            for parent in parent_ids {
                if parent.is_empty() {
                    results.push(DriverResult::bad_request(self.id(), parent.clone()));
                } else if table.is_marked_empty(parent) {
                    results.push(DriverResult::of(self.id(), parent.clone(), ResultType::Empty));
                } else if let Some(children) = table.children(parent, now) {
                    results.extend(
                        children
                            .into_iter()
                            .map(|child| DriverResult::ok(self.id(), parent.clone(), child)),
                    );
                } else {
                    results.push(DriverResult::not_found(self.id(), parent.clone()));
                }
            }
        }
        DriverResponse::since(results, started)
    }

    /// Mark parents as intentionally empty until something is published
    /// under them.
    pub async fn empty(&self, parent_ids: &[String]) -> DriverResponse<bool> {
        let started = Instant::now();
        if self.is_disposed() {
            return self.unavailable(parent_ids.iter().cloned(), started);
        }
        if parent_ids.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::InternalError, started);
        }
        let mut table = lock(&self.table);
        let results = parent_ids
            .iter()
            .map(|parent| {
                if parent.is_empty() {
                    DriverResult::bad_request(self.id(), parent.clone())
                } else {
                    table.mark_empty(parent);
                    DriverResult::ok(self.id(), parent.clone(), true)
                }
            })
            .collect();
        drop(table);
        DriverResponse::since(results, started)
    }
}

fn seconds_parameter(
    configuration: &DriverConfiguration,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match configuration.parameter_as::<u64>(key)? {
        None => Ok(default),
        Some(0) => Err(CoreError::InvalidConfiguration {
            id: configuration.id.clone(),
            reason: format!("parameter `{key}` must be greater than zero"),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

impl<E: Entity> Drop for MemoryEntityDriver<E> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
impl<E: Entity> Driver for MemoryEntityDriver<E> {
    fn configuration(&self) -> &DriverConfiguration {
        &self.configuration
    }

    fn is_available(&self) -> bool {
        !self.is_disposed()
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_sweeper();
        self.consumers.close_all();
        info!(driver = %self.id(), "memory driver disposed");
    }
}

#[async_trait]
impl<E: Entity> EntityReadDriver<E> for MemoryEntityDriver<E> {
    async fn read(&self, uuids: &[String]) -> DriverResponse<E> {
        let started = Instant::now();
        if self.is_disposed() {
            return self.unavailable(uuids.iter().cloned(), started);
        }
        if uuids.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let now = now_millis();
        let results = {
            let mut table = lock(&self.table);
            uuids
                .iter()
                .map(|uuid| {
                    if uuid.is_empty() {
                        return DriverResult::bad_request(self.id(), uuid.clone());
                    }
                    match table.touch(uuid, now) {
                        Some(entity) if entity.is_valid() => {
                            DriverResult::ok(self.id(), uuid.clone(), entity)
                        }
                        _ => DriverResult::not_found(self.id(), uuid.clone()),
                    }
                })
                .collect()
        };
        DriverResponse::since(results, started)
    }
}

#[async_trait]
impl<E: Entity> EntityPublishDriver<E> for MemoryEntityDriver<E> {
    async fn publish(&self, entities: Vec<E>) -> DriverResponse<PublishResult<E>> {
        let started = Instant::now();
        if self.is_disposed() {
            let keys = entities.iter().map(|e| e.uuid().to_owned());
            return self.unavailable(keys, started);
        }
        if entities.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::InternalError, started);
        }
        let now = now_millis();
        let mut results = Vec::with_capacity(entities.len());
        let mut announced = Vec::new();
        // Consumers are fed under the table lock so they see publishes in
        // the order the table accepted them. `push` never blocks.
        let delivered = {
            let mut table = lock(&self.table);
            for entity in entities {
                let uuid = entity.uuid().to_owned();
                if !entity.is_valid() {
                    results.push(DriverResult::bad_request(self.id(), uuid));
                    continue;
                }
                let existing = table.get(&uuid);
                let created = existing.is_none();
                if self.compare.accept(&entity, existing) {
                    if entity.created() > self.started_at {
                        announced.push(entity.clone());
                    }
                    table.upsert(entity.clone(), now);
                }
                let outcome = if created {
                    PublishResult::created(entity)
                } else {
                    PublishResult::changed(entity)
                };
                results.push(DriverResult::ok(self.id(), uuid, outcome));
            }
            self.consumers.push(&announced)
        };
        debug!(
            driver = %self.id(),
            count = results.len(),
            announced = announced.len(),
            consumers = delivered,
            "published"
        );
        DriverResponse::since(results, started)
    }
}

#[async_trait]
impl<E: Entity> EntitySubscribeDriver<E> for MemoryEntityDriver<E> {
    async fn subscribe(&self) -> DriverResponse<strata_core::Consumer<E>> {
        let started = Instant::now();
        if self.is_disposed() {
            return DriverResponse::single(self.id(), "all", ResultType::NotAvailable, started);
        }
        let consumer = self.consumers.subscribe();
        DriverResponse::since(vec![DriverResult::ok(self.id(), "all", consumer)], started)
    }
}

#[async_trait]
impl<E: Entity> EntityDeleteDriver<E> for MemoryEntityDriver<E> {
    async fn delete(&self, requests: &[DeleteRequest]) -> DriverResponse<bool> {
        let started = Instant::now();
        if self.is_disposed() {
            return self.unavailable(requests.iter().map(|r| r.target.clone()), started);
        }
        if requests.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let results = {
            let mut table = lock(&self.table);
            requests
                .iter()
                .map(|request| {
                    if request.target.is_empty() {
                        DriverResult::bad_request(self.id(), "")
                    } else {
                        table.remove(&request.target);
                        DriverResult::ok(self.id(), request.target.clone(), true)
                    }
                })
                .collect()
        };
        DriverResponse::since(results, started)
    }
}

#[async_trait]
impl<E: Entity> EntityExpireUpdateDriver<E> for MemoryEntityDriver<E> {
    async fn expire_by_update(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult> {
        self.expire(requests, |slot| slot.updated)
    }

    async fn expire_by_update_before(&self, threshold: i64) -> DriverResponse<ExpireResult> {
        self.expire_before(threshold, |slot| slot.updated)
    }
}

#[async_trait]
impl<E: Entity> EntityExpireAccessDriver<E> for MemoryEntityDriver<E> {
    async fn expire_by_access(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult> {
        self.expire(requests, |slot| slot.accessed)
    }

    async fn expire_by_access_before(&self, threshold: i64) -> DriverResponse<ExpireResult> {
        self.expire_before(threshold, |slot| slot.accessed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{DescriptionEntity, ObjectEntity, PublishKind};

    fn objects() -> Arc<MemoryEntityDriver<ObjectEntity>> {
        MemoryEntityDriver::new(DriverConfiguration::new("mem", "strata-memory", "*"))
            .expect("driver must build")
            .start()
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[tokio::test]
    async fn publish_then_read_round_trips() {
        let driver = objects();
        let entity = ObjectEntity::new("u1", "press", 100);

        let published = driver.publish(vec![entity.clone()]).await;
        assert_eq!(published.content()[0].kind, PublishKind::Created);

        let read = driver.read(&ids(&["u1"])).await;
        assert_eq!(read.into_content(), vec![entity]);
    }

    #[tokio::test]
    async fn equal_hash_republish_is_suppressed() {
        let driver = objects();
        let original = ObjectEntity::new("u1", "press", 100);
        driver.publish(vec![original.clone()]).await;

        let response = driver.publish(vec![original.clone().with_created(150)]).await;
        assert_eq!(response.content()[0].kind, PublishKind::Changed);

        let stored = driver.read(&ids(&["u1"])).await.into_content();
        assert_eq!(stored[0].created, 100);
    }

    #[tokio::test]
    async fn older_write_is_rejected_newer_accepted() {
        let driver = objects();
        driver.publish(vec![ObjectEntity::new("u1", "a", 100)]).await;

        driver.publish(vec![ObjectEntity::new("u1", "b", 99)]).await;
        assert_eq!(driver.read(&ids(&["u1"])).await.into_content()[0].name, "a");

        driver.publish(vec![ObjectEntity::new("u1", "c", 200)]).await;
        assert_eq!(driver.read(&ids(&["u1"])).await.into_content()[0].name, "c");
    }

    #[tokio::test]
    async fn read_edge_cases() {
        let driver = objects();
        let empty = driver.read(&[]).await;
        assert_eq!(empty.len(), 1);
        assert_eq!(empty.results[0].result_type, ResultType::BadRequest);

        let mixed = driver.read(&ids(&["", "missing"])).await;
        assert_eq!(mixed.results[0].result_type, ResultType::BadRequest);
        assert_eq!(mixed.result_type_for("missing"), Some(ResultType::NotFound));
    }

    #[tokio::test]
    async fn empty_publish_is_an_internal_error() {
        let driver = objects();
        let response = driver.publish(Vec::new()).await;
        assert_eq!(response.results[0].result_type, ResultType::InternalError);
    }

    #[tokio::test]
    async fn delete_is_unconditional() {
        let driver = objects();
        driver.publish(vec![ObjectEntity::new("u1", "a", 1)]).await;
        let response = driver.delete(&[DeleteRequest::new("u1"), DeleteRequest::new("nope")]).await;
        assert!(response.is_success());
        assert_eq!(driver.len(), 0);
        assert_eq!(driver.delete(&[]).await.results[0].result_type, ResultType::BadRequest);
    }

    #[tokio::test]
    async fn expire_by_update_respects_threshold() {
        let driver = objects();
        driver.publish(vec![ObjectEntity::new("u1", "a", 1)]).await;
        driver.publish(vec![ObjectEntity::new("u2", "b", 1)]).await;

        let none = driver.expire_by_update(&[ExpireRequest::new("u1", 1)]).await;
        assert!(none.is_empty());

        let removed = driver
            .expire_by_update(&[ExpireRequest::new("u1", now_millis() + 1_000)])
            .await;
        assert_eq!(removed.into_content(), vec![ExpireResult::new("u1", 1)]);

        let all = driver.expire_by_update_before(now_millis() + 1_000).await;
        assert_eq!(all.len(), 1);
        assert!(driver.is_empty());
    }

    #[tokio::test]
    async fn non_positive_threshold_is_rejected() {
        let driver = objects();
        let response = driver.expire_by_access_before(0).await;
        assert_eq!(response.results[0].result_type, ResultType::InternalError);
    }

    #[tokio::test]
    async fn side_table_query_distinguishes_empty_and_missing() {
        let driver = MemoryEntityDriver::<DescriptionEntity>::side_table(DriverConfiguration::new(
            "descriptions",
            "strata-memory",
            "*",
        ))
        .expect("driver must build")
        .start();
        driver
            .publish(vec![
                DescriptionEntity::new("def-1", "en", "Spindle", 10),
                DescriptionEntity::new("def-1", "de", "Spindel", 10),
            ])
            .await;
        driver.empty(&ids(&["def-2"])).await;

        let response = driver.query(&ids(&["def-1", "def-2", "def-3"])).await;
        assert_eq!(response.content().len(), 2);
        assert_eq!(response.result_type_for("def-2"), Some(ResultType::Empty));
        assert_eq!(response.result_type_for("def-3"), Some(ResultType::NotFound));
    }

    #[tokio::test]
    async fn side_table_ignores_hash_and_wants_strictly_newer() {
        let driver = MemoryEntityDriver::<DescriptionEntity>::side_table(DriverConfiguration::new(
            "descriptions",
            "strata-memory",
            "*",
        ))
        .expect("driver must build")
        .start();
        driver.publish(vec![DescriptionEntity::new("def-1", "en", "Spindle", 10)]).await;
        driver.publish(vec![DescriptionEntity::new("def-1", "en", "Axis", 10)]).await;
        driver.publish(vec![DescriptionEntity::new("def-1", "en", "Spindle", 11)]).await;

        let stored = driver.query(&ids(&["def-1"])).await.into_content();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].created, 11);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let configuration =
            DriverConfiguration::new("mem", "strata-memory", "*").with_parameter("ttl", "0");
        assert!(MemoryEntityDriver::<ObjectEntity>::new(configuration).is_err());
    }

    #[tokio::test]
    async fn dispose_closes_consumers() {
        let driver = objects();
        let mut consumer = driver
            .subscribe()
            .await
            .into_content()
            .pop()
            .expect("subscribe must succeed");
        driver.dispose().await;
        assert!(consumer.recv().await.is_none());
        assert!(!driver.is_available());
        driver.dispose().await;
    }

    #[tokio::test]
    async fn disposed_driver_is_not_available() {
        let driver = objects();
        driver.publish(vec![ObjectEntity::new("u1", "a", 100)]).await;
        driver.dispose().await;

        let read = driver.read(&ids(&["u1"])).await;
        assert_eq!(read.result_type_for("u1"), Some(ResultType::NotAvailable));

        let published = driver.publish(vec![ObjectEntity::new("u2", "b", 100)]).await;
        assert_eq!(published.result_type_for("u2"), Some(ResultType::NotAvailable));

        let deleted = driver.delete(&[DeleteRequest::new("u1")]).await;
        assert_eq!(deleted.result_type_for("u1"), Some(ResultType::NotAvailable));

        let expired = driver.expire_by_update_before(now_millis() + 1_000).await;
        assert_eq!(expired.results[0].result_type, ResultType::NotAvailable);
        assert_eq!(driver.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn consumers_see_publishes_in_accept_order() {
        let driver = objects();
        let mut consumer = driver
            .subscribe()
            .await
            .into_content()
            .pop()
            .expect("subscribe must succeed");
        let base = driver.started_at() + 1;

        // Every write to one uuid carries a distinct created time, so the
        // accepted ones form a strictly increasing sequence.
        let tasks: Vec<_> = (0..64_i64)
            .map(|i| {
                let driver = Arc::clone(&driver);
                tokio::spawn(async move {
                    let entity = ObjectEntity::new("shared", format!("v{i}"), base + i);
                    driver.publish(vec![entity]).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("publish task");
        }

        let mut seen = Vec::new();
        while let Some(batch) = consumer.try_recv() {
            seen.extend(batch.into_iter().map(|entity| entity.created));
        }
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "out of order: {seen:?}");

        let stored = driver.read(&ids(&["shared"])).await.into_content();
        assert_eq!(seen.last().copied(), Some(stored[0].created));
    }
}
