//! [`RemoteEntityDriver`]: forwards the entity contract to a remote service.
//!
//! Each operation becomes one call on the [`RemoteClient`]. A whole-call
//! failure is reported as one tagged result per input key, so callers see
//! the same shape as from a local backend. Reads go through a short-lived
//! [`ReadCache`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use strata_core::{
    CoreError, DeleteRequest, Driver, DriverConfiguration, DriverResponse, DriverResult, Entity,
    EntityDeleteDriver, EntityExpireAccessDriver, EntityExpireUpdateDriver, EntityPublishDriver,
    EntityReadDriver, ExpireRequest, ExpireResult, PublishResult, Result, ResultType,
};
use tracing::{debug, info, warn};

use crate::cache::ReadCache;
use crate::client::{HttpRemoteClient, RemoteClient};
use crate::error::{RemoteError, RemoteResult};

/// Required parameter: service base URL.
pub const BASE_URL_PARAMETER: &str = "base_url";
pub const TIMEOUT_PARAMETER: &str = "timeout_ms";
/// Read cache TTL in seconds.
pub const CACHE_TTL_PARAMETER: &str = "cache_ttl";
pub const CACHE_CAPACITY_PARAMETER: &str = "cache_capacity";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Entity uuids the service reports as replaced rather than inserted.
#[derive(Debug, Default, Deserialize)]
struct PublishReply {
    #[serde(default)]
    changed: Vec<String>,
}

/// Proxy backend for entity family `E`.
pub struct RemoteEntityDriver<E: Entity> {
    configuration: DriverConfiguration,
    family: &'static str,
    client: Arc<dyn RemoteClient>,
    cache: ReadCache<E>,
    disposed: AtomicBool,
}

impl<E: Entity> RemoteEntityDriver<E> {
    /// Build an HTTP-backed driver from the configuration parameters.
    pub fn new(configuration: DriverConfiguration, family: &'static str) -> Result<Self> {
        let base_url = configuration
            .parameter(BASE_URL_PARAMETER)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| CoreError::InvalidConfiguration {
                id: configuration.id.clone(),
                reason: format!("parameter `{BASE_URL_PARAMETER}` is required"),
            })?
            .to_owned();
        let timeout = configuration
            .parameter_as::<u64>(TIMEOUT_PARAMETER)?
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis);
        let client = HttpRemoteClient::new(&base_url, timeout).map_err(|e| {
            CoreError::InvalidConfiguration {
                id: configuration.id.clone(),
                reason: e.to_string(),
            }
        })?;
        info!(driver = %configuration.id, %base_url, family, "remote driver configured");
        Self::with_client(configuration, family, Arc::new(client))
    }

    /// Build over any client. Cache parameters still come from the
    /// configuration.
    pub fn with_client(
        configuration: DriverConfiguration,
        family: &'static str,
        client: Arc<dyn RemoteClient>,
    ) -> Result<Self> {
        let cache_ttl = configuration
            .parameter_as::<u64>(CACHE_TTL_PARAMETER)?
            .map_or(DEFAULT_CACHE_TTL, Duration::from_secs);
        let capacity = configuration
            .parameter_as::<u64>(CACHE_CAPACITY_PARAMETER)?
            .unwrap_or(DEFAULT_CACHE_CAPACITY);
        Ok(Self {
            configuration,
            family,
            client,
            cache: ReadCache::new(capacity, cache_ttl),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn cache(&self) -> &ReadCache<E> {
        &self.cache
    }

    async fn call(&self, operation: &str, mut body: Value) -> RemoteResult<Value> {
        if let Value::Object(map) = &mut body {
            map.insert("family".to_owned(), Value::from(self.family));
        }
        let reply = self.client.call(operation, body).await;
        if let Err(err) = &reply {
            warn!(driver = %self.id(), operation, %err, "remote call failed");
        }
        reply
    }

    /// One failure result per key.
    fn fail_all<T>(
        &self,
        keys: impl IntoIterator<Item = String>,
        err: &RemoteError,
        started: Instant,
    ) -> DriverResponse<T> {
        let result_type = err.result_type();
        let message = err.to_string();
        let results = keys
            .into_iter()
            .map(|key| DriverResult::of(self.id(), key, result_type).with_message(message.clone()))
            .collect();
        DriverResponse::since(results, started)
    }

    fn unavailable<T>(&self, request: &str, started: Instant) -> Option<DriverResponse<T>> {
        (!self.is_available())
            .then(|| DriverResponse::single(self.id(), request, ResultType::NotAvailable, started))
    }

    async fn expire(
        &self,
        operation: &str,
        requests: &[ExpireRequest],
    ) -> DriverResponse<ExpireResult> {
        let started = Instant::now();
        if let Some(response) = self.unavailable("", started) {
            return response;
        }
        if requests.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let targets = requests.iter().map(|r| r.target.clone());
        let reply = match self.call(operation, json!({ "requests": requests })).await {
            Ok(reply) => reply,
            Err(err) => return self.fail_all(targets, &err, started),
        };
        for request in requests {
            self.cache.invalidate(&request.target).await;
        }
        self.expired(reply, started)
    }

    async fn expire_before(&self, operation: &str, threshold: i64) -> DriverResponse<ExpireResult> {
        let started = Instant::now();
        let request = threshold.to_string();
        if let Some(response) = self.unavailable(&request, started) {
            return response;
        }
        if threshold <= 0 {
            return DriverResponse::single(self.id(), request, ResultType::InternalError, started);
        }
        match self.call(operation, json!({ "threshold": threshold })).await {
            Ok(reply) => {
                self.cache.invalidate_all();
                self.expired(reply, started)
            }
            Err(err) => self.fail_all([request], &err, started),
        }
    }

    fn expired(&self, reply: Value, started: Instant) -> DriverResponse<ExpireResult> {
        match serde_json::from_value::<Vec<ExpireResult>>(reply) {
            Ok(removed) => {
                debug!(driver = %self.id(), count = removed.len(), "remote expire");
                let results = removed
                    .into_iter()
                    .map(|result| DriverResult::ok(self.id(), result.target.clone(), result))
                    .collect();
                DriverResponse::since(results, started)
            }
            Err(err) => DriverResponse::since(
                vec![DriverResult::internal_error(self.id(), "", err.to_string())],
                started,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
impl<E: Entity> Driver for RemoteEntityDriver<E> {
    fn configuration(&self) -> &DriverConfiguration {
        &self.configuration
    }

    fn is_available(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cache.invalidate_all();
        info!(driver = %self.id(), cache = %self.cache.stats(), "remote driver disposed");
    }
}

#[async_trait]
impl<E: Entity> EntityReadDriver<E> for RemoteEntityDriver<E> {
    async fn read(&self, uuids: &[String]) -> DriverResponse<E> {
        let started = Instant::now();
        if let Some(response) = self.unavailable("", started) {
            return response;
        }
        if uuids.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }

        let mut slots: Vec<Option<DriverResult<E>>> = Vec::with_capacity(uuids.len());
        let mut misses = Vec::new();
        for uuid in uuids {
            if uuid.is_empty() {
                slots.push(Some(DriverResult::bad_request(self.id(), "")));
            } else if let Some(entity) = self.cache.get(uuid).await {
                slots.push(Some(DriverResult::ok(self.id(), uuid.clone(), entity)));
            } else {
                slots.push(None);
                misses.push(uuid.clone());
            }
        }

        if !misses.is_empty() {
            let fetched = match self.call("read", json!({ "uuids": misses })).await {
                Ok(reply) => serde_json::from_value::<Vec<E>>(reply).map_err(RemoteError::from),
                Err(err) => Err(err),
            };
            match fetched {
                Ok(entities) => {
                    for entity in &entities {
                        self.cache.insert(entity.clone()).await;
                    }
                    for (slot, uuid) in slots.iter_mut().zip(uuids) {
                        if slot.is_some() {
                            continue;
                        }
                        *slot = Some(match entities.iter().find(|e| e.uuid() == uuid) {
                            Some(entity) => {
                                DriverResult::ok(self.id(), uuid.clone(), entity.clone())
                            }
                            None => DriverResult::not_found(self.id(), uuid.clone()),
                        });
                    }
                }
                Err(err) => {
                    let result_type = err.result_type();
                    for (slot, uuid) in slots.iter_mut().zip(uuids) {
                        if slot.is_none() {
                            *slot = Some(
                                DriverResult::of(self.id(), uuid.clone(), result_type)
                                    .with_message(err.to_string()),
                            );
                        }
                    }
                }
            }
        }

        DriverResponse::since(slots.into_iter().flatten().collect(), started)
    }
}

#[async_trait]
impl<E: Entity> EntityPublishDriver<E> for RemoteEntityDriver<E> {
    async fn publish(&self, entities: Vec<E>) -> DriverResponse<PublishResult<E>> {
        let started = Instant::now();
        if let Some(response) = self.unavailable("", started) {
            return response;
        }
        if entities.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::InternalError, started);
        }

        let valid: Vec<&E> = entities.iter().filter(|entity| entity.is_valid()).collect();
        if valid.is_empty() {
            let results = entities
                .iter()
                .map(|entity| DriverResult::bad_request(self.id(), entity.uuid()))
                .collect();
            return DriverResponse::since(results, started);
        }

        for entity in &valid {
            self.cache.invalidate(entity.uuid()).await;
        }
        let reply = self
            .call("publish", json!({ "entities": valid }))
            .await
            .and_then(|reply| {
                if reply.is_null() {
                    Ok(PublishReply::default())
                } else {
                    serde_json::from_value::<PublishReply>(reply).map_err(RemoteError::from)
                }
            });

        // One result per input entity, in input order.
        let results = match reply {
            Ok(reply) => entities
                .into_iter()
                .map(|entity| {
                    let uuid = entity.uuid().to_owned();
                    if !entity.is_valid() {
                        return DriverResult::bad_request(self.id(), uuid);
                    }
                    let outcome = if reply.changed.contains(&uuid) {
                        PublishResult::changed(entity)
                    } else {
                        PublishResult::created(entity)
                    };
                    DriverResult::ok(self.id(), uuid, outcome)
                })
                .collect(),
            Err(err) => {
                let result_type = err.result_type();
                let message = err.to_string();
                entities
                    .iter()
                    .map(|entity| {
                        if entity.is_valid() {
                            DriverResult::of(self.id(), entity.uuid(), result_type)
                                .with_message(message.clone())
                        } else {
                            DriverResult::bad_request(self.id(), entity.uuid())
                        }
                    })
                    .collect()
            }
        };
        DriverResponse::since(results, started)
    }
}

#[async_trait]
impl<E: Entity> EntityDeleteDriver<E> for RemoteEntityDriver<E> {
    async fn delete(&self, requests: &[DeleteRequest]) -> DriverResponse<bool> {
        let started = Instant::now();
        if let Some(response) = self.unavailable("", started) {
            return response;
        }
        if requests.is_empty() {
            return DriverResponse::single(self.id(), "", ResultType::BadRequest, started);
        }
        let targets: Vec<String> = requests
            .iter()
            .filter(|r| !r.target.is_empty())
            .map(|r| r.target.clone())
            .collect();
        let mut results: Vec<DriverResult<bool>> = requests
            .iter()
            .filter(|r| r.target.is_empty())
            .map(|_| DriverResult::bad_request(self.id(), ""))
            .collect();
        if targets.is_empty() {
            return DriverResponse::since(results, started);
        }

        for target in &targets {
            self.cache.invalidate(target).await;
        }
        match self.call("delete", json!({ "targets": targets })).await {
            Ok(_) => {
                results.extend(
                    targets
                        .into_iter()
                        .map(|target| DriverResult::ok(self.id(), target, true)),
                );
                DriverResponse::since(results, started)
            }
            Err(err) => {
                let failed: DriverResponse<bool> = self.fail_all(targets, &err, started);
                results.extend(failed.results);
                DriverResponse::since(results, started)
            }
        }
    }
}

#[async_trait]
impl<E: Entity> EntityExpireUpdateDriver<E> for RemoteEntityDriver<E> {
    async fn expire_by_update(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult> {
        self.expire("expire_by_update", requests).await
    }

    async fn expire_by_update_before(&self, threshold: i64) -> DriverResponse<ExpireResult> {
        self.expire_before("expire_by_update_before", threshold).await
    }
}

#[async_trait]
impl<E: Entity> EntityExpireAccessDriver<E> for RemoteEntityDriver<E> {
    async fn expire_by_access(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult> {
        self.expire("expire_by_access", requests).await
    }

    async fn expire_by_access_before(&self, threshold: i64) -> DriverResponse<ExpireResult> {
        self.expire_before("expire_by_access_before", threshold).await
    }
}
