//! The entity storage driver contract.
//!
//! [`Driver`] is the lifecycle surface every backend instance exposes. The
//! `Entity*Driver` traits are the per-capability operation sets; a backend
//! implements whichever it supports and advertises them through its
//! [`CapabilityTable`]. No operation returns an error: failures are tagged
//! results (see [`crate::result`]).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{Capability, CapabilityTable};
use crate::configuration::DriverConfiguration;
use crate::consumer::Consumer;
use crate::entity::Entity;
use crate::error::Result;
use crate::result::{DeleteRequest, DriverResponse, ExpireRequest, ExpireResult, PublishResult};
use crate::volume::Volume;

/// Lifecycle surface shared by every driver instance.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn configuration(&self) -> &DriverConfiguration;

    fn id(&self) -> &str {
        &self.configuration().id
    }

    /// Whether the backing store can currently serve requests.
    fn is_available(&self) -> bool {
        true
    }

    /// Bind the resolved storage volume. Called once, right after
    /// construction and before the instance is published.
    async fn bind_volume(&self, _volume: Volume) -> Result<()> {
        Ok(())
    }

    /// Release background workers and subscriptions. Idempotent.
    async fn dispose(&self);
}

#[async_trait]
pub trait EntityReadDriver<E: Entity>: Driver {
    /// One result per input uuid.
    async fn read(&self, uuids: &[String]) -> DriverResponse<E>;
}

#[async_trait]
pub trait EntityPublishDriver<E: Entity>: Driver {
    /// One result per input entity, tagged Created or Changed.
    async fn publish(&self, entities: Vec<E>) -> DriverResponse<PublishResult<E>>;
}

#[async_trait]
pub trait EntitySubscribeDriver<E: Entity>: Driver {
    async fn subscribe(&self) -> DriverResponse<Consumer<E>>;
}

#[async_trait]
pub trait EntityDeleteDriver<E: Entity>: Driver {
    async fn delete(&self, requests: &[DeleteRequest]) -> DriverResponse<bool>;
}

#[async_trait]
pub trait EntityExpireUpdateDriver<E: Entity>: Driver {
    /// Remove each target whose last-updated time is at or before its
    /// request timestamp.
    async fn expire_by_update(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult>;

    /// Remove every entity last updated at or before `threshold`.
    async fn expire_by_update_before(&self, threshold: i64) -> DriverResponse<ExpireResult>;
}

#[async_trait]
pub trait EntityExpireAccessDriver<E: Entity>: Driver {
    async fn expire_by_access(&self, requests: &[ExpireRequest]) -> DriverResponse<ExpireResult>;

    async fn expire_by_access_before(&self, threshold: i64) -> DriverResponse<ExpireResult>;
}

/// Capability table for a backend implementing the full entity contract.
pub fn entity_capabilities<E, D>(driver: Arc<D>) -> CapabilityTable
where
    E: Entity,
    D: EntityReadDriver<E>
        + EntityPublishDriver<E>
        + EntitySubscribeDriver<E>
        + EntityDeleteDriver<E>
        + EntityExpireUpdateDriver<E>
        + EntityExpireAccessDriver<E>,
{
    CapabilityTable::new()
        .with::<dyn Driver>(Capability::Driver, driver.clone())
        .with::<dyn EntityReadDriver<E>>(Capability::Read, driver.clone())
        .with::<dyn EntityPublishDriver<E>>(Capability::Publish, driver.clone())
        .with::<dyn EntitySubscribeDriver<E>>(Capability::Subscribe, driver.clone())
        .with::<dyn EntityDeleteDriver<E>>(Capability::Delete, driver.clone())
        .with::<dyn EntityExpireUpdateDriver<E>>(Capability::ExpireByUpdate, driver.clone())
        .with::<dyn EntityExpireAccessDriver<E>>(Capability::ExpireByAccess, driver)
}

// ---------------------------------------------------------------------------
// Publish compare policies
// ---------------------------------------------------------------------------

/// Decides whether an incoming publish replaces the stored record.
pub trait PublishCompare<E: Entity>: Send + Sync {
    fn accept(&self, incoming: &E, existing: Option<&E>) -> bool;
}

/// Accept new records, or a different hash that is not older.
///
/// Equal hashes are suppressed even when `created` is newer, so the stored
/// record and its last-updated time stay put on a content-identical
/// republish.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashAndCreatedCompare;

impl<E: Entity> PublishCompare<E> for HashAndCreatedCompare {
    fn accept(&self, incoming: &E, existing: Option<&E>) -> bool {
        match existing {
            None => true,
            Some(existing) => {
                incoming.hash() != existing.hash() && incoming.created() >= existing.created()
            }
        }
    }
}

/// Accept new records or strictly newer ones, ignoring content hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreatedOnlyCompare;

impl<E: Entity> PublishCompare<E> for CreatedOnlyCompare {
    fn accept(&self, incoming: &E, existing: Option<&E>) -> bool {
        existing.is_none_or(|existing| incoming.created() > existing.created())
    }
}

// ---------------------------------------------------------------------------
// Driver types and instances
// ---------------------------------------------------------------------------

/// Single-argument constructor every driver type exposes.
pub type DriverConstructor = fn(DriverConfiguration) -> Result<DriverInstance>;

/// A constructible driver type declared by a plugin.
#[derive(Clone)]
pub struct DriverType {
    pub name: &'static str,
    pub capabilities: &'static [Capability],
    pub constructor: DriverConstructor,
}

impl DriverType {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn construct(&self, configuration: DriverConfiguration) -> Result<DriverInstance> {
        (self.constructor)(configuration)
    }
}

impl fmt::Debug for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverType")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// A live driver plus its capability views.
#[derive(Clone)]
pub struct DriverInstance {
    driver: Arc<dyn Driver>,
    capabilities: Arc<CapabilityTable>,
}

impl DriverInstance {
    pub fn new(driver: Arc<dyn Driver>, capabilities: CapabilityTable) -> Self {
        Self {
            driver,
            capabilities: Arc::new(capabilities),
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// The view registered for trait object `C`, if any.
    pub fn get<C>(&self) -> Option<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.get::<C>()
    }

    /// True when both handles point at the same driver object.
    pub fn same_instance(&self, other: &DriverInstance) -> bool {
        Arc::ptr_eq(&self.driver, &other.driver)
    }
}

impl fmt::Debug for DriverInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverInstance")
            .field("id", &self.driver.id())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ObjectEntity;

    fn object(hash_seed: &str, created: i64) -> ObjectEntity {
        ObjectEntity::new("u1", hash_seed, created)
    }

    #[test]
    fn default_compare_accepts_first_write() {
        assert!(HashAndCreatedCompare.accept(&object("a", 100), None));
    }

    #[test]
    fn default_compare_suppresses_equal_hash() {
        let stored = object("a", 100);
        assert!(!HashAndCreatedCompare.accept(&object("a", 150), Some(&stored)));
    }

    #[test]
    fn default_compare_rejects_older_and_accepts_newer() {
        let stored = object("a", 100);
        assert!(!HashAndCreatedCompare.accept(&object("b", 99), Some(&stored)));
        assert!(HashAndCreatedCompare.accept(&object("c", 200), Some(&stored)));
        assert!(HashAndCreatedCompare.accept(&object("c", 100), Some(&stored)));
    }

    #[test]
    fn created_only_compare_ignores_hash() {
        let stored = object("a", 100);
        assert!(CreatedOnlyCompare.accept(&object("a", 101), Some(&stored)));
        assert!(!CreatedOnlyCompare.accept(&object("b", 100), Some(&stored)));
    }
}
