//! # strata-core
//!
//! Shared vocabulary for the Strata entity-storage platform.
//!
//! - [`entity`] -- the [`Entity`] record contract and the built-in families.
//! - [`result`] -- tagged per-target results and the response envelope.
//! - [`consumer`] -- subscription handles with idempotent disposal.
//! - [`driver`] -- the storage driver contract and publish-compare policies.
//! - [`capability`] -- capability tags and trait-object tables.
//! - [`configuration`] -- declarative driver configurations and their hash.
//! - [`volume`] -- storage volume resolution.
//! - [`events`] -- the platform lifecycle event bus.

pub mod capability;
pub mod configuration;
pub mod consumer;
pub mod driver;
pub mod entity;
pub mod error;
pub mod events;
pub mod hash;
pub mod result;
pub mod volume;

pub use capability::{Capability, CapabilityTable};
pub use configuration::{BufferSettings, DriverConfiguration};
pub use consumer::{Consumer, ConsumerHandle, ConsumerSet};
pub use driver::{
    CreatedOnlyCompare, Driver, DriverConstructor, DriverInstance, DriverType,
    EntityDeleteDriver, EntityExpireAccessDriver, EntityExpireUpdateDriver, EntityPublishDriver,
    EntityReadDriver, EntitySubscribeDriver, HashAndCreatedCompare, PublishCompare,
    entity_capabilities,
};
pub use entity::{ChildEntity, DescriptionEntity, Entity, ObjectEntity, now_millis};
pub use error::{CoreError, Result};
pub use events::{EventBus, PlatformEvent};
pub use result::{
    DeleteRequest, DriverResponse, DriverResult, ExpireRequest, ExpireResult, PublishKind,
    PublishResult, QueryMatch, ResultType,
};
pub use volume::{DirectoryVolumeProvider, Volume, VolumeProvider};
