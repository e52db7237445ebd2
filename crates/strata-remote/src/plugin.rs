//! Catalog entry point for the remote backend.

use std::sync::Arc;

use strata_core::{
    Capability, CapabilityTable, DescriptionEntity, Driver, DriverConfiguration, DriverInstance,
    DriverType, Entity, EntityDeleteDriver, EntityExpireAccessDriver, EntityExpireUpdateDriver,
    EntityPublishDriver, EntityReadDriver, ObjectEntity, Result,
};
use strata_modules::PluginEntry;

use crate::driver::RemoteEntityDriver;

pub type RemoteObjectDriver = RemoteEntityDriver<ObjectEntity>;
pub type RemoteDescriptionDriver = RemoteEntityDriver<DescriptionEntity>;

/// Everything except subscriptions; the service has no push channel.
const REMOTE_CAPABILITIES: &[Capability] = &[
    Capability::Driver,
    Capability::Read,
    Capability::Publish,
    Capability::Delete,
    Capability::ExpireByUpdate,
    Capability::ExpireByAccess,
];

/// Capability views for a remote driver over family `E`.
pub fn remote_capabilities<E: Entity>(driver: Arc<RemoteEntityDriver<E>>) -> CapabilityTable {
    CapabilityTable::new()
        .with::<dyn Driver>(Capability::Driver, driver.clone())
        .with::<dyn EntityReadDriver<E>>(Capability::Read, driver.clone())
        .with::<dyn EntityPublishDriver<E>>(Capability::Publish, driver.clone())
        .with::<dyn EntityDeleteDriver<E>>(Capability::Delete, driver.clone())
        .with::<dyn EntityExpireUpdateDriver<E>>(Capability::ExpireByUpdate, driver.clone())
        .with::<dyn EntityExpireAccessDriver<E>>(Capability::ExpireByAccess, driver)
}

fn construct_objects(configuration: DriverConfiguration) -> Result<DriverInstance> {
    let driver = Arc::new(RemoteObjectDriver::new(configuration, "object")?);
    Ok(DriverInstance::new(driver.clone(), remote_capabilities(driver)))
}

fn construct_descriptions(configuration: DriverConfiguration) -> Result<DriverInstance> {
    let driver = Arc::new(RemoteDescriptionDriver::new(configuration, "description")?);
    Ok(DriverInstance::new(driver.clone(), remote_capabilities(driver)))
}

pub static PLUGIN: PluginEntry = PluginEntry {
    name: "strata-remote",
    description: "Proxy backend forwarding entity operations over HTTP",
    types: &[
        DriverType {
            name: "RemoteObjectDriver",
            capabilities: REMOTE_CAPABILITIES,
            constructor: construct_objects,
        },
        DriverType {
            name: "RemoteDescriptionDriver",
            capabilities: REMOTE_CAPABILITIES,
            constructor: construct_descriptions,
        },
    ],
};
