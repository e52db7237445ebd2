//! Catalog entry point for the memory backend.

use strata_core::{
    Capability, DescriptionEntity, DriverConfiguration, DriverInstance, DriverType, ObjectEntity,
    Result, entity_capabilities,
};
use strata_modules::PluginEntry;

use crate::driver::MemoryEntityDriver;

pub type MemoryObjectDriver = MemoryEntityDriver<ObjectEntity>;
pub type MemoryDescriptionDriver = MemoryEntityDriver<DescriptionEntity>;

const ENTITY_CAPABILITIES: &[Capability] = &[
    Capability::Driver,
    Capability::Read,
    Capability::Publish,
    Capability::Subscribe,
    Capability::Delete,
    Capability::ExpireByUpdate,
    Capability::ExpireByAccess,
];

const SIDE_TABLE_CAPABILITIES: &[Capability] = &[
    Capability::Driver,
    Capability::Read,
    Capability::Publish,
    Capability::Subscribe,
    Capability::Delete,
    Capability::ExpireByUpdate,
    Capability::ExpireByAccess,
    Capability::Query,
];

fn construct_objects(configuration: DriverConfiguration) -> Result<DriverInstance> {
    let driver = MemoryObjectDriver::new(configuration)?.start();
    let table = entity_capabilities::<ObjectEntity, _>(driver.clone());
    Ok(DriverInstance::new(driver, table))
}

/// The description driver also exposes its concrete type under
/// [`Capability::Query`] for `query` and `empty`.
fn construct_descriptions(configuration: DriverConfiguration) -> Result<DriverInstance> {
    let driver = MemoryDescriptionDriver::side_table(configuration)?.start();
    let table = entity_capabilities::<DescriptionEntity, _>(driver.clone())
        .with::<MemoryDescriptionDriver>(Capability::Query, driver.clone());
    Ok(DriverInstance::new(driver, table))
}

pub static PLUGIN: PluginEntry = PluginEntry {
    name: "strata-memory",
    description: "In-memory TTL backend for objects and descriptions",
    types: &[
        DriverType {
            name: "MemoryObjectDriver",
            capabilities: ENTITY_CAPABILITIES,
            constructor: construct_objects,
        },
        DriverType {
            name: "MemoryDescriptionDriver",
            capabilities: SIDE_TABLE_CAPABILITIES,
            constructor: construct_descriptions,
        },
    ],
};
