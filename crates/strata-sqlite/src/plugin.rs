//! Catalog entry point for the SQLite backend.

use std::sync::Arc;

use strata_core::{
    Capability, DriverConfiguration, DriverInstance, DriverType, ObjectEntity, Result,
    entity_capabilities,
};
use strata_modules::PluginEntry;

use crate::driver::SqliteObjectDriver;

fn construct_objects(configuration: DriverConfiguration) -> Result<DriverInstance> {
    let driver = Arc::new(SqliteObjectDriver::new(configuration)?);
    let table = entity_capabilities::<ObjectEntity, _>(driver.clone())
        .with::<SqliteObjectDriver>(Capability::Query, driver.clone());
    Ok(DriverInstance::new(driver, table))
}

pub static PLUGIN: PluginEntry = PluginEntry {
    name: "strata-sqlite",
    description: "Durable SQLite backend for objects",
    types: &[DriverType {
        name: "SqliteObjectDriver",
        capabilities: &[
            Capability::Driver,
            Capability::Read,
            Capability::Publish,
            Capability::Subscribe,
            Capability::Delete,
            Capability::ExpireByUpdate,
            Capability::ExpireByAccess,
            Capability::Query,
        ],
        constructor: construct_objects,
    }],
};
