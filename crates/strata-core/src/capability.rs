//! Capability tags and trait-object tables.
//!
//! Plugins declare which operations a driver type supports with
//! [`Capability`] tags. A constructed driver publishes one trait-object view
//! per capability in a [`CapabilityTable`], which the provider searches when
//! a caller asks for a driver by capability.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Base tag carried by every storage driver type.
    Driver,
    Read,
    Publish,
    Subscribe,
    Delete,
    ExpireByUpdate,
    ExpireByAccess,
    /// Type-specific query extensions.
    Query,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Driver => "driver",
            Self::Read => "read",
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Delete => "delete",
            Self::ExpireByUpdate => "expire_by_update",
            Self::ExpireByAccess => "expire_by_access",
            Self::Query => "query",
        };
        f.write_str(s)
    }
}

struct View {
    capability: Capability,
    type_id: TypeId,
    object: Box<dyn Any + Send + Sync>,
}

/// Trait-object views of one driver instance, keyed by capability.
#[derive(Default)]
pub struct CapabilityTable {
    views: Vec<View>,
}

impl CapabilityTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `view` (typically `Arc<dyn SomeDriverTrait<E>>`) under
    /// `capability`.
    #[must_use]
    pub fn with<C>(mut self, capability: Capability, view: Arc<C>) -> Self
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.views.push(View {
            capability,
            type_id: TypeId::of::<Arc<C>>(),
            object: Box::new(view),
        });
        self
    }

    /// First view whose type is `Arc<C>`.
    pub fn get<C>(&self) -> Option<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let wanted = TypeId::of::<Arc<C>>();
        self.views
            .iter()
            .filter(|v| v.type_id == wanted)
            .find_map(|v| v.object.downcast_ref::<Arc<C>>())
            .cloned()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.views.iter().any(|v| v.capability == capability)
    }

    /// Capability tags in registration order, without duplicates.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut tags: Vec<Capability> = Vec::with_capacity(self.views.len());
        for view in &self.views {
            if !tags.contains(&view.capability) {
                tags.push(view.capability);
            }
        }
        tags
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
