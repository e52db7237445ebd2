//! Platform event bus.
//!
//! Package, module, configuration and driver lifecycle notifications flow
//! through one [`EventBus`] built on [`tokio::sync::broadcast`]. Events are
//! wrapped in [`Arc`] so fan-out does not clone payloads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformEvent {
    /// A package version was installed in the package store.
    PackageAdded {
        package_id: String,
        version: String,
        category: String,
    },

    PackageRemoved {
        package_id: String,
        version: String,
        category: String,
    },

    /// A module was loaded and cached.
    ModuleAdded {
        module_key: String,
        package_id: String,
        version: String,
    },

    ModuleRemoved {
        module_key: String,
        package_id: String,
        version: String,
    },

    ModuleLoadError {
        package_id: String,
        version: String,
        message: String,
    },

    /// A driver configuration was added or edited.
    ConfigurationChanged { configuration_id: String },

    ConfigurationRemoved { configuration_id: String },

    DriverAdded {
        configuration_id: String,
        driver_type: String,
    },

    DriverRemoved { configuration_id: String },

    DriverLoadError {
        configuration_id: String,
        message: String,
    },
}

impl PlatformEvent {
    /// Whether this event should trigger a driver reconciliation pass.
    pub fn triggers_reconciliation(&self) -> bool {
        matches!(
            self,
            Self::PackageAdded { .. }
                | Self::PackageRemoved { .. }
                | Self::ConfigurationChanged { .. }
                | Self::ConfigurationRemoved { .. }
        )
    }
}

/// Publish/subscribe bus for [`PlatformEvent`]s.
///
/// Cheaply cloneable and `Send + Sync`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<PlatformEvent>>,
}

impl EventBus {
    /// Create a bus with the given channel capacity. Subscribers that fall
    /// more than `capacity` events behind observe a lag error.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers, returning how many will see it.
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: PlatformEvent) -> usize {
        match self.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(receivers = n, "platform event published");
                n
            }
            Err(_) => {
                tracing::trace!("platform event published but no active receivers");
                0
            }
        }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PlatformEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let receivers = bus.publish(PlatformEvent::ConfigurationChanged {
            configuration_id: "c1".into(),
        });
        assert_eq!(receivers, 1);

        let event = rx.recv().await.expect("should receive event");
        assert_eq!(
            *event,
            PlatformEvent::ConfigurationChanged {
                configuration_id: "c1".into()
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(4);
        assert_eq!(
            bus.publish(PlatformEvent::DriverRemoved {
                configuration_id: "x".into()
            }),
            0
        );
    }

    #[test]
    fn only_inputs_trigger_reconciliation() {
        assert!(PlatformEvent::ConfigurationRemoved {
            configuration_id: "c".into()
        }
        .triggers_reconciliation());
        assert!(!PlatformEvent::DriverAdded {
            configuration_id: "c".into(),
            driver_type: "t".into()
        }
        .triggers_reconciliation());
    }
}
