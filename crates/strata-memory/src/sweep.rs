//! Background TTL eviction.
//!
//! One worker per driver instance. It holds only a weak reference to the
//! table, so it winds down on its own once the driver is gone; `dispose`
//! aborts it eagerly.

use std::sync::{Mutex, Weak};
use std::time::Duration;

use strata_core::{Entity, now_millis};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::table::{EntityTable, lock};

/// Spawn the sweep worker on the current runtime, if there is one.
pub(crate) fn spawn<E: Entity>(
    table: Weak<Mutex<EntityTable<E>>>,
    ttl: Duration,
    interval: Duration,
    source: String,
) -> Option<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(table) = table.upgrade() else {
                break;
            };
            let evicted = sweep_once(&table, ttl, now_millis());
            if evicted > 0 {
                debug!(driver = %source, count = evicted, "evicted idle entities");
            }
        }
        debug!(driver = %source, "sweep worker stopped");
    }))
}

/// Evict every entity not accessed within `ttl` of `now`.
pub(crate) fn sweep_once<E: Entity>(
    table: &Mutex<EntityTable<E>>,
    ttl: Duration,
    now: i64,
) -> usize {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let cutoff = now.saturating_sub(ttl_ms);
    let mut table = lock(table);
    let stale = table.keys_where(|slot| slot.accessed < cutoff);
    for uuid in &stale {
        table.remove(uuid);
    }
    stale.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::ObjectEntity;

    #[test]
    fn evicts_only_idle_entities() {
        let table = Mutex::new(EntityTable::new(None));
        {
            let mut guard = lock(&table);
            guard.upsert(ObjectEntity::new("idle", "a", 1), 1_000);
            guard.upsert(ObjectEntity::new("busy", "b", 1), 1_000);
            guard.touch("busy", 6_500);
        }

        let evicted = sweep_once(&table, Duration::from_secs(5), 7_000);

        assert_eq!(evicted, 1);
        let guard = lock(&table);
        assert!(guard.get("idle").is_none());
        assert!(guard.get("busy").is_some());
    }

    #[test]
    fn recent_writes_survive_without_reads() {
        let table = Mutex::new(EntityTable::new(None));
        lock(&table).upsert(ObjectEntity::new("fresh", "a", 1), 4_000);
        assert_eq!(sweep_once(&table, Duration::from_secs(5), 7_000), 0);
    }
}
