//! The entity table behind one memory driver instance.
//!
//! Each slot carries the entity plus its last-updated and last-accessed
//! times (unix milliseconds). Side-table drivers also keep a parent index
//! and a set of parents explicitly marked empty.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use strata_core::Entity;

/// Extracts the parent key a side-table entity hangs off.
pub(crate) type ParentKey<E> = fn(&E) -> &str;

#[derive(Debug, Clone)]
pub(crate) struct Slot<E> {
    pub entity: E,
    pub updated: i64,
    pub accessed: i64,
}

#[derive(Debug)]
pub(crate) struct EntityTable<E> {
    slots: HashMap<String, Slot<E>>,
    parent_of: Option<ParentKey<E>>,
    children: HashMap<String, BTreeSet<String>>,
    empty: HashSet<String>,
}

impl<E: Entity> EntityTable<E> {
    pub fn new(parent_of: Option<ParentKey<E>>) -> Self {
        Self {
            slots: HashMap::new(),
            parent_of,
            children: HashMap::new(),
            empty: HashSet::new(),
        }
    }

    pub fn get(&self, uuid: &str) -> Option<&E> {
        self.slots.get(uuid).map(|slot| &slot.entity)
    }

    pub fn slot(&self, uuid: &str) -> Option<&Slot<E>> {
        self.slots.get(uuid)
    }

    /// Return the entity and stamp its last-accessed time.
    pub fn touch(&mut self, uuid: &str, now: i64) -> Option<E> {
        let slot = self.slots.get_mut(uuid)?;
        slot.accessed = now;
        Some(slot.entity.clone())
    }

    /// Store `entity`. A new slot starts with `accessed == now`; replacing
    /// keeps the previous access time.
    pub fn upsert(&mut self, entity: E, now: i64) {
        let uuid = entity.uuid().to_owned();
        if let Some(parent_of) = self.parent_of {
            if let Some(previous) = self.slots.get(&uuid) {
                let old_parent = parent_of(&previous.entity).to_owned();
                self.unindex(&old_parent, &uuid);
            }
            let parent = parent_of(&entity).to_owned();
            self.empty.remove(&parent);
            self.children.entry(parent).or_default().insert(uuid.clone());
        }
        let accessed = self.slots.get(&uuid).map_or(now, |slot| slot.accessed);
        self.slots.insert(
            uuid,
            Slot {
                entity,
                updated: now,
                accessed,
            },
        );
    }

    pub fn remove(&mut self, uuid: &str) -> bool {
        let Some(slot) = self.slots.remove(uuid) else {
            return false;
        };
        if let Some(parent_of) = self.parent_of {
            let parent = parent_of(&slot.entity).to_owned();
            self.unindex(&parent, uuid);
        }
        true
    }

    /// Keys of every slot matching `predicate`.
    pub fn keys_where(&self, predicate: impl Fn(&Slot<E>) -> bool) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| predicate(slot))
            .map(|(uuid, _)| uuid.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Entities attached to `parent`, stamping their access time. `None`
    /// when nothing is attached.
    pub fn children(&mut self, parent: &str, now: i64) -> Option<Vec<E>> {
        let uuids: Vec<String> = self.children.get(parent)?.iter().cloned().collect();
        let entities: Vec<E> = uuids.iter().filter_map(|uuid| self.touch(uuid, now)).collect();
        (!entities.is_empty()).then_some(entities)
    }

    pub fn mark_empty(&mut self, parent: &str) {
        self.empty.insert(parent.to_owned());
    }

    pub fn is_marked_empty(&self, parent: &str) -> bool {
        self.empty.contains(parent)
    }

    fn unindex(&mut self, parent: &str, uuid: &str) {
        if let Some(set) = self.children.get_mut(parent) {
            set.remove(uuid);
            if set.is_empty() {
                self.children.remove(parent);
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{ChildEntity, DescriptionEntity, ObjectEntity};

    fn side_table() -> EntityTable<DescriptionEntity> {
        EntityTable::new(Some(<DescriptionEntity as ChildEntity>::parent_uuid))
    }

    #[test]
    fn replacing_keeps_access_time() {
        let mut table = EntityTable::new(None);
        table.upsert(ObjectEntity::new("u1", "a", 1), 10);
        table.touch("u1", 20);
        table.upsert(ObjectEntity::new("u1", "b", 2), 30);
        let slot = table.slot("u1").expect("slot must exist");
        assert_eq!(slot.updated, 30);
        assert_eq!(slot.accessed, 20);
        assert_eq!(slot.entity.name, "b");
    }

    #[test]
    fn parent_index_follows_removals() {
        let mut table = side_table();
        let en = DescriptionEntity::new("def-1", "en", "Spindle", 1);
        let de = DescriptionEntity::new("def-1", "de", "Spindel", 1);
        let en_uuid = en.uuid.clone();
        table.upsert(en, 5);
        table.upsert(de, 5);
        assert_eq!(table.children("def-1", 6).map(|c| c.len()), Some(2));

        assert!(table.remove(&en_uuid));
        assert_eq!(table.children("def-1", 7).map(|c| c.len()), Some(1));
        assert!(table.children("def-2", 7).is_none());
    }

    #[test]
    fn publishing_under_a_parent_clears_empty_mark() {
        let mut table = side_table();
        table.mark_empty("def-1");
        assert!(table.is_marked_empty("def-1"));
        table.upsert(DescriptionEntity::new("def-1", "en", "Spindle", 1), 5);
        assert!(!table.is_marked_empty("def-1"));
    }
}
