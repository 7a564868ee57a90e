use super::{CapturedItem, TrackedItem};
use crate::core::{EntityId, ItemKey, Result};
use indexmap::IndexMap;

/// Tracked items keyed by entity identity, in tracking order.
#[derive(Clone, Default)]
pub struct TrackedSet {
    items: IndexMap<EntityId, TrackedItem>,
}

impl TrackedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the item for its entity. A replaced item keeps
    /// its position in the tracking order.
    pub fn insert(&mut self, item: TrackedItem) -> Option<TrackedItem> {
        self.items.insert(item.entity_id(), item)
    }

    pub fn get(&self, id: EntityId) -> Option<&TrackedItem> {
        self.items.get(&id)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<TrackedItem> {
        self.items.shift_remove(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &TrackedItem> {
        self.items.values()
    }

    /// True if any item tracked in `table` resolves to `key`.
    pub fn key_is_tracked(&self, table: &str, key: &ItemKey) -> Result<bool> {
        for item in self.items.values().filter(|i| i.table_name() == table) {
            if item.schema().key_schema.same_key(&item.key()?, key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Copies of every item, in tracking order.
    pub fn to_vec(&self) -> Vec<TrackedItem> {
        self.items.values().cloned().collect()
    }

    /// Advances every flushed item to its post-flush state.
    pub fn advance(&mut self, flushed: Vec<CapturedItem>) {
        for captured in flushed {
            let (item, written) = captured.into_parts();
            let id = item.entity_id();
            match item.after_flush(written) {
                Some(next) => {
                    self.items.insert(id, next);
                }
                None => {
                    self.items.shift_remove(&id);
                }
            }
        }
    }
}
