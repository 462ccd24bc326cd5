//! Identity Map pattern: one entity instance per primary key.
//!
//! Every entity kind has its own map inside its repository. Loading the same
//! row twice yields the same [`EntityRef`], so a change made through one
//! handle is visible through every other.

use crate::entity::EntityRef;
use relmodel_core::{Value, composite_key};
use std::collections::HashMap;

/// Entities of one kind keyed by their primary key.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<String, EntityRef>,
}

impl IdentityMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entity` under its current primary key.
    ///
    /// If another instance already holds that key, the existing instance is
    /// returned and `entity` is ignored.
    pub fn insert(&mut self, entity: EntityRef) -> EntityRef {
        let key = entity.key();
        self.entries.entry(key).or_insert(entity).clone()
    }

    /// Register `entity`, replacing whatever held its key.
    pub fn replace(&mut self, entity: EntityRef) {
        self.entries.insert(entity.key(), entity);
    }

    /// The instance holding `id`.
    pub fn get(&self, id: &[Value]) -> Option<EntityRef> {
        self.entries.get(&composite_key(id)).cloned()
    }

    /// Is `id` mapped?
    pub fn contains(&self, id: &[Value]) -> bool {
        self.entries.contains_key(&composite_key(id))
    }

    /// Forget `id`. Returns whether it was mapped.
    pub fn remove(&mut self, id: &[Value]) -> bool {
        self.entries.remove(&composite_key(id)).is_some()
    }

    /// Every mapped entity, in no particular order.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.entries.values().cloned().collect()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of mapped entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
