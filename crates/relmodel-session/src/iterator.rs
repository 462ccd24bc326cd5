//! Per-parent views over a fetched grouping.

use crate::entity::EntityRef;
use std::collections::HashMap;
use std::rc::Rc;

/// Entities fetched for a batch, grouped by the key of the parent they
/// belong to.
///
/// A grouping is built once and then only shared; it is never updated in
/// place.
#[derive(Debug, Default)]
pub struct Grouping {
    groups: HashMap<String, Vec<EntityRef>>,
    flat: Vec<EntityRef>,
}

impl Grouping {
    /// Create an empty grouping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entity` to the group of `key`.
    pub fn push(&mut self, key: String, entity: EntityRef) {
        self.flat.push(entity.clone());
        self.groups.entry(key).or_default().push(entity);
    }

    /// Entities of one group, in fetch order.
    pub fn get(&self, key: &str) -> &[EntityRef] {
        self.groups.get(key).map_or(&[], Vec::as_slice)
    }

    /// Every entity, in fetch order.
    pub fn all(&self) -> &[EntityRef] {
        &self.flat
    }

    /// True if nothing was fetched.
    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }
}

/// Restartable iterator over one group of a shared [`Grouping`].
///
/// Cloning the iterator is cheap; every clone starts where the original
/// currently is.
#[derive(Debug, Clone)]
pub struct EntityIterator {
    data: Rc<Grouping>,
    index: Option<String>,
    position: usize,
}

impl EntityIterator {
    /// Iterate every entity of `data`.
    pub fn new(data: Rc<Grouping>) -> Self {
        Self {
            data,
            index: None,
            position: 0,
        }
    }

    /// Iterator with nothing to yield.
    pub fn empty() -> Self {
        Self::new(Rc::new(Grouping::new()))
    }

    /// Restrict the iterator to the group of `key` and rewind it.
    pub fn set_data_index(&mut self, key: Option<String>) {
        self.index = key;
        self.position = 0;
    }

    /// Builder form of [`set_data_index`](Self::set_data_index).
    #[must_use]
    pub fn with_data_index(mut self, key: impl Into<String>) -> Self {
        self.set_data_index(Some(key.into()));
        self
    }

    /// The shared grouping.
    pub fn grouping(&self) -> &Rc<Grouping> {
        &self.data
    }

    fn items(&self) -> &[EntityRef] {
        match &self.index {
            Some(key) => self.data.get(key),
            None => self.data.all(),
        }
    }
}

impl Iterator for EntityIterator {
    type Item = EntityRef;

    fn next(&mut self) -> Option<EntityRef> {
        let item = self.items().get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items().len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for EntityIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use relmodel_core::{EntityDef, SchemaBuilder, Value};

    fn entities(n: i64) -> Vec<EntityRef> {
        let mut builder = SchemaBuilder::new();
        let kind = builder.entity(EntityDef::new("Tag", "tags"));
        let schema = Rc::new(builder.build().unwrap());
        (1..=n)
            .map(|id| {
                EntityRef::new(Entity::hydrate(
                    Rc::clone(&schema),
                    kind,
                    vec![("id".into(), Value::BigInt(id))],
                ))
            })
            .collect()
    }

    #[test]
    fn test_iterator_positioned_per_parent() {
        let e = entities(3);
        let mut grouping = Grouping::new();
        grouping.push("1".into(), e[0].clone());
        grouping.push("2".into(), e[1].clone());
        grouping.push("1".into(), e[2].clone());
        let data = Rc::new(grouping);

        let first: Vec<_> = EntityIterator::new(Rc::clone(&data))
            .with_data_index("1")
            .collect();
        assert_eq!(first, vec![e[0].clone(), e[2].clone()]);

        let second = EntityIterator::new(Rc::clone(&data)).with_data_index("2");
        assert_eq!(second.len(), 1);

        let missing = EntityIterator::new(Rc::clone(&data)).with_data_index("9");
        assert_eq!(missing.count(), 0);

        assert_eq!(EntityIterator::new(data).count(), 3);
    }

    #[test]
    fn test_clone_restarts_independently() {
        let e = entities(2);
        let mut grouping = Grouping::new();
        grouping.push("k".into(), e[0].clone());
        grouping.push("k".into(), e[1].clone());
        let mut it = EntityIterator::new(Rc::new(grouping)).with_data_index("k");
        assert_eq!(it.next(), Some(e[0].clone()));
        let mut copy = it.clone();
        assert_eq!(copy.next(), Some(e[1].clone()));
        assert_eq!(it.next(), Some(e[1].clone()));
        it.set_data_index(Some("k".into()));
        assert_eq!(it.len(), 2);
    }

    #[test]
    fn test_empty_iterator() {
        assert_eq!(EntityIterator::empty().next(), None);
        assert!(Grouping::new().is_empty());
    }
}
