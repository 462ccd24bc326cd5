//! Preload batches.
//!
//! Entities loaded together share one [`PreloadContainer`]. When a
//! relationship of any of them is resolved, the resolver reads the keys of the
//! whole batch and fetches for all of them at once.

use crate::entity::{EntityRef, WeakEntityRef};
use relmodel_core::Value;
use std::collections::HashSet;
use std::rc::Rc;

/// An ordered batch of sibling entities.
#[derive(Debug, Default)]
pub struct PreloadContainer {
    entities: Vec<WeakEntityRef>,
}

impl PreloadContainer {
    /// Batch over `entities`, in order.
    pub fn new(entities: &[EntityRef]) -> Self {
        Self {
            entities: entities.iter().map(EntityRef::downgrade).collect(),
        }
    }

    /// Number of entities the batch was created with.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities of the batch that are still alive.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.entities.iter().filter_map(WeakEntityRef::upgrade).collect()
    }

    /// Distinct, non-null raw values of `property` across the batch, in batch
    /// order.
    pub fn preload_values(&self, property: &str) -> Vec<Value> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for entity in self.entities() {
            let Ok(entity) = entity.try_borrow() else {
                continue;
            };
            let Ok(value) = entity.get_raw_value(property) else {
                continue;
            };
            if !value.is_null() && seen.insert(value.key_fragment()) {
                values.push(value);
            }
        }
        values
    }
}

/// Share one preload batch between `entities` when there is more than one.
pub(crate) fn attach_preload(entities: &[EntityRef]) {
    if entities.len() < 2 {
        return;
    }
    let container = Rc::new(PreloadContainer::new(entities));
    for entity in entities {
        if let Ok(mut entity) = entity.try_borrow_mut() {
            entity.set_preload_container(Some(Rc::clone(&container)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use relmodel_core::{EntityDef, EntityKind, RelationshipMetadata, Schema, SchemaBuilder};

    fn schema() -> (Rc<Schema>, EntityKind) {
        let mut builder = SchemaBuilder::new();
        let author = builder.entity(EntityDef::new("Author", "authors"));
        let book = builder.entity(EntityDef::new("Book", "books").property("title"));
        builder.relationship(RelationshipMetadata::many_has_one("author", book, author));
        (Rc::new(builder.build().unwrap()), book)
    }

    fn book(schema: &Rc<Schema>, kind: EntityKind, id: i64, author: Value) -> EntityRef {
        EntityRef::new(Entity::hydrate(
            Rc::clone(schema),
            kind,
            vec![("id".into(), Value::BigInt(id)), ("author".into(), author)],
        ))
    }

    #[test]
    fn test_preload_values_distinct_and_ordered() {
        let (schema, kind) = schema();
        let books = vec![
            book(&schema, kind, 1, Value::BigInt(7)),
            book(&schema, kind, 2, Value::Null),
            book(&schema, kind, 3, Value::BigInt(5)),
            book(&schema, kind, 4, Value::Int(7)),
        ];
        let container = PreloadContainer::new(&books);
        assert_eq!(
            container.preload_values("author"),
            vec![Value::BigInt(7), Value::BigInt(5)]
        );
        assert_eq!(container.entities().len(), 4);
    }

    #[test]
    fn test_dropped_entities_leave_the_batch() {
        let (schema, kind) = schema();
        let keep = book(&schema, kind, 1, Value::Null);
        let container = {
            let dropped = book(&schema, kind, 2, Value::Null);
            PreloadContainer::new(&[keep.clone(), dropped])
        };
        assert_eq!(container.len(), 2);
        assert_eq!(container.entities(), vec![keep.clone()]);
        assert_eq!(container.preload_values("id"), vec![Value::BigInt(1)]);
        drop(keep);
        assert!(container.entities().is_empty());
    }

    #[test]
    fn test_attach_preload_skips_single_entity() {
        let (schema, kind) = schema();
        let single = book(&schema, kind, 1, Value::Null);
        attach_preload(std::slice::from_ref(&single));
        assert!(single.borrow().preload_container().is_none());

        let pair = vec![single.clone(), book(&schema, kind, 2, Value::Null)];
        attach_preload(&pair);
        let a = pair[0].borrow().preload_container().unwrap();
        let b = pair[1].borrow().preload_container().unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }
}
