//! Entities: explicit property maps built from schema metadata.
//!
//! An [`Entity`] owns one slot per declared property. Scalar and virtual
//! properties hold a [`Value`]; relationship properties own a container
//! ([`HasOne`] or [`HasMany`]). Entities are shared through [`EntityRef`], a
//! single-threaded handle; the relationship API lives on the handle because
//! resolving or synchronizing a relationship touches other entities.
//!
//! Borrowing rule: never hold a `borrow()`/`borrow_mut()` guard of an entity
//! while calling an [`EntityRef`] method that resolves or propagates a
//! relationship.

use crate::orm::OrmContext;
use crate::preload::PreloadContainer;
use crate::relationships::{HasMany, HasOne};
use relmodel_core::{
    EntityKind, EntityMetadata, Error, PropertyKind, RelationshipId, RelationshipKind, Result,
    Schema, Value, composite_key,
};
use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

/// Storage of one property.
#[derive(Debug)]
pub(crate) enum Slot {
    Scalar(Value),
    HasOne(HasOne),
    HasMany(HasMany),
}

/// Shape of a property, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Scalar or virtual value.
    Scalar,
    /// To-one relationship.
    ToOne,
    /// To-many relationship.
    ToMany,
}

/// A property value crossing the generic `get_value`/`set_value` API.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Scalar value.
    Scalar(Value),
    /// To-one target.
    Entity(Option<EntityRef>),
    /// To-many members.
    Collection(Vec<EntityRef>),
}

impl PropertyValue {
    /// The scalar, if this is one.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            PropertyValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// The to-one target, if this is one.
    pub fn into_entity(self) -> Option<EntityRef> {
        match self {
            PropertyValue::Entity(e) => e,
            _ => None,
        }
    }

    /// The to-many members; empty for other shapes.
    pub fn into_collection(self) -> Vec<EntityRef> {
        match self {
            PropertyValue::Collection(c) => c,
            _ => Vec::new(),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(v: Value) -> Self {
        PropertyValue::Scalar(v)
    }
}

impl From<EntityRef> for PropertyValue {
    fn from(e: EntityRef) -> Self {
        PropertyValue::Entity(Some(e))
    }
}

impl From<Option<EntityRef>> for PropertyValue {
    fn from(e: Option<EntityRef>) -> Self {
        PropertyValue::Entity(e)
    }
}

impl From<Vec<EntityRef>> for PropertyValue {
    fn from(c: Vec<EntityRef>) -> Self {
        PropertyValue::Collection(c)
    }
}

#[derive(Debug, Clone, Default)]
struct ModifiedFlags {
    whole: bool,
    columns: HashSet<String>,
}

/// An identity-bearing record mirroring one storage row.
pub struct Entity {
    kind: EntityKind,
    schema: Rc<Schema>,
    slots: Vec<Slot>,
    modified: ModifiedFlags,
    persisted_id: Option<Vec<Value>>,
    orm: Weak<OrmContext>,
    preload: Option<Rc<PreloadContainer>>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.metadata().name)
            .field("id", &self.id())
            .field("persisted", &self.is_persisted())
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl Entity {
    /// A fresh, unpersisted entity. It counts as modified as a whole.
    pub fn new(schema: Rc<Schema>, kind: EntityKind) -> Self {
        let slots = schema
            .entity(kind)
            .properties
            .iter()
            .map(|prop| match prop.kind {
                PropertyKind::Scalar | PropertyKind::Virtual => Slot::Scalar(Value::Null),
                PropertyKind::Relationship(id) => {
                    if schema.relationship(id).kind.is_to_many() {
                        Slot::HasMany(HasMany::new(id))
                    } else {
                        Slot::HasOne(HasOne::new(id))
                    }
                }
            })
            .collect();
        Self {
            kind,
            schema,
            slots,
            modified: ModifiedFlags {
                whole: true,
                columns: HashSet::new(),
            },
            persisted_id: None,
            orm: Weak::new(),
            preload: None,
        }
    }

    /// Build a persisted entity from entity-named storage data.
    ///
    /// Unknown properties are ignored; to-one properties receive their raw
    /// foreign key.
    pub(crate) fn hydrate(schema: Rc<Schema>, kind: EntityKind, data: Vec<(String, Value)>) -> Self {
        let mut entity = Self::new(schema, kind);
        for (name, value) in data {
            if let Some(index) = entity.metadata().property_index(&name) {
                match &mut entity.slots[index] {
                    Slot::Scalar(slot) => *slot = value,
                    Slot::HasOne(container) => container.set_raw_value(value),
                    Slot::HasMany(_) => {}
                }
            }
        }
        entity.modified = ModifiedFlags::default();
        entity.persisted_id = Some(entity.id());
        entity
    }

    /// Entity kind.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Schema the entity was built from.
    pub fn schema(&self) -> &Rc<Schema> {
        &self.schema
    }

    /// Metadata of the entity kind.
    pub fn metadata(&self) -> &EntityMetadata {
        self.schema.entity(self.kind)
    }

    /// Current primary key values, one per key property.
    pub fn id(&self) -> Vec<Value> {
        self.metadata()
            .primary_key
            .iter()
            .map(|name| self.get_raw_value(name).unwrap_or(Value::Null))
            .collect()
    }

    /// Internal map key of the current primary key.
    pub fn key(&self) -> String {
        composite_key(&self.id())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.metadata().property_index(name).ok_or_else(|| {
            Error::InvalidInput(format!(
                "entity {} has no property '{}'",
                self.metadata().name,
                name
            ))
        })
    }

    /// Shape of a property.
    pub fn slot_kind(&self, name: &str) -> Result<SlotKind> {
        Ok(match &self.slots[self.index_of(name)?] {
            Slot::Scalar(_) => SlotKind::Scalar,
            Slot::HasOne(_) => SlotKind::ToOne,
            Slot::HasMany(_) => SlotKind::ToMany,
        })
    }

    /// Relationship descriptor behind a property.
    pub fn relationship_id(&self, name: &str) -> Result<RelationshipId> {
        match self.metadata().require_property(name)?.kind {
            PropertyKind::Relationship(id) => Ok(id),
            _ => Err(Error::InvalidInput(format!(
                "{}.{} is not a relationship",
                self.metadata().name,
                name
            ))),
        }
    }

    /// Read a scalar property.
    pub fn get_scalar(&self, name: &str) -> Result<Value> {
        match &self.slots[self.index_of(name)?] {
            Slot::Scalar(v) => Ok(v.clone()),
            _ => Err(self.not_scalar(name)),
        }
    }

    /// Write a scalar property, marking it modified when the value changes.
    ///
    /// The primary key of a persisted entity cannot change.
    pub fn set_scalar(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let index = self.index_of(name)?;
        let is_primary = self.metadata().properties[index].is_primary;
        let Slot::Scalar(current) = &self.slots[index] else {
            return Err(self.not_scalar(name));
        };
        if *current == value {
            return Ok(());
        }
        if is_primary && self.is_persisted() {
            return Err(Error::InvalidInput(format!(
                "cannot change primary key {}.{} of a persisted entity",
                self.metadata().name,
                name
            )));
        }
        self.slots[index] = Slot::Scalar(value);
        self.set_as_modified(Some(name));
        Ok(())
    }

    fn not_scalar(&self, name: &str) -> Error {
        Error::InvalidInput(format!(
            "{}.{} is a relationship, not a scalar",
            self.metadata().name,
            name
        ))
    }

    /// Normalized value suitable for storage and identification.
    ///
    /// To-one properties yield the foreign key of their target; to-many
    /// properties have no raw value.
    pub fn get_raw_value(&self, name: &str) -> Result<Value> {
        match &self.slots[self.index_of(name)?] {
            Slot::Scalar(v) => Ok(v.clone()),
            Slot::HasOne(container) => Ok(container.raw_value()),
            Slot::HasMany(_) => Err(Error::InvalidInput(format!(
                "to-many property {}.{} has no raw value",
                self.metadata().name,
                name
            ))),
        }
    }

    /// Replace the normalized value without marking anything modified.
    ///
    /// A to-one property becomes unresolved and will look its target up by
    /// the new foreign key.
    pub fn set_raw_value(&mut self, name: &str, value: Value) -> Result<()> {
        let index = self.index_of(name)?;
        match &mut self.slots[index] {
            Slot::Scalar(slot) => *slot = value,
            Slot::HasOne(container) => container.set_raw_value(value),
            Slot::HasMany(_) => {
                return Err(Error::InvalidInput(format!(
                    "to-many property {}.{} has no raw value",
                    self.metadata().name,
                    name
                )));
            }
        }
        Ok(())
    }

    /// Is the entity (`None`) or one property modified?
    ///
    /// An entity that was never persisted is modified as a whole.
    pub fn is_modified(&self, name: Option<&str>) -> bool {
        match name {
            None => self.modified.whole || !self.modified.columns.is_empty(),
            Some(name) => self.modified.whole || self.modified.columns.contains(name),
        }
    }

    /// Mark the entity (`None`) or one property modified.
    pub fn set_as_modified(&mut self, name: Option<&str>) {
        match name {
            None => self.modified.whole = true,
            Some(name) => {
                self.modified.columns.insert(name.to_string());
            }
        }
    }

    /// Has the entity been written to storage?
    pub fn is_persisted(&self) -> bool {
        self.persisted_id.is_some()
    }

    /// Primary key under which the entity was last persisted.
    pub fn persisted_id(&self) -> Option<&[Value]> {
        self.persisted_id.as_deref()
    }

    /// Is the entity attached to a live [`Orm`](crate::Orm)?
    pub fn is_attached(&self) -> bool {
        self.orm.strong_count() > 0
    }

    /// Preload batch the entity was loaded with, if any.
    pub fn preload_container(&self) -> Option<Rc<PreloadContainer>> {
        self.preload.clone()
    }

    pub(crate) fn set_preload_container(&mut self, container: Option<Rc<PreloadContainer>>) {
        self.preload = container;
    }

    pub(crate) fn orm(&self) -> Option<Rc<OrmContext>> {
        self.orm.upgrade()
    }

    pub(crate) fn attach(&mut self, orm: Weak<OrmContext>) {
        self.orm = orm;
    }

    /// Store the identity assigned by a write and mark the entity clean.
    pub(crate) fn on_persist(&mut self, id: Vec<Value>) {
        let keys = self.metadata().primary_key.clone();
        for (name, value) in keys.iter().zip(id.iter()) {
            if let Some(index) = self.metadata().property_index(name) {
                match &mut self.slots[index] {
                    Slot::Scalar(slot) => *slot = value.clone(),
                    Slot::HasOne(container) if container.raw_value().is_null() => {
                        container.set_raw_value(value.clone());
                    }
                    _ => {}
                }
            }
        }
        self.persisted_id = Some(id);
        self.modified = ModifiedFlags::default();
        for slot in &mut self.slots {
            if let Slot::HasOne(container) = slot {
                container.reset_modified();
            }
        }
    }

    /// Forget the persisted identity after a delete.
    pub(crate) fn on_remove(&mut self) {
        self.persisted_id = None;
        self.preload = None;
        self.orm = Weak::new();
    }

    /// Reset every container to a clean, not-yet-fetched state.
    pub(crate) fn on_flush(&mut self) {
        if self.is_persisted() {
            self.modified = ModifiedFlags::default();
        }
        for slot in &mut self.slots {
            match slot {
                Slot::HasOne(container) => container.reset_modified(),
                Slot::HasMany(container) => container.reset(),
                Slot::Scalar(_) => {}
            }
        }
    }

    /// Drop every relationship reference held by this entity.
    pub(crate) fn clear_relationships(&mut self) {
        for slot in &mut self.slots {
            match slot {
                Slot::HasOne(container) => container.unload(),
                Slot::HasMany(container) => container.reset(),
                Slot::Scalar(_) => {}
            }
        }
        self.preload = None;
    }

    /// Related entities a persist has to write around this one.
    ///
    /// The first list must be written before this entity (targets of stored
    /// foreign keys, members of main-side join tables); the second after it.
    /// Entities storing this entity's key go second, and so do members added
    /// or removed through a non-main join table, whose main side writes the
    /// link rows.
    pub(crate) fn cascade(&self) -> (Vec<EntityRef>, Vec<EntityRef>) {
        let mut before = Vec::new();
        let mut after = Vec::new();
        for slot in &self.slots {
            match slot {
                Slot::HasOne(container) => {
                    let Some(Some(target)) = container.resolved() else {
                        continue;
                    };
                    if self.schema.relationship(container.relationship()).stores_column() {
                        before.push(target);
                    } else {
                        after.push(target);
                    }
                }
                Slot::HasMany(container) => {
                    let relationship = self.schema.relationship(container.relationship());
                    match relationship.kind {
                        RelationshipKind::ManyHasMany if relationship.is_main => {
                            before.extend(container.pending_adds().iter().cloned());
                        }
                        RelationshipKind::ManyHasMany => {
                            after.extend(container.pending_adds().iter().cloned());
                            after.extend(container.pending_removes().iter().cloned());
                        }
                        _ => after.extend(container.pending_adds().iter().cloned()),
                    }
                }
                Slot::Scalar(_) => {}
            }
        }
        (before, after)
    }

    /// Any join-table change waiting on a main-side to-many property.
    pub(crate) fn has_pending_links(&self) -> bool {
        self.slots.iter().any(|slot| match slot {
            Slot::HasMany(container) => {
                let relationship = self.schema.relationship(container.relationship());
                relationship.kind == RelationshipKind::ManyHasMany
                    && relationship.is_main
                    && container.has_pending()
            }
            _ => false,
        })
    }

    pub(crate) fn has_one(&self, name: &str) -> Result<&HasOne> {
        match &self.slots[self.index_of(name)?] {
            Slot::HasOne(container) => Ok(container),
            _ => Err(wrong_container(self.metadata(), name, "to-one")),
        }
    }

    pub(crate) fn has_one_mut(&mut self, name: &str) -> Result<&mut HasOne> {
        let index = self.index_of(name)?;
        let Self {
            slots, schema, kind, ..
        } = self;
        match &mut slots[index] {
            Slot::HasOne(container) => Ok(container),
            _ => Err(wrong_container(schema.entity(*kind), name, "to-one")),
        }
    }

    pub(crate) fn has_many(&self, name: &str) -> Result<&HasMany> {
        match &self.slots[self.index_of(name)?] {
            Slot::HasMany(container) => Ok(container),
            _ => Err(wrong_container(self.metadata(), name, "to-many")),
        }
    }

    pub(crate) fn has_many_mut(&mut self, name: &str) -> Result<&mut HasMany> {
        let index = self.index_of(name)?;
        let Self {
            slots, schema, kind, ..
        } = self;
        match &mut slots[index] {
            Slot::HasMany(container) => Ok(container),
            _ => Err(wrong_container(schema.entity(*kind), name, "to-many")),
        }
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.metadata()
            .properties
            .iter()
            .map(|p| p.name.as_str())
            .zip(self.slots.iter())
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }
}

fn wrong_container(metadata: &EntityMetadata, name: &str, expected: &str) -> Error {
    Error::InvalidInput(format!(
        "{}.{} is not a {} relationship",
        metadata.name, name, expected
    ))
}

/// Shared handle to an [`Entity`].
///
/// Equality is identity: two handles are equal when they point at the same
/// entity.
#[derive(Clone)]
pub struct EntityRef(Rc<RefCell<Entity>>);

/// Non-owning counterpart of [`EntityRef`].
#[derive(Clone, Debug, Default)]
pub struct WeakEntityRef(Weak<RefCell<Entity>>);

impl WeakEntityRef {
    /// Upgrade to a strong handle if the entity is still alive.
    pub fn upgrade(&self) -> Option<EntityRef> {
        self.0.upgrade().map(EntityRef)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EntityRef {}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(entity) => write!(f, "EntityRef({}{:?})", entity.metadata().name, entity.id()),
            Err(_) => f.write_str("EntityRef(<borrowed>)"),
        }
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        Self::new(entity)
    }
}

impl EntityRef {
    /// Wrap an entity.
    pub fn new(entity: Entity) -> Self {
        Self(Rc::new(RefCell::new(entity)))
    }

    /// Immutable access.
    pub fn borrow(&self) -> Ref<'_, Entity> {
        self.0.borrow()
    }

    /// Mutable access.
    pub fn borrow_mut(&self) -> RefMut<'_, Entity> {
        self.0.borrow_mut()
    }

    /// Immutable access, failing if the entity is mutably borrowed.
    pub fn try_borrow(&self) -> std::result::Result<Ref<'_, Entity>, BorrowError> {
        self.0.try_borrow()
    }

    /// Mutable access, failing if the entity is borrowed.
    pub fn try_borrow_mut(&self) -> std::result::Result<RefMut<'_, Entity>, BorrowMutError> {
        self.0.try_borrow_mut()
    }

    /// Same entity?
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakEntityRef {
        WeakEntityRef(Rc::downgrade(&self.0))
    }

    /// Entity kind.
    pub fn kind(&self) -> EntityKind {
        self.borrow().kind()
    }

    /// Current primary key values.
    pub fn id(&self) -> Vec<Value> {
        self.borrow().id()
    }

    /// Internal map key of the primary key.
    pub fn key(&self) -> String {
        self.borrow().key()
    }

    /// Has the entity been written to storage?
    pub fn is_persisted(&self) -> bool {
        self.borrow().is_persisted()
    }

    /// Is the entity or one property modified?
    pub fn is_modified(&self, name: Option<&str>) -> bool {
        self.borrow().is_modified(name)
    }

    /// Read a scalar property.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.borrow().get_scalar(name)
    }

    /// Write a scalar property.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.borrow_mut().set_scalar(name, value)
    }

    /// The single-column primary key, or an error for composite keys.
    pub(crate) fn single_id(&self) -> Result<Value> {
        let entity = self.borrow();
        match entity.id().as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(Error::InvalidInput(format!(
                "entity {} has a composite primary key; relationships need a single-column key",
                entity.metadata().name
            ))),
        }
    }

    pub(crate) fn orm(&self) -> Result<Rc<OrmContext>> {
        let entity = self.borrow();
        entity.orm().ok_or_else(|| {
            Error::InvalidInput(format!(
                "entity {} is not attached to an Orm",
                entity.metadata().name
            ))
        })
    }

    /// Read any property. To-one and to-many properties resolve lazily.
    pub fn get_value(&self, name: &str) -> Result<PropertyValue> {
        let kind = self.borrow().slot_kind(name)?;
        match kind {
            SlotKind::Scalar => self.get(name).map(PropertyValue::Scalar),
            SlotKind::ToOne => self.get_entity(name).map(PropertyValue::Entity),
            SlotKind::ToMany => self
                .collection(name)?
                .fetch_all()
                .map(PropertyValue::Collection),
        }
    }

    /// Write any property. The value shape must match the property.
    pub fn set_value(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let kind = self.borrow().slot_kind(name)?;
        match (kind, value.into()) {
            (SlotKind::Scalar, PropertyValue::Scalar(v)) => self.set(name, v),
            (SlotKind::ToOne, PropertyValue::Entity(target)) => {
                self.set_entity(name, target.as_ref()).map(|_| ())
            }
            (SlotKind::ToOne, PropertyValue::Scalar(Value::Null)) => {
                self.set_entity(name, None).map(|_| ())
            }
            (SlotKind::ToMany, PropertyValue::Collection(members)) => {
                self.set_collection(name, &members)
            }
            (kind, value) => Err(Error::InvalidInput(format!(
                "cannot assign {:?} to {:?} property '{}'",
                value, kind, name
            ))),
        }
    }

    /// Does the property hold a value? To-many properties always do.
    pub fn has_value(&self, name: &str) -> Result<bool> {
        let kind = self.borrow().slot_kind(name)?;
        match kind {
            SlotKind::Scalar => Ok(!self.get(name)?.is_null()),
            SlotKind::ToOne => self.has_entity(name),
            SlotKind::ToMany => Ok(true),
        }
    }

    /// Normalized value of a property.
    ///
    /// An unresolved to-one property whose key lives on the other side has
    /// nothing to report until its target is fetched, so it is fetched here.
    pub fn get_raw_value(&self, name: &str) -> Result<Value> {
        if self.needs_reverse_lookup(name)? {
            self.get_entity(name)?;
        }
        self.borrow().get_raw_value(name)
    }

    fn needs_reverse_lookup(&self, name: &str) -> Result<bool> {
        let entity = self.borrow();
        if entity.slot_kind(name)? != SlotKind::ToOne {
            return Ok(false);
        }
        let container = entity.has_one(name)?;
        Ok(!container.is_resolved()
            && container.primary_value().is_null()
            && !entity.schema.relationship(container.relationship()).stores_column())
    }

    /// Replace a normalized value without marking it modified.
    pub fn set_raw_value(&self, name: &str, value: Value) -> Result<()> {
        self.borrow_mut().set_raw_value(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{EntityDef, RelationshipMetadata, SchemaBuilder};

    fn schema() -> (Rc<Schema>, EntityKind, EntityKind) {
        let mut builder = SchemaBuilder::new();
        let author = builder.entity(EntityDef::new("Author", "authors").property("name"));
        let book = builder.entity(
            EntityDef::new("Book", "books")
                .property("title")
                .virtual_property("label"),
        );
        builder.relationship(
            RelationshipMetadata::many_has_one("author", book, author).reverse("books"),
        );
        builder.relationship(RelationshipMetadata::one_has_many(
            "books", author, book, "author",
        ));
        (Rc::new(builder.build().unwrap()), author, book)
    }

    #[test]
    fn test_new_entity_is_modified_and_not_persisted() {
        let (schema, _, book) = schema();
        let entity = Entity::new(schema, book);
        assert!(entity.is_modified(None));
        assert!(entity.is_modified(Some("title")));
        assert!(!entity.is_persisted());
        assert!(!entity.is_attached());
        assert_eq!(entity.id(), vec![Value::Null]);
    }

    #[test]
    fn test_hydrated_entity_is_clean() {
        let (schema, _, book) = schema();
        let entity = Entity::hydrate(
            schema,
            book,
            vec![
                ("id".into(), Value::BigInt(3)),
                ("title".into(), Value::from("Dune")),
                ("author".into(), Value::BigInt(1)),
                ("unknown".into(), Value::Int(0)),
            ],
        );
        assert!(!entity.is_modified(None));
        assert_eq!(entity.persisted_id(), Some(&[Value::BigInt(3)][..]));
        assert_eq!(entity.get_raw_value("author").unwrap(), Value::BigInt(1));
        assert_eq!(entity.key(), "3");
    }

    #[test]
    fn test_scalar_set_marks_column_modified() {
        let (schema, _, book) = schema();
        let mut entity = Entity::hydrate(schema, book, vec![("id".into(), Value::BigInt(3))]);
        entity.set_scalar("title", "Dune").unwrap();
        assert!(entity.is_modified(Some("title")));
        assert!(!entity.is_modified(Some("label")));
        assert!(entity.is_modified(None));

        entity.on_flush();
        assert!(!entity.is_modified(None));
        entity.set_scalar("title", "Dune").unwrap();
        assert!(!entity.is_modified(None));
    }

    #[test]
    fn test_persisted_primary_key_is_read_only() {
        let (schema, _, book) = schema();
        let mut entity = Entity::hydrate(schema, book, vec![("id".into(), Value::BigInt(3))]);
        assert!(matches!(
            entity.set_scalar("id", 4_i64),
            Err(Error::InvalidInput(_))
        ));
        entity.set_scalar("id", 3_i64).unwrap();
    }

    #[test]
    fn test_set_raw_value_does_not_dirty() {
        let (schema, _, book) = schema();
        let mut entity = Entity::hydrate(schema, book, vec![("id".into(), Value::BigInt(3))]);
        entity.set_raw_value("title", Value::from("x")).unwrap();
        entity.set_raw_value("author", Value::BigInt(9)).unwrap();
        assert!(!entity.is_modified(None));
        assert_eq!(entity.get_raw_value("author").unwrap(), Value::BigInt(9));
    }

    #[test]
    fn test_wrong_property_shapes() {
        let (schema, author, _) = schema();
        let entity = Entity::new(schema, author);
        assert!(entity.get_scalar("books").is_err());
        assert!(entity.get_raw_value("books").is_err());
        assert!(entity.get_scalar("missing").is_err());
        assert_eq!(entity.slot_kind("books").unwrap(), SlotKind::ToMany);
        assert!(entity.relationship_id("name").is_err());
    }

    #[test]
    fn test_on_persist_assigns_generated_id() {
        let (schema, _, book) = schema();
        let mut entity = Entity::new(schema, book);
        entity.set_scalar("title", "Dune").unwrap();
        entity.on_persist(vec![Value::BigInt(42)]);
        assert!(entity.is_persisted());
        assert!(!entity.is_modified(None));
        assert_eq!(entity.get_scalar("id").unwrap(), Value::BigInt(42));
    }

    #[test]
    fn test_entity_ref_identity_equality() {
        let (schema, _, book) = schema();
        let a = EntityRef::new(Entity::new(Rc::clone(&schema), book));
        let b = EntityRef::new(Entity::new(schema, book));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.downgrade().upgrade().unwrap().ptr_eq(&a));
    }

    #[test]
    fn test_generic_value_api_on_scalars() {
        let (schema, _, book) = schema();
        let entity = EntityRef::new(Entity::new(schema, book));
        assert!(!entity.has_value("title").unwrap());
        entity.set_value("title", Value::from("Dune")).unwrap();
        assert!(entity.has_value("title").unwrap());
        assert_eq!(
            entity.get_value("title").unwrap(),
            PropertyValue::Scalar(Value::from("Dune"))
        );
        assert!(entity.set_value("title", Vec::<EntityRef>::new()).is_err());
    }
}
