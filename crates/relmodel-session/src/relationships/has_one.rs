//! To-one containers and the to-one half of the entity relationship API.

use super::{ContainerState, SyncState, ensure_kind};
use crate::entity::EntityRef;
use relmodel_core::{Error, RelationshipId, RelationshipKind, RelationshipMetadata, Result, Value};

/// Container of a to-one property (many-has-one or one-has-one-directed).
#[derive(Debug)]
pub struct HasOne {
    relationship: RelationshipId,
    primary_value: Value,
    value: Option<Option<EntityRef>>,
    modified: bool,
    sync: SyncState,
}

impl HasOne {
    pub(crate) fn new(relationship: RelationshipId) -> Self {
        Self {
            relationship,
            primary_value: Value::Null,
            value: None,
            modified: false,
            sync: SyncState::Idle,
        }
    }

    /// Relationship descriptor of the property.
    pub fn relationship(&self) -> RelationshipId {
        self.relationship
    }

    /// Lifecycle state.
    pub fn state(&self) -> ContainerState {
        match (&self.value, self.modified) {
            (None, false) => ContainerState::Unresolved,
            (_, true) => ContainerState::Modified,
            (Some(_), false) => ContainerState::Clean,
        }
    }

    /// Has the target been read or set?
    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }

    /// Changed since the last flush?
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Re-entrancy guard.
    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    /// Foreign key of the target: the live key of a resolved target, else the
    /// key loaded from storage.
    pub fn raw_value(&self) -> Value {
        if let Some(Some(target)) = &self.value {
            if let Ok(target) = target.try_borrow() {
                if let [id] = target.id().as_slice() {
                    return id.clone();
                }
            }
        }
        self.primary_value.clone()
    }

    pub(crate) fn primary_value(&self) -> &Value {
        &self.primary_value
    }

    pub(crate) fn resolved(&self) -> Option<Option<EntityRef>> {
        self.value.clone()
    }

    pub(crate) fn set_raw_value(&mut self, value: Value) {
        self.primary_value = value;
        self.value = None;
    }

    pub(crate) fn set_resolved(&mut self, target: Option<EntityRef>) {
        self.primary_value = match &target {
            Some(target) => match target.try_borrow() {
                Ok(entity) => match entity.id().as_slice() {
                    [id] => id.clone(),
                    _ => Value::Null,
                },
                // self-reference, the entity is being written
                Err(_) => self.primary_value.clone(),
            },
            None => Value::Null,
        };
        self.value = Some(target);
    }

    pub(crate) fn sync_mut(&mut self) -> &mut SyncState {
        &mut self.sync
    }

    pub(crate) fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub(crate) fn reset_modified(&mut self) {
        self.modified = false;
    }

    /// Forget the resolved target but keep the foreign key.
    pub(crate) fn unload(&mut self) {
        if let Some(Some(_)) = &self.value {
            self.primary_value = self.raw_value();
        }
        self.value = None;
    }
}

impl EntityRef {
    fn to_one_metadata(&self, name: &str) -> Result<RelationshipMetadata> {
        let entity = self.borrow();
        let id = entity.has_one(name)?.relationship();
        Ok(entity.schema().relationship(id).clone())
    }

    /// Target of a to-one property, fetched on first read.
    ///
    /// A foreign key already present in the target's identity map resolves
    /// without a query. Otherwise the whole preload batch is resolved at once.
    pub fn get_entity(&self, name: &str) -> Result<Option<EntityRef>> {
        let (resolved, primary) = {
            let entity = self.borrow();
            let container = entity.has_one(name)?;
            (container.resolved(), container.primary_value().clone())
        };
        if let Some(target) = resolved {
            return Ok(target);
        }

        let rel = self.to_one_metadata(name)?;
        let target = self.fetch_to_one(&rel, &primary)?;
        self.borrow_mut()
            .has_one_mut(name)?
            .set_resolved(target.clone());
        self.guarded_init_reverse(name, &rel, target.as_ref())?;
        Ok(target)
    }

    fn fetch_to_one(&self, rel: &RelationshipMetadata, primary: &Value) -> Result<Option<EntityRef>> {
        let stores_column = rel.stores_column();
        if stores_column && primary.is_null() {
            return Ok(None);
        }
        if !stores_column && !self.is_persisted() {
            return Ok(None);
        }
        let orm = self.orm()?;
        let repository = orm.repository(rel.target)?;
        if stores_column {
            if let Some(hit) = repository.identity_map_get(std::slice::from_ref(primary)) {
                return Ok(Some(hit));
            }
        }
        let mapper = orm.relationship_mapper(rel)?;
        let query = repository.mapper().builder();
        let mut iterator = mapper.get_iterator(&orm, self, &query)?;
        Ok(iterator.next())
    }

    /// Does the to-one property point at an entity?
    ///
    /// The non-main side of a one-to-one relationship has to resolve to know.
    pub fn has_entity(&self, name: &str) -> Result<bool> {
        let rel = self.to_one_metadata(name)?;
        {
            let entity = self.borrow();
            let container = entity.has_one(name)?;
            if let Some(target) = container.resolved() {
                return Ok(target.is_some());
            }
            if rel.stores_column() {
                return Ok(!container.primary_value().is_null());
            }
        }
        Ok(self.get_entity(name)?.is_some())
    }

    /// Point a to-one property at `target` (or at nothing).
    ///
    /// When the target changes, the reverse property is updated: for a
    /// many-has-one the entity leaves the old target's collection and joins
    /// the new one, for a one-to-one both old and new targets are re-pointed.
    /// Returns whether the value changed. Calls arriving while this container
    /// propagates a change are ignored and return `false`.
    pub fn set_entity(&self, name: &str, target: Option<&EntityRef>) -> Result<bool> {
        let (resolved, attached) = {
            let entity = self.borrow();
            let container = entity.has_one(name)?;
            if container.sync_state().is_propagating() {
                return Ok(false);
            }
            (container.resolved(), entity.is_attached())
        };
        let rel = self.to_one_metadata(name)?;
        if let Some(target) = target {
            ensure_kind(target, rel.target, name)?;
        }

        let old = match resolved {
            Some(old) => old,
            None if attached => self.get_entity(name)?,
            None => None,
        };
        let changed = match (&old, target) {
            (Some(old), Some(new)) => !old.ptr_eq(new),
            (None, None) => false,
            _ => true,
        };

        {
            let mut entity = self.borrow_mut();
            let container = entity.has_one_mut(name)?;
            container.sync_mut().begin();
            if changed {
                container.mark_modified();
                if rel.stores_column() {
                    entity.set_as_modified(Some(name));
                }
            }
        }

        let result = if changed {
            self.update_reverse(&rel, old.as_ref(), target)
        } else {
            self.init_reverse(&rel, target)
        };

        let mut entity = self.borrow_mut();
        let container = entity.has_one_mut(name)?;
        container.sync_mut().end();
        result?;
        container.set_resolved(target.cloned());
        Ok(changed)
    }

    fn update_reverse(
        &self,
        rel: &RelationshipMetadata,
        old: Option<&EntityRef>,
        new: Option<&EntityRef>,
    ) -> Result<()> {
        let Some(reverse) = rel.reverse.as_deref() else {
            return Ok(());
        };
        match rel.kind {
            RelationshipKind::ManyHasOne => {
                if let Some(old) = old {
                    old.remove(reverse, self)?;
                }
                if let Some(new) = new {
                    new.add(reverse, self)?;
                }
            }
            RelationshipKind::OneHasOneDirected => {
                if let Some(old) = old {
                    old.set_entity(reverse, None)?;
                }
                if let Some(new) = new {
                    new.set_entity(reverse, Some(self))?;
                }
            }
            RelationshipKind::OneHasMany | RelationshipKind::ManyHasMany => {}
        }
        Ok(())
    }

    fn init_reverse(&self, rel: &RelationshipMetadata, target: Option<&EntityRef>) -> Result<()> {
        let (Some(reverse), Some(target)) = (rel.reverse.as_deref(), target) else {
            return Ok(());
        };
        match rel.kind {
            RelationshipKind::ManyHasOne => target.init_member(reverse, self),
            RelationshipKind::OneHasOneDirected => target.init_entity(reverse, self),
            RelationshipKind::OneHasMany | RelationshipKind::ManyHasMany => Ok(()),
        }
    }

    fn guarded_init_reverse(
        &self,
        name: &str,
        rel: &RelationshipMetadata,
        target: Option<&EntityRef>,
    ) -> Result<()> {
        if !self.borrow_mut().has_one_mut(name)?.sync_mut().begin() {
            return Ok(());
        }
        let result = self.init_reverse(rel, target);
        self.borrow_mut().has_one_mut(name)?.sync_mut().end();
        result
    }

    /// One-shot initialization of a to-one property from its reverse side.
    ///
    /// Nothing is marked modified and nothing propagates. A property the
    /// caller already re-pointed keeps its pending value.
    pub(crate) fn init_entity(&self, name: &str, target: &EntityRef) -> Result<()> {
        let mut entity = self.borrow_mut();
        let container = entity.has_one_mut(name)?;
        if container.sync_state().is_propagating() {
            return Ok(());
        }
        if container.is_modified() && container.is_resolved() {
            return Ok(());
        }
        container.set_resolved(Some(target.clone()));
        Ok(())
    }

    /// Lifecycle state of any relationship property.
    pub fn relationship_state(&self, name: &str) -> Result<ContainerState> {
        let entity = self.borrow();
        if let Ok(container) = entity.has_one(name) {
            return Ok(container.state());
        }
        match entity.has_many(name) {
            Ok(container) => Ok(container.state()),
            Err(_) => Err(Error::InvalidInput(format!(
                "{}.{} is not a relationship",
                entity.metadata().name,
                name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use relmodel_core::{EntityDef, EntityKind, Schema, SchemaBuilder};
    use std::rc::Rc;

    struct Fixture {
        schema: Rc<Schema>,
        person: EntityKind,
        passport: EntityKind,
    }

    fn fixture() -> Fixture {
        let mut builder = SchemaBuilder::new();
        let person = builder.entity(EntityDef::new("Person", "people"));
        let passport = builder.entity(EntityDef::new("Passport", "passports"));
        builder.relationship(
            RelationshipMetadata::one_has_one_directed("passport", person, passport)
                .reverse("holder"),
        );
        builder.relationship(
            RelationshipMetadata::one_has_one_directed("holder", passport, person)
                .reverse("passport")
                .main(true),
        );
        Fixture {
            schema: Rc::new(builder.build().unwrap()),
            person,
            passport,
        }
    }

    fn new_entity(f: &Fixture, kind: EntityKind) -> EntityRef {
        EntityRef::new(Entity::new(Rc::clone(&f.schema), kind))
    }

    #[test]
    fn test_one_to_one_sync_is_symmetric() {
        let f = fixture();
        let alice = new_entity(&f, f.person);
        let doc = new_entity(&f, f.passport);

        assert!(doc.set_entity("holder", Some(&alice)).unwrap());
        assert_eq!(alice.get_entity("passport").unwrap(), Some(doc.clone()));
        assert_eq!(doc.get_entity("holder").unwrap(), Some(alice.clone()));

        // only the main side stores a column
        assert!(doc.is_modified(Some("holder")));
        assert_eq!(alice.relationship_state("passport").unwrap(), ContainerState::Modified);
        assert!(alice.borrow().has_one("passport").unwrap().sync_state() == SyncState::Idle);
    }

    #[test]
    fn test_one_to_one_repoint_detaches_old_partner() {
        let f = fixture();
        let alice = new_entity(&f, f.person);
        let bob = new_entity(&f, f.person);
        let doc = new_entity(&f, f.passport);

        doc.set_entity("holder", Some(&alice)).unwrap();
        alice.set_entity("passport", None).unwrap();
        assert_eq!(doc.get_entity("holder").unwrap(), None);

        bob.set_entity("passport", Some(&doc)).unwrap();
        assert_eq!(doc.get_entity("holder").unwrap(), Some(bob.clone()));
        assert_eq!(alice.get_entity("passport").unwrap(), None);
    }

    #[test]
    fn test_setting_same_value_is_not_a_change() {
        let f = fixture();
        let alice = new_entity(&f, f.person);
        let doc = new_entity(&f, f.passport);
        assert!(doc.set_entity("holder", Some(&alice)).unwrap());
        assert!(!doc.set_entity("holder", Some(&alice)).unwrap());
        assert!(doc.set_entity("passport", None).is_err());
    }

    #[test]
    fn test_wrong_target_kind_is_rejected() {
        let f = fixture();
        let alice = new_entity(&f, f.person);
        let bob = new_entity(&f, f.person);
        assert!(matches!(
            alice.set_entity("passport", Some(&bob)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_state_machine() {
        let f = fixture();
        let alice = new_entity(&f, f.person);
        assert_eq!(
            alice.relationship_state("passport").unwrap(),
            ContainerState::Unresolved
        );
        assert_eq!(alice.get_entity("passport").unwrap(), None);
        assert_eq!(alice.relationship_state("passport").unwrap(), ContainerState::Clean);

        let doc = new_entity(&f, f.passport);
        alice.set_entity("passport", Some(&doc)).unwrap();
        assert_eq!(alice.relationship_state("passport").unwrap(), ContainerState::Modified);

        alice.borrow_mut().on_flush();
        assert_eq!(alice.relationship_state("passport").unwrap(), ContainerState::Clean);
    }

    #[test]
    fn test_init_entity_does_not_dirty() {
        let f = fixture();
        let alice = new_entity(&f, f.person);
        let doc = new_entity(&f, f.passport);
        alice.borrow_mut().on_flush();
        doc.init_entity("holder", &alice).unwrap();
        assert_eq!(doc.relationship_state("holder").unwrap(), ContainerState::Clean);
        assert_eq!(alice.relationship_state("passport").unwrap(), ContainerState::Unresolved);
    }

    #[test]
    fn test_raw_value_follows_target_identity() {
        let f = fixture();
        let alice = new_entity(&f, f.person);
        let doc = new_entity(&f, f.passport);
        doc.set_entity("holder", Some(&alice)).unwrap();
        assert_eq!(doc.get_raw_value("holder").unwrap(), Value::Null);
        alice.borrow_mut().on_persist(vec![Value::BigInt(5)]);
        assert_eq!(doc.get_raw_value("holder").unwrap(), Value::BigInt(5));
    }
}
