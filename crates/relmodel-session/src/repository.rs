//! Repositories: the entry point for loading and storing one entity kind.

use crate::entity::{Entity, EntityRef};
use crate::identity_map::IdentityMap;
use crate::mapper::{CollectionSource, DbalMapper};
use crate::orm::OrmContext;
use crate::preload::attach_preload;
use relmodel_core::{EntityKind, EntityMetadata, Error, Result, Row, Schema, Value};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Loads, hydrates and stores entities of one kind.
///
/// Every row is hydrated through the identity map, so one primary key maps
/// to one [`EntityRef`] for the lifetime of the [`Orm`](crate::Orm).
#[derive(Debug)]
pub struct Repository {
    kind: EntityKind,
    schema: Rc<Schema>,
    mapper: DbalMapper,
    identity_map: RefCell<IdentityMap>,
    orm: Weak<OrmContext>,
    preload_collections: bool,
}

impl Repository {
    pub(crate) fn new(
        kind: EntityKind,
        schema: Rc<Schema>,
        mapper: DbalMapper,
        orm: Weak<OrmContext>,
        preload_collections: bool,
    ) -> Self {
        Self {
            kind,
            schema,
            mapper,
            identity_map: RefCell::new(IdentityMap::new()),
            orm,
            preload_collections,
        }
    }

    /// Entity kind of this repository.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Metadata of the entity kind.
    pub fn metadata(&self) -> &EntityMetadata {
        self.schema.entity(self.kind)
    }

    /// The storage mapper.
    pub fn mapper(&self) -> &DbalMapper {
        &self.mapper
    }

    /// A new, unpersisted entity attached to this repository's `Orm`.
    pub fn create(&self) -> EntityRef {
        let mut entity = Entity::new(Rc::clone(&self.schema), self.kind);
        entity.attach(self.orm.clone());
        EntityRef::new(entity)
    }

    /// The entity of a storage row, reusing the mapped instance if there is one.
    pub fn hydrate_entity(&self, row: &Row) -> Result<EntityRef> {
        let data = self.mapper.storage_reflection().convert_storage_to_entity(row);
        let mut entity = Entity::hydrate(Rc::clone(&self.schema), self.kind, data);
        let id = entity.id();
        if id.iter().any(Value::is_null) {
            return Err(Error::InvalidInput(format!(
                "row of {} lacks its primary key",
                self.mapper.table_name()
            )));
        }
        if let Some(existing) = self.identity_map.borrow().get(&id) {
            return Ok(existing);
        }
        entity.attach(self.orm.clone());
        let entity = EntityRef::new(entity);
        self.identity_map.borrow_mut().replace(entity.clone());
        Ok(entity)
    }

    /// Entities of `source`, loaded as one preload batch.
    ///
    /// Accepts a query, fetched rows or a JSON array of row objects; any
    /// other JSON shape fails with [`Error::InvalidInput`].
    pub fn to_collection(&self, source: impl Into<CollectionSource>) -> Result<Vec<EntityRef>> {
        let rows = self.mapper.rows_from(source.into())?;
        let entities = rows
            .iter()
            .map(|row| self.hydrate_entity(row))
            .collect::<Result<Vec<_>>>()?;
        if self.preload_collections {
            attach_preload(&entities);
        }
        Ok(entities)
    }

    /// Entities selected by `query`.
    pub fn fetch(&self, query: relmodel_query::QueryBuilder) -> Result<Vec<EntityRef>> {
        self.to_collection(CollectionSource::Query(query))
    }

    /// Every entity of the table.
    #[tracing::instrument(level = "debug", skip(self), fields(table = %self.mapper.table_name()))]
    pub fn find_all(&self) -> Result<Vec<EntityRef>> {
        self.fetch(self.mapper.builder())
    }

    /// Entities whose properties equal the given values.
    pub fn find_by(&self, criteria: &[(&str, Value)]) -> Result<Vec<EntityRef>> {
        let mut query = self.mapper.builder();
        let reflection = self.mapper.storage_reflection();
        for (property, value) in criteria {
            self.metadata().require_property(property)?;
            let column = query.column(&reflection.convert_entity_to_storage_key(property));
            query.and_where_eq(&column, value.clone());
        }
        self.fetch(query)
    }

    /// The entity with primary key `id`, from the identity map when loaded.
    pub fn get_by_id(&self, id: &[Value]) -> Result<Option<EntityRef>> {
        let key_len = self.metadata().primary_key.len();
        if id.len() != key_len {
            return Err(Error::InvalidInput(format!(
                "{} expects a primary key of {} value(s), got {}",
                self.metadata().name,
                key_len,
                id.len()
            )));
        }
        if let Some(hit) = self.identity_map_get(id) {
            return Ok(Some(hit));
        }
        let mut query = self.mapper.builder();
        let columns = self.mapper.storage_reflection().storage_primary_key().to_vec();
        for (column, value) in columns.iter().zip(id) {
            let column = query.column(column);
            query.and_where_eq(&column, value.clone());
        }
        Ok(self.fetch(query)?.into_iter().next())
    }

    /// Write `entity` and map it under its stored identity.
    pub fn persist(&self, entity: &EntityRef) -> Result<Vec<Value>> {
        self.ensure_own(entity)?;
        let orm = self.orm.upgrade().ok_or_else(|| {
            Error::InvalidInput("repository outlived its Orm".to_string())
        })?;
        let id = self.mapper.persist(&orm, entity)?;
        {
            let mut borrowed = entity.borrow_mut();
            if !borrowed.is_attached() {
                borrowed.attach(self.orm.clone());
            }
            borrowed.on_persist(id.clone());
        }
        self.identity_map.borrow_mut().replace(entity.clone());
        Ok(id)
    }

    /// Delete `entity` and forget its identity.
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        self.ensure_own(entity)?;
        self.mapper.remove(entity)?;
        let mut borrowed = entity.borrow_mut();
        if let Some(id) = borrowed.persisted_id() {
            self.identity_map.borrow_mut().remove(id);
        }
        borrowed.on_remove();
        Ok(())
    }

    fn ensure_own(&self, entity: &EntityRef) -> Result<()> {
        let kind = entity.kind();
        if kind == self.kind {
            return Ok(());
        }
        Err(Error::InvalidInput(format!(
            "repository of {} cannot store an entity of kind {}",
            self.metadata().name,
            self.schema.entity(kind).name
        )))
    }

    /// The mapped instance of `id`.
    pub fn identity_map_get(&self, id: &[Value]) -> Option<EntityRef> {
        self.identity_map.borrow().get(id)
    }

    /// Number of mapped entities.
    pub fn identity_map_len(&self) -> usize {
        self.identity_map.borrow().len()
    }

    pub(crate) fn mapped_entities(&self) -> Vec<EntityRef> {
        self.identity_map.borrow().entities()
    }

    /// Forget every mapped entity, breaking the references between them.
    pub fn clear_identity_map(&self) {
        let entities = self.mapped_entities();
        self.identity_map.borrow_mut().clear();
        for entity in entities {
            if let Ok(mut entity) = entity.try_borrow_mut() {
                entity.clear_relationships();
            }
        }
    }
}
