//! The model: one repository per entity kind, wired to shared transactions.

use crate::config::MapperConfig;
use crate::entity::EntityRef;
use crate::mapper::DbalMapper;
use crate::repository::Repository;
use crate::resolver::RelationshipMapper;
use crate::transaction::{TransactionContext, TransactionRegistry};
use relmodel_core::{
    Connection, EntityKind, Error, RelationshipMetadata, Result, Schema, StorageReflection,
    UnderscoredStorageReflection, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Shared state behind an [`Orm`] handle.
///
/// Entities keep a weak reference to it, so resolving a relationship never
/// keeps the model alive.
pub struct OrmContext {
    schema: Rc<Schema>,
    config: MapperConfig,
    repositories: Vec<Repository>,
    transactions: Vec<Rc<TransactionContext>>,
}

impl fmt::Debug for OrmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrmContext")
            .field("config", &self.config)
            .field("repositories", &self.repositories.len())
            .field("transactions", &self.transactions)
            .finish_non_exhaustive()
    }
}

impl OrmContext {
    /// The schema every repository is built from.
    pub fn schema(&self) -> &Rc<Schema> {
        &self.schema
    }

    /// Mapper configuration.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Repository of an entity kind.
    ///
    /// Kinds outside this model's schema are rejected.
    pub fn repository(&self, kind: EntityKind) -> Result<&Repository> {
        self.repositories
            .get(kind.index())
            .ok_or_else(|| Error::InvalidInput(format!("entity kind {kind:?} is not mapped")))
    }

    /// Repository of an entity by name.
    pub fn repository_by_name(&self, name: &str) -> Result<&Repository> {
        self.schema
            .entity_by_name(name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity '{name}'")))
            .and_then(|kind| self.repository(kind))
    }

    /// Every repository, in entity kind order.
    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter()
    }

    /// One transaction context per distinct connection.
    pub fn transactions(&self) -> &[Rc<TransactionContext>] {
        &self.transactions
    }

    /// A new, unpersisted entity of `kind`.
    pub fn create(&self, kind: EntityKind) -> Result<EntityRef> {
        Ok(self.repository(kind)?.create())
    }

    /// The cached resolver for `relationship`.
    pub fn relationship_mapper(
        &self,
        relationship: &RelationshipMetadata,
    ) -> Result<Rc<dyn RelationshipMapper>> {
        self.repository(relationship.target)?
            .mapper()
            .relationship_mapper(self, relationship)
    }

    /// Write `entity` and the unsaved entities it depends on.
    ///
    /// Targets of stored foreign keys and new join-table members are written
    /// first; new members holding this entity's key are written after it, as
    /// are members changed through a non-main join table, whose own persist
    /// stores the link rows.
    /// Returns the identity of `entity`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn persist(&self, entity: &EntityRef) -> Result<Vec<Value>> {
        let mut visited = Vec::new();
        self.persist_cascade(entity, &mut visited)
    }

    fn persist_cascade(&self, entity: &EntityRef, visited: &mut Vec<EntityRef>) -> Result<Vec<Value>> {
        if visited.contains(entity) {
            return Ok(entity.id());
        }
        visited.push(entity.clone());
        let (before, after) = entity.borrow().cascade();
        for related in before.iter().filter(|e| needs_write(e)) {
            self.persist_cascade(related, visited)?;
        }
        let id = self.repository(entity.kind())?.persist(entity)?;
        for related in after.iter().filter(|e| needs_write(e)) {
            self.persist_cascade(related, visited)?;
        }
        Ok(id)
    }

    /// Delete `entity`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        self.repository(entity.kind())?.remove(entity)
    }

    /// Commit every open transaction and invalidate every relationship cache.
    ///
    /// Mapped entities return to a clean, not-fetched state.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn flush(&self) -> Result<()> {
        for repository in &self.repositories {
            repository.mapper().flush()?;
        }
        for repository in &self.repositories {
            for entity in repository.mapped_entities() {
                entity.borrow_mut().on_flush();
            }
        }
        Ok(())
    }

    /// Roll back every open transaction.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn rollback(&self) -> Result<()> {
        for repository in &self.repositories {
            repository.mapper().rollback()?;
        }
        Ok(())
    }

    /// Forget every loaded entity and resolver.
    pub fn clear(&self) {
        for repository in &self.repositories {
            repository.mapper().clear_relationship_mappers();
            repository.clear_identity_map();
        }
    }
}

impl Drop for OrmContext {
    fn drop(&mut self) {
        self.clear();
    }
}

fn needs_write(entity: &EntityRef) -> bool {
    let entity = entity.borrow();
    !entity.is_persisted() || entity.is_modified(None) || entity.has_pending_links()
}

/// Handle to a model of repositories.
///
/// Cloning shares the model.
///
/// # Example
///
/// ```rust,ignore
/// let orm = Orm::new(schema, connection);
/// let author = orm.repository(author_kind)?.get_by_id(&[Value::BigInt(1)])?;
/// ```
#[derive(Debug, Clone)]
pub struct Orm(Rc<OrmContext>);

impl Deref for Orm {
    type Target = OrmContext;

    fn deref(&self) -> &OrmContext {
        &self.0
    }
}

impl Orm {
    /// Model over `schema`, storing everything through `connection`.
    pub fn new(schema: impl Into<Rc<Schema>>, connection: Rc<dyn Connection>) -> Self {
        Self::builder(schema, connection).build()
    }

    /// Builder for per-kind connections, reflections and configuration.
    pub fn builder(schema: impl Into<Rc<Schema>>, connection: Rc<dyn Connection>) -> OrmBuilder {
        OrmBuilder {
            schema: schema.into(),
            connection,
            connections: HashMap::new(),
            reflections: HashMap::new(),
            config: MapperConfig::default(),
        }
    }

    /// The shared context.
    pub fn context(&self) -> &Rc<OrmContext> {
        &self.0
    }
}

/// Builder for an [`Orm`].
pub struct OrmBuilder {
    schema: Rc<Schema>,
    connection: Rc<dyn Connection>,
    connections: HashMap<EntityKind, Rc<dyn Connection>>,
    reflections: HashMap<EntityKind, Rc<dyn StorageReflection>>,
    config: MapperConfig,
}

impl fmt::Debug for OrmBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrmBuilder")
            .field("connections", &self.connections.len())
            .field("reflections", &self.reflections.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrmBuilder {
    /// Store `kind` through its own connection.
    #[must_use]
    pub fn connection_for(mut self, kind: EntityKind, connection: Rc<dyn Connection>) -> Self {
        self.connections.insert(kind, connection);
        self
    }

    /// Replace the default [`UnderscoredStorageReflection`] of `kind`.
    #[must_use]
    pub fn reflection(mut self, kind: EntityKind, reflection: Rc<dyn StorageReflection>) -> Self {
        self.reflections.insert(kind, reflection);
        self
    }

    /// Mapper configuration.
    #[must_use]
    pub fn config(mut self, config: MapperConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire one repository per entity kind.
    ///
    /// Kinds sharing a connection share its transaction context.
    pub fn build(self) -> Orm {
        let OrmBuilder {
            schema,
            connection,
            mut connections,
            mut reflections,
            config,
        } = self;

        let mut registry = TransactionRegistry::new();
        let mappers: Vec<DbalMapper> = schema
            .entities()
            .map(|metadata| {
                let kind = metadata.kind;
                let connection = connections
                    .remove(&kind)
                    .unwrap_or_else(|| Rc::clone(&connection));
                let reflection = reflections.remove(&kind).unwrap_or_else(|| {
                    Rc::new(UnderscoredStorageReflection::new(&schema, metadata))
                });
                let transaction = registry.context_for(&connection);
                DbalMapper::new(
                    kind,
                    Rc::clone(&schema),
                    reflection,
                    connection,
                    transaction,
                    config.clone(),
                )
            })
            .collect();
        let transactions: Vec<Rc<TransactionContext>> = registry.contexts().cloned().collect();
        tracing::debug!(
            entities = mappers.len(),
            connections = transactions.len(),
            "Building Orm"
        );

        let context = Rc::new_cyclic(|weak| OrmContext {
            repositories: mappers
                .into_iter()
                .map(|mapper| {
                    Repository::new(
                        mapper.kind(),
                        Rc::clone(&schema),
                        mapper,
                        weak.clone(),
                        config.preload_collections,
                    )
                })
                .collect(),
            schema: Rc::clone(&schema),
            config,
            transactions,
        });
        Orm(context)
    }
}
