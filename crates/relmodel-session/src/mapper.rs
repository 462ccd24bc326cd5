//! The storage mapper of one entity kind.
//!
//! [`DbalMapper`] turns persistence operations into SQL against the
//! [`Connection`], joins the connection's shared [`TransactionContext`] on
//! every write, and owns the relationship resolvers targeting its entity kind.

use crate::config::MapperConfig;
use crate::entity::EntityRef;
use crate::fetch_cache::FetchCache;
use crate::orm::OrmContext;
use crate::resolver::{
    HasOneMapper, ManyHasManyMapper, OneHasManyMapper, OneHasOneDirectedMapper,
    RelationshipMapper, RelationshipMapperKind, link_table,
};
use crate::transaction::TransactionContext;
use relmodel_core::{
    Connection, EntityKind, Error, PropertyKind, RelationshipId, RelationshipKind,
    RelationshipMetadata, Result, Row, Schema, SchemaErrorKind, StorageReflection, Value,
};
use relmodel_query::{DeleteBuilder, InsertBuilder, QueryBuilder, UpdateBuilder};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

type MapperKey = (RelationshipId, RelationshipMapperKind);

/// Where [`to_collection`](crate::Repository::to_collection) reads rows from.
#[derive(Debug, Clone)]
pub enum CollectionSource {
    /// Run a query against the mapper's connection.
    Query(QueryBuilder),
    /// Rows already fetched.
    Rows(Vec<Row>),
    /// A JSON result set: an array of objects, one per row.
    Json(serde_json::Value),
}

impl From<QueryBuilder> for CollectionSource {
    fn from(query: QueryBuilder) -> Self {
        CollectionSource::Query(query)
    }
}

impl From<Vec<Row>> for CollectionSource {
    fn from(rows: Vec<Row>) -> Self {
        CollectionSource::Rows(rows)
    }
}

impl From<serde_json::Value> for CollectionSource {
    fn from(value: serde_json::Value) -> Self {
        CollectionSource::Json(value)
    }
}

/// Persistence coordinator and resolver factory for one entity kind.
pub struct DbalMapper {
    kind: EntityKind,
    schema: Rc<Schema>,
    reflection: Rc<dyn StorageReflection>,
    connection: Rc<dyn Connection>,
    transaction: Rc<TransactionContext>,
    config: MapperConfig,
    relationship_mappers: RefCell<HashMap<MapperKey, Rc<dyn RelationshipMapper>>>,
}

impl fmt::Debug for DbalMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbalMapper")
            .field("entity", &self.schema.entity(self.kind).name)
            .field("table", &self.table_name())
            .field("transaction", &self.transaction)
            .field("relationship_mappers", &self.relationship_mappers.borrow().len())
            .finish_non_exhaustive()
    }
}

impl DbalMapper {
    /// Mapper of `kind`, writing through `connection` inside `transaction`.
    pub fn new(
        kind: EntityKind,
        schema: Rc<Schema>,
        reflection: Rc<dyn StorageReflection>,
        connection: Rc<dyn Connection>,
        transaction: Rc<TransactionContext>,
        config: MapperConfig,
    ) -> Self {
        Self {
            kind,
            schema,
            reflection,
            connection,
            transaction,
            config,
            relationship_mappers: RefCell::new(HashMap::new()),
        }
    }

    /// Entity kind this mapper stores.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Backing table.
    pub fn table_name(&self) -> &str {
        self.reflection.storage_name()
    }

    /// Property/column naming of the entity kind.
    pub fn storage_reflection(&self) -> &Rc<dyn StorageReflection> {
        &self.reflection
    }

    /// The storage collaborator.
    pub fn connection(&self) -> &Rc<dyn Connection> {
        &self.connection
    }

    /// The transaction shared with every mapper on the same connection.
    pub fn transaction(&self) -> &Rc<TransactionContext> {
        &self.transaction
    }

    /// Base query over the table, aliased by its last dotted segment.
    pub fn builder(&self) -> QueryBuilder {
        QueryBuilder::new(self.table_name())
    }

    /// Run a statement and return its rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::trace!(sql = %sql, params = params.len(), "Executing query");
        self.connection.query(sql, params)
    }

    /// Run a write statement and return the rows affected.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql = %sql, params = params.len(), "Executing statement");
        self.connection.execute(sql, params)
    }

    /// Rows of `source`.
    ///
    /// JSON sources must be an array of objects; any other shape is rejected
    /// with [`Error::InvalidInput`].
    pub fn rows_from(&self, source: CollectionSource) -> Result<Vec<Row>> {
        match source {
            CollectionSource::Query(query) => {
                let (sql, params) = query.build();
                self.query(&sql, &params)
            }
            CollectionSource::Rows(rows) => Ok(rows),
            CollectionSource::Json(json) => json_rows(json),
        }
    }

    // == Relationship resolvers ==

    /// The resolver for `relationship`, whose target is this mapper's kind.
    ///
    /// Resolvers are built once per `(relationship, resolver kind)` and
    /// dropped on flush.
    pub fn relationship_mapper(
        &self,
        orm: &OrmContext,
        relationship: &RelationshipMetadata,
    ) -> Result<Rc<dyn RelationshipMapper>> {
        let kind = RelationshipMapperKind::for_relationship(relationship);
        let key = (relationship.id, kind);
        if let Some(mapper) = self.relationship_mappers.borrow().get(&key) {
            return Ok(Rc::clone(mapper));
        }
        tracing::debug!(
            relationship = %relationship.name,
            kind = ?kind,
            "Creating relationship mapper"
        );
        let mapper = self.create_relationship_mapper(orm, relationship, kind)?;
        self.relationship_mappers
            .borrow_mut()
            .insert(key, Rc::clone(&mapper));
        Ok(mapper)
    }

    fn create_relationship_mapper(
        &self,
        orm: &OrmContext,
        relationship: &RelationshipMetadata,
        kind: RelationshipMapperKind,
    ) -> Result<Rc<dyn RelationshipMapper>> {
        let cache = FetchCache::new(self.config.fetch_cache);
        let table = self.table_name().to_string();
        Ok(match kind {
            RelationshipMapperKind::HasOne => Rc::new(HasOneMapper::new(
                relationship.clone(),
                self.single_primary_key()?,
                cache,
            )),
            RelationshipMapperKind::OneHasMany => {
                Rc::new(self.one_has_many(relationship, table, cache)?)
            }
            RelationshipMapperKind::OneHasOneDirected => Rc::new(OneHasOneDirectedMapper::new(
                self.one_has_many(relationship, table, cache)?,
            )),
            RelationshipMapperKind::ManyHasMany => Rc::new(ManyHasManyMapper::new(
                relationship.clone(),
                link_table(orm, relationship)?,
                self.single_primary_key()?,
                table,
                cache,
                self.config.missing_target,
            )),
        })
    }

    fn one_has_many(
        &self,
        relationship: &RelationshipMetadata,
        table: String,
        cache: FetchCache,
    ) -> Result<OneHasManyMapper> {
        let reverse = relationship.reverse.as_deref().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::ReverseMismatch,
                format!(
                    "relationship '{}' needs the reverse property holding the foreign key",
                    relationship.name
                ),
            )
        })?;
        Ok(OneHasManyMapper::new(
            relationship.clone(),
            self.reflection.convert_entity_to_storage_key(reverse),
            self.reflection.storage_primary_key().to_vec(),
            table,
            cache,
            self.config.missing_target,
        ))
    }

    fn single_primary_key(&self) -> Result<String> {
        match self.reflection.storage_primary_key() {
            [column] => Ok(column.clone()),
            _ => Err(Error::InvalidInput(format!(
                "table {} has a composite primary key; relationships need a single-column key",
                self.table_name()
            ))),
        }
    }

    /// Drop every resolver together with its fetch cache.
    pub fn clear_relationship_mappers(&self) {
        let mappers: Vec<_> = self.relationship_mappers.borrow_mut().drain().collect();
        for (_, mapper) in mappers {
            mapper.clear_cache();
        }
    }

    // == Persistence ==

    /// Serialize `entity` into storage columns.
    ///
    /// Virtual properties and relationships owned by the other side or a join
    /// table are skipped. The primary key is left out when it is unassigned
    /// or the entity is already persisted.
    fn entity_to_storage(&self, entity: &EntityRef) -> Result<Vec<(String, Value)>> {
        let entity = entity.borrow();
        let metadata = entity.metadata();
        let mut data = Vec::with_capacity(metadata.properties.len());
        for property in &metadata.properties {
            match property.kind {
                PropertyKind::Virtual => continue,
                PropertyKind::Relationship(id) if !self.schema.relationship(id).stores_column() => {
                    continue;
                }
                _ => {}
            }
            data.push((property.name.clone(), entity.get_raw_value(&property.name)?));
        }
        if entity.is_persisted() || entity.id().iter().all(Value::is_null) {
            data.retain(|(name, _)| !metadata.primary_key.contains(name));
        }
        Ok(self.reflection.convert_entity_to_storage(data))
    }

    /// Open the shared transaction unless it is already open.
    pub fn begin_transaction(&self) -> Result<()> {
        self.transaction.begin()
    }

    /// Insert or update `entity` and write its pending join-table changes.
    ///
    /// Returns the identity of the stored row.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table_name()))]
    pub fn persist(&self, orm: &OrmContext, entity: &EntityRef) -> Result<Vec<Value>> {
        self.begin_transaction()?;
        let data = self.entity_to_storage(entity)?;
        let persisted_id = entity.borrow().persisted_id().map(<[Value]>::to_vec);
        let id = match persisted_id {
            None => self.insert(entity, data)?,
            Some(persisted_id) => {
                self.update(data, persisted_id)?;
                entity.id()
            }
        };
        self.persist_links(orm, entity, &id)?;
        Ok(id)
    }

    fn insert(&self, entity: &EntityRef, data: Vec<(String, Value)>) -> Result<Vec<Value>> {
        let id = entity.id();
        let (sql, params) = InsertBuilder::new(self.table_name()).values(data).build();
        self.execute(&sql, &params)?;
        if id.iter().all(|value| !value.is_null()) {
            return Ok(id);
        }
        match id.as_slice() {
            [_] => {
                let generated = self
                    .connection
                    .last_inserted_id(self.reflection.primary_sequence_name())?;
                tracing::debug!(table = %self.table_name(), id = %generated, "Read generated identity");
                Ok(vec![generated])
            }
            _ => Err(Error::InvalidInput(format!(
                "composite primary key of {} must be assigned before insert",
                self.table_name()
            ))),
        }
    }

    fn update(&self, data: Vec<(String, Value)>, persisted_id: Vec<Value>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let primary: Vec<(String, Value)> = self
            .reflection
            .storage_primary_key()
            .iter()
            .cloned()
            .zip(persisted_id)
            .collect();
        let (sql, params) = UpdateBuilder::new(self.table_name())
            .set(data)
            .filter(primary)
            .build();
        self.execute(&sql, &params)?;
        Ok(())
    }

    fn persist_links(&self, orm: &OrmContext, entity: &EntityRef, id: &[Value]) -> Result<()> {
        let pending: Vec<(String, RelationshipMetadata, Vec<EntityRef>, Vec<EntityRef>)> = {
            let entity = entity.borrow();
            let mut pending = Vec::new();
            for property in &entity.metadata().properties {
                let PropertyKind::Relationship(rel_id) = property.kind else {
                    continue;
                };
                let relationship = self.schema.relationship(rel_id);
                if relationship.kind != RelationshipKind::ManyHasMany || !relationship.is_main {
                    continue;
                }
                let container = entity.has_many(&property.name)?;
                if container.has_pending() {
                    pending.push((
                        property.name.clone(),
                        relationship.clone(),
                        container.pending_adds().to_vec(),
                        container.pending_removes().to_vec(),
                    ));
                }
            }
            pending
        };
        if pending.is_empty() {
            return Ok(());
        }

        let local = match id {
            [local] if !local.is_null() => local.clone(),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "join table rows of {} need a single-column primary key",
                    self.table_name()
                )));
            }
        };
        for (name, relationship, adds, removes) in pending {
            let link = link_table(orm, &relationship)?;
            for member in &removes {
                let (sql, params) = DeleteBuilder::new(&link.table_name)
                    .filter(vec![
                        (link.local_column.clone(), local.clone()),
                        (link.remote_column.clone(), member_id(member)?),
                    ])
                    .build();
                self.execute(&sql, &params)?;
            }
            for member in &adds {
                let (sql, params) = InsertBuilder::new(&link.table_name)
                    .values(vec![
                        (link.local_column.clone(), local.clone()),
                        (link.remote_column.clone(), member_id(member)?),
                    ])
                    .build();
                self.execute(&sql, &params)?;
            }
            tracing::debug!(
                relationship = %name,
                added = adds.len(),
                removed = removes.len(),
                "Wrote join table rows"
            );
            entity.borrow_mut().has_many_mut(&name)?.commit_pending();
        }
        Ok(())
    }

    /// Delete the row of a persisted entity.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table_name()))]
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        let persisted_id = entity.borrow().persisted_id().map(<[Value]>::to_vec);
        let Some(persisted_id) = persisted_id else {
            return Err(Error::InvalidInput(format!(
                "cannot remove an unpersisted entity from {}",
                self.table_name()
            )));
        };
        self.begin_transaction()?;
        let primary: Vec<(String, Value)> = self
            .reflection
            .storage_primary_key()
            .iter()
            .cloned()
            .zip(persisted_id)
            .collect();
        let (sql, params) = DeleteBuilder::new(self.table_name()).filter(primary).build();
        self.execute(&sql, &params)?;
        Ok(())
    }

    /// Drop the resolvers and commit the shared transaction if it is open.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table_name()))]
    pub fn flush(&self) -> Result<()> {
        self.clear_relationship_mappers();
        self.transaction.commit()?;
        Ok(())
    }

    /// Roll back the shared transaction if it is open.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %self.table_name()))]
    pub fn rollback(&self) -> Result<()> {
        self.transaction.rollback()?;
        Ok(())
    }
}

fn member_id(member: &EntityRef) -> Result<Value> {
    let id = member.single_id()?;
    if id.is_null() || !member.is_persisted() {
        return Err(Error::InvalidInput(
            "join table members must be persisted first".to_string(),
        ));
    }
    Ok(id)
}

fn json_rows(json: serde_json::Value) -> Result<Vec<Row>> {
    let serde_json::Value::Array(items) = json else {
        return Err(Error::InvalidInput(format!(
            "cannot build a collection from JSON {}",
            json_type(&json)
        )));
    };
    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::Object(fields) => Ok(Row::from_pairs(
                fields.into_iter().map(|(column, value)| (column, json_scalar(value))),
            )),
            other => Err(Error::InvalidInput(format!(
                "collection rows must be JSON objects, got {}",
                json_type(&other)
            ))),
        })
        .collect()
}

fn json_scalar(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::BigInt(i),
            None => n.as_f64().map_or(Value::Null, Value::Double),
        },
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::transaction::TransactionState;
    use relmodel_core::{EntityDef, SchemaBuilder, UnderscoredStorageReflection};
    use serde_json::json;
    use std::cell::Cell;

    #[derive(Default)]
    struct Recorder {
        statements: RefCell<Vec<(String, Vec<Value>)>>,
        begins: Cell<usize>,
    }

    impl Connection for Recorder {
        fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            self.statements
                .borrow_mut()
                .push((sql.to_string(), params.to_vec()));
            Ok(Vec::new())
        }

        fn begin_transaction(&self) -> Result<()> {
            self.begins.set(self.begins.get() + 1);
            Ok(())
        }

        fn commit_transaction(&self) -> Result<()> {
            Ok(())
        }

        fn rollback_transaction(&self) -> Result<()> {
            Ok(())
        }

        fn last_inserted_id(&self, _sequence: Option<&str>) -> Result<Value> {
            Ok(Value::BigInt(11))
        }
    }

    struct Fixture {
        schema: Rc<Schema>,
        book: EntityKind,
        recorder: Rc<Recorder>,
        mapper: DbalMapper,
    }

    fn fixture() -> Fixture {
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
        let schema = Rc::new(builder.build().unwrap());
        let recorder = Rc::new(Recorder::default());
        let connection: Rc<dyn Connection> = recorder.clone();
        let reflection = Rc::new(UnderscoredStorageReflection::new(&schema, schema.entity(book)));
        let mapper = DbalMapper::new(
            book,
            Rc::clone(&schema),
            reflection,
            Rc::clone(&connection),
            Rc::new(TransactionContext::new(connection)),
            MapperConfig::default(),
        );
        Fixture {
            schema,
            book,
            recorder,
            mapper,
        }
    }

    #[test]
    fn test_serialization_skips_virtual_and_unassigned_key() {
        let f = fixture();
        let book = EntityRef::new(Entity::new(Rc::clone(&f.schema), f.book));
        book.set("title", "Dune").unwrap();
        book.set("label", "ignored").unwrap();
        let data = f.mapper.entity_to_storage(&book).unwrap();
        assert_eq!(
            data,
            vec![
                ("title".to_string(), Value::from("Dune")),
                ("author_id".to_string(), Value::Null),
            ]
        );
    }

    #[test]
    fn test_serialization_keeps_preset_key_of_new_entity() {
        let f = fixture();
        let book = EntityRef::new(Entity::new(Rc::clone(&f.schema), f.book));
        book.set("id", 5_i64).unwrap();
        let data = f.mapper.entity_to_storage(&book).unwrap();
        assert_eq!(data[0], ("id".to_string(), Value::BigInt(5)));
    }

    #[test]
    fn test_remove_requires_persisted_entity() {
        let f = fixture();
        let book = EntityRef::new(Entity::new(Rc::clone(&f.schema), f.book));
        assert!(matches!(f.mapper.remove(&book), Err(Error::InvalidInput(_))));
        assert_eq!(f.recorder.begins.get(), 0);
    }

    #[test]
    fn test_remove_deletes_by_persisted_key_inside_transaction() {
        let f = fixture();
        let book = EntityRef::new(Entity::hydrate(
            Rc::clone(&f.schema),
            f.book,
            vec![("id".into(), Value::BigInt(3))],
        ));
        f.mapper.remove(&book).unwrap();
        f.mapper.remove(&book).unwrap();
        assert_eq!(f.recorder.begins.get(), 1);
        assert_eq!(f.mapper.transaction().state(), TransactionState::Open);
        let statements = f.recorder.statements.borrow();
        assert_eq!(statements[0].0, "DELETE FROM \"books\" WHERE \"id\" = ?");
        assert_eq!(statements[0].1, vec![Value::BigInt(3)]);

        drop(statements);
        f.mapper.rollback().unwrap();
        assert_eq!(f.mapper.transaction().state(), TransactionState::Idle);
    }

    #[test]
    fn test_rows_from_json_array() {
        let f = fixture();
        let rows = f
            .mapper
            .rows_from(CollectionSource::Json(json!([
                {"id": 1, "title": "Dune", "score": 4.5, "draft": false, "author_id": null},
                {"id": 2, "title": "Emma", "tags": ["a"]}
            ])))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("id"), Some(&Value::BigInt(1)));
        assert_eq!(rows[0].get_by_name("score"), Some(&Value::Double(4.5)));
        assert_eq!(rows[0].get_by_name("draft"), Some(&Value::Bool(false)));
        assert_eq!(rows[0].get_by_name("author_id"), Some(&Value::Null));
        assert_eq!(rows[1].get_by_name("tags"), Some(&Value::Json(json!(["a"]))));
    }

    #[test]
    fn test_rows_from_rejects_other_json() {
        let f = fixture();
        for source in [json!("rows"), json!({"id": 1}), json!([1, 2])] {
            assert!(matches!(
                f.mapper.rows_from(CollectionSource::Json(source)),
                Err(Error::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_rows_from_query_runs_it() {
        let f = fixture();
        let mut query = f.mapper.builder();
        query.and_where_eq("books.id", Value::BigInt(1));
        assert!(f.mapper.rows_from(query.into()).unwrap().is_empty());
        let statements = f.recorder.statements.borrow();
        assert_eq!(
            statements[0].0,
            "SELECT \"books\".* FROM \"books\" WHERE \"books\".\"id\" = ?"
        );
    }
}
