//! Query handles over the members of a to-many property.

use crate::entity::EntityRef;
use crate::orm::OrmContext;
use relmodel_core::{RelationshipMetadata, Result, Value};
use relmodel_query::{OrderBy, QueryBuilder};

/// A view of one parent's to-many property.
///
/// The default collection reads through the container cache and merges
/// pending changes. Narrowing it with [`order_by`](Self::order_by),
/// [`filter_by`](Self::filter_by) or [`limit_by`](Self::limit_by) yields a new
/// collection that always asks the resolver and reflects storage only.
#[derive(Debug, Clone)]
pub struct RelationshipCollection {
    parent: EntityRef,
    property: String,
    relationship: RelationshipMetadata,
    query: Option<QueryBuilder>,
}

impl RelationshipCollection {
    pub(crate) fn new(
        parent: EntityRef,
        property: impl Into<String>,
        relationship: RelationshipMetadata,
    ) -> Self {
        Self {
            parent,
            property: property.into(),
            relationship,
            query: None,
        }
    }

    /// Owner of the property.
    pub fn parent(&self) -> &EntityRef {
        &self.parent
    }

    /// Property name on the parent.
    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn relationship(&self) -> &RelationshipMetadata {
        &self.relationship
    }

    /// Is this the unnarrowed collection?
    pub fn is_default(&self) -> bool {
        self.query.is_none()
    }

    /// The query members are selected with.
    pub fn query_builder(&self) -> Result<QueryBuilder> {
        let orm = self.parent.orm()?;
        self.base_query(&orm)
    }

    /// Add an ordering by a target property.
    pub fn order_by(&self, property: &str, descending: bool) -> Result<Self> {
        let orm = self.parent.orm()?;
        let mut query = self.base_query(&orm)?;
        let column = self.qualified(&orm, &query, property)?;
        query.order_by(if descending {
            OrderBy::desc(column)
        } else {
            OrderBy::asc(column)
        });
        Ok(self.narrowed(query))
    }

    /// Keep members whose properties equal the given values.
    pub fn filter_by(&self, conditions: &[(&str, Value)]) -> Result<Self> {
        let orm = self.parent.orm()?;
        let mut query = self.base_query(&orm)?;
        for (property, value) in conditions {
            let column = self.qualified(&orm, &query, property)?;
            query.and_where_eq(&column, value.clone());
        }
        Ok(self.narrowed(query))
    }

    /// Page through the members of each parent.
    pub fn limit_by(&self, limit: Option<u64>, offset: Option<u64>) -> Result<Self> {
        let orm = self.parent.orm()?;
        let mut query = self.base_query(&orm)?;
        query.limit_by(limit, offset);
        Ok(self.narrowed(query))
    }

    /// Every member, in query order.
    ///
    /// A parent that was never persisted has only its pending members.
    pub fn fetch_all(&self) -> Result<Vec<EntityRef>> {
        if !self.parent.is_persisted() {
            return self.pending_members();
        }
        if !self.is_default() {
            let orm = self.parent.orm()?;
            return self.resolve(&orm);
        }

        let cached = {
            let entity = self.parent.borrow();
            entity
                .has_many(&self.property)?
                .cached()
                .map(<[EntityRef]>::to_vec)
        };
        let members = match cached {
            Some(members) => members,
            None => {
                let orm = self.parent.orm()?;
                let fetched = self.resolve(&orm)?;
                self.parent
                    .borrow_mut()
                    .has_many_mut(&self.property)?
                    .set_fetched(fetched.clone());
                fetched
            }
        };
        let entity = self.parent.borrow();
        Ok(entity.has_many(&self.property)?.merged(members))
    }

    /// Number of members.
    ///
    /// Uses the cache when it is current and a count query otherwise.
    pub fn count(&self) -> Result<usize> {
        if !self.parent.is_persisted() {
            return Ok(self.pending_members()?.len());
        }
        if self.is_default() {
            let (has_pending, cached) = {
                let entity = self.parent.borrow();
                let container = entity.has_many(&self.property)?;
                (container.has_pending(), container.cached().map(<[EntityRef]>::len))
            };
            if has_pending {
                return Ok(self.fetch_all()?.len());
            }
            if let Some(len) = cached {
                return Ok(len);
            }
        }
        let orm = self.parent.orm()?;
        let query = self.base_query(&orm)?;
        let mapper = orm.relationship_mapper(&self.relationship)?;
        mapper.get_iterator_count(&orm, &self.parent, &query)
    }

    fn pending_members(&self) -> Result<Vec<EntityRef>> {
        let entity = self.parent.borrow();
        Ok(entity.has_many(&self.property)?.pending_adds().to_vec())
    }

    fn resolve(&self, orm: &OrmContext) -> Result<Vec<EntityRef>> {
        let query = self.base_query(orm)?;
        let mapper = orm.relationship_mapper(&self.relationship)?;
        Ok(mapper.get_iterator(orm, &self.parent, &query)?.collect())
    }

    fn narrowed(&self, query: QueryBuilder) -> Self {
        Self {
            query: Some(query),
            ..self.clone()
        }
    }

    fn base_query(&self, orm: &OrmContext) -> Result<QueryBuilder> {
        if let Some(query) = &self.query {
            return Ok(query.clone());
        }
        let mut query = orm.repository(self.relationship.target)?.mapper().builder();
        if let Some(order) = &self.relationship.order_by {
            let column = self.qualified(orm, &query, &order.property)?;
            query.order_by(if order.descending {
                OrderBy::desc(column)
            } else {
                OrderBy::asc(column)
            });
        }
        Ok(query)
    }

    fn qualified(&self, orm: &OrmContext, query: &QueryBuilder, property: &str) -> Result<String> {
        orm.schema()
            .entity(self.relationship.target)
            .require_property(property)?;
        let column = orm
            .repository(self.relationship.target)?
            .mapper()
            .storage_reflection()
            .convert_entity_to_storage_key(property);
        Ok(query.column(&column))
    }
}
