//! Lazy batched relationship resolvers.
//!
//! A resolver answers "which entities does this parent relate to" for one
//! relationship descriptor. Instead of querying per parent it resolves the
//! whole preload batch the parent was loaded with, memoizes the grouping under
//! a fingerprint of query and batch, and hands out per-parent views.
//!
//! | Resolver | Relationships | Batch |
//! |----------|---------------|-------|
//! | [`HasOneMapper`] | many-has-one, main one-has-one-directed | foreign keys of the batch |
//! | [`OneHasOneDirectedMapper`] | non-main one-has-one-directed | parent keys |
//! | [`OneHasManyMapper`] | one-has-many | parent keys |
//! | [`ManyHasManyMapper`] | many-has-many | parent keys, through the join table |

mod has_one;
mod many_has_many;
mod one_has_many;
mod one_has_one_directed;

pub use has_one::HasOneMapper;
pub use many_has_many::ManyHasManyMapper;
pub use one_has_many::OneHasManyMapper;
pub use one_has_one_directed::OneHasOneDirectedMapper;

pub(crate) use many_has_many::link_table;

use crate::config::MissingTargetPolicy;
use crate::entity::EntityRef;
use crate::iterator::{EntityIterator, Grouping};
use crate::orm::OrmContext;
use crate::preload::attach_preload;
use relmodel_core::{
    EntityKind, IntegrityError, RelationshipKind, RelationshipMetadata, Result, Row, Value,
    composite_key,
};
use relmodel_query::QueryBuilder;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Resolves one relationship descriptor for parents of its source kind.
pub trait RelationshipMapper: fmt::Debug {
    /// Related entities of `parent`, selected by `query`.
    fn get_iterator(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<EntityIterator>;

    /// Number of related entities of `parent`, selected by `query`.
    fn get_iterator_count(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<usize>;

    /// Drop every memoized grouping and count.
    fn clear_cache(&self);
}

/// Resolver flavour; together with the descriptor id it keys the mapper cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipMapperKind {
    /// Target by the foreign key stored on the parent.
    HasOne,
    /// Target holding the foreign key of a one-to-one relationship.
    OneHasOneDirected,
    /// Targets holding the foreign key.
    OneHasMany,
    /// Targets through a join table.
    ManyHasMany,
}

impl RelationshipMapperKind {
    /// The resolver a relationship needs.
    pub fn for_relationship(relationship: &RelationshipMetadata) -> Self {
        match relationship.kind {
            RelationshipKind::ManyHasOne => Self::HasOne,
            RelationshipKind::OneHasOneDirected if relationship.is_main => Self::HasOne,
            RelationshipKind::OneHasOneDirected => Self::OneHasOneDirected,
            RelationshipKind::OneHasMany => Self::OneHasMany,
            RelationshipKind::ManyHasMany => Self::ManyHasMany,
        }
    }
}

/// Keys of the parents resolved together, in batch order.
#[derive(Debug, Default)]
pub(crate) struct ParentBatch {
    pub(crate) values: Vec<Value>,
    pub(crate) parents: HashMap<String, EntityRef>,
}

impl ParentBatch {
    /// The persisted parents of `parent`'s preload batch, `parent` included.
    ///
    /// Parents with composite keys cannot head a to-many relationship.
    pub(crate) fn of(parent: &EntityRef) -> Result<Self> {
        parent.single_id()?;
        let siblings = parent
            .borrow()
            .preload_container()
            .map(|container| container.entities())
            .unwrap_or_default();

        let mut batch = Self::default();
        for entity in siblings.into_iter().chain(std::iter::once(parent.clone())) {
            let id = {
                let Ok(borrowed) = entity.try_borrow() else {
                    continue;
                };
                if !borrowed.is_persisted() {
                    continue;
                }
                match borrowed.id().as_slice() {
                    [id] if !id.is_null() => id.clone(),
                    _ => continue,
                }
            };
            let key = id.key_fragment();
            if !batch.parents.contains_key(&key) {
                batch.values.push(id);
                batch.parents.insert(key, entity);
            }
        }
        Ok(batch)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Map key of a parent inside a grouping.
pub(crate) fn parent_key(parent: &EntityRef) -> Result<String> {
    Ok(parent.single_id()?.key_fragment())
}

/// Hydrate rows through the identity map of `kind`.
pub(crate) fn hydrate_rows(orm: &OrmContext, kind: EntityKind, rows: &[Row]) -> Result<Vec<EntityRef>> {
    let repository = orm.repository(kind)?;
    rows.iter().map(|row| repository.hydrate_entity(row)).collect()
}

/// Share one preload batch across everything a resolver materialized.
pub(crate) fn preload_grouping(orm: &OrmContext, grouping: &Grouping) {
    if orm.config().preload_collections {
        attach_preload(grouping.all());
    }
}

/// Fetch targets of `kind` by primary key, indexed by their internal key.
pub(crate) fn bulk_fetch(
    orm: &OrmContext,
    kind: EntityKind,
    ids: &[Vec<Value>],
) -> Result<HashMap<String, EntityRef>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mapper = orm.repository(kind)?.mapper();
    let mut query = mapper.builder();
    let columns: Vec<String> = mapper
        .storage_reflection()
        .storage_primary_key()
        .iter()
        .map(|column| query.column(column))
        .collect();
    query.and_where_in(&columns, ids);
    let (sql, params) = query.build();
    let rows = mapper.query(&sql, &params)?;
    Ok(hydrate_rows(orm, kind, &rows)?
        .into_iter()
        .map(|entity| (entity.key(), entity))
        .collect())
}

/// Per-parent ordered target keys collected by a first pass.
#[derive(Debug, Default)]
pub(crate) struct TargetIndex {
    order: Vec<(String, String)>,
    ids: Vec<Vec<Value>>,
    seen: HashSet<String>,
}

impl TargetIndex {
    pub(crate) fn push(&mut self, parent: &Value, target: Vec<Value>) {
        let key = composite_key(&target);
        if self.seen.insert(key.clone()) {
            self.ids.push(target);
        }
        self.order.push((parent.key_fragment(), key));
    }

    pub(crate) fn ids(&self) -> &[Vec<Value>] {
        &self.ids
    }

    /// Group `found` targets back into per-parent order.
    pub(crate) fn remap(
        &self,
        found: &HashMap<String, EntityRef>,
        policy: MissingTargetPolicy,
        table: &str,
        relationship: &str,
    ) -> Result<Grouping> {
        let mut grouping = Grouping::new();
        for (parent, target) in &self.order {
            match found.get(target) {
                Some(entity) => grouping.push(parent.clone(), entity.clone()),
                None => missing_target(policy, table, target, relationship)?,
            }
        }
        Ok(grouping)
    }
}

fn missing_target(
    policy: MissingTargetPolicy,
    table: &str,
    key: &str,
    relationship: &str,
) -> Result<()> {
    match policy {
        MissingTargetPolicy::Error => Err(IntegrityError {
            table: table.to_string(),
            key: key.to_string(),
            relationship: relationship.to_string(),
        }
        .into()),
        MissingTargetPolicy::Skip => {
            tracing::warn!(table, key, relationship, "Skipping target missing from re-fetch");
            Ok(())
        }
    }
}

/// Read a `"join"`, `"count"` row pair into a count map.
pub(crate) fn read_counts(rows: &[Row]) -> HashMap<String, usize> {
    rows.iter()
        .filter_map(|row| {
            let join = row.get_by_name("join")?;
            let count = row.get_by_name("count").and_then(Value::as_i64).unwrap_or(0);
            Some((join.key_fragment(), usize::try_from(count).unwrap_or(0)))
        })
        .collect()
}

/// Values of `columns` in `row`, or `None` if one is absent.
pub(crate) fn row_values(row: &Row, columns: &[String]) -> Option<Vec<Value>> {
    columns
        .iter()
        .map(|column| row.get_by_name(column).cloned())
        .collect()
}
