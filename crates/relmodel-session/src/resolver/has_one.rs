//! To-one resolution by a foreign key stored on the parent.

use super::{RelationshipMapper, hydrate_rows, preload_grouping};
use crate::entity::EntityRef;
use crate::fetch_cache::FetchCache;
use crate::iterator::{EntityIterator, Grouping};
use crate::orm::OrmContext;
use relmodel_core::{RelationshipMetadata, Result, Value};
use relmodel_query::{QueryBuilder, fingerprint};
use std::collections::HashSet;

/// Batched resolver for many-has-one and the main side of one-has-one.
///
/// Collects the foreign keys of the whole preload batch and fetches the
/// targets with one primary-key IN query.
#[derive(Debug)]
pub struct HasOneMapper {
    relationship: RelationshipMetadata,
    primary_key: String,
    cache: FetchCache,
}

impl HasOneMapper {
    /// Resolver for `relationship`; targets are identified by `primary_key`.
    pub fn new(
        relationship: RelationshipMetadata,
        primary_key: impl Into<String>,
        cache: FetchCache,
    ) -> Self {
        Self {
            relationship,
            primary_key: primary_key.into(),
            cache,
        }
    }

    fn batch(&self, parent: &EntityRef) -> Result<(Value, Vec<Value>)> {
        let own = parent.get_raw_value(&self.relationship.name)?;
        if own.is_null() {
            return Ok((own, Vec::new()));
        }
        let container = parent.borrow().preload_container();
        let mut values = container
            .map(|container| container.preload_values(&self.relationship.name))
            .unwrap_or_default();
        let seen: HashSet<String> = values.iter().map(Value::key_fragment).collect();
        if !seen.contains(&own.key_fragment()) {
            values.push(own.clone());
        }
        Ok((own, values))
    }
}

impl RelationshipMapper for HasOneMapper {
    #[tracing::instrument(level = "debug", skip_all, fields(relationship = %self.relationship.name))]
    fn get_iterator(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<EntityIterator> {
        let (own, batch) = self.batch(parent)?;
        if batch.is_empty() {
            return Ok(EntityIterator::empty());
        }
        let (sql, params) = query.build();
        let key = fingerprint(&sql, &params, &batch);
        let grouping = match self.cache.grouping(&key) {
            Some(hit) => hit,
            None => {
                let mut query = query.clone();
                let column = query.column(&self.primary_key);
                let tuples: Vec<Vec<Value>> = batch.iter().map(|v| vec![v.clone()]).collect();
                query.and_where_in(&[column], &tuples);

                let mapper = orm.repository(self.relationship.target)?.mapper();
                let (sql, params) = query.build();
                let rows = mapper.query(&sql, &params)?;
                let mut grouping = Grouping::new();
                for target in hydrate_rows(orm, self.relationship.target, &rows)? {
                    let index = target.key();
                    grouping.push(index, target);
                }
                preload_grouping(orm, &grouping);
                self.cache.store_grouping(key, grouping)
            }
        };
        Ok(EntityIterator::new(grouping).with_data_index(own.key_fragment()))
    }

    fn get_iterator_count(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<usize> {
        Ok(self.get_iterator(orm, parent, query)?.next().map_or(0, |_| 1))
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}
