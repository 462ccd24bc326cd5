//! Non-main side of a one-to-one relationship.

use super::{OneHasManyMapper, RelationshipMapper, parent_key};
use crate::entity::EntityRef;
use crate::iterator::EntityIterator;
use crate::orm::OrmContext;
use relmodel_core::Result;
use relmodel_query::QueryBuilder;

/// The target stores the parent key; at most one target per parent.
///
/// Resolution is the one-has-many batch fetch, reduced to the first target of
/// each parent.
#[derive(Debug)]
pub struct OneHasOneDirectedMapper {
    inner: OneHasManyMapper,
}

impl OneHasOneDirectedMapper {
    pub fn new(inner: OneHasManyMapper) -> Self {
        Self { inner }
    }
}

impl RelationshipMapper for OneHasOneDirectedMapper {
    #[tracing::instrument(level = "debug", skip_all, fields(relationship = %self.inner.relationship().name))]
    fn get_iterator(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<EntityIterator> {
        let mut query = query.clone();
        query.limit_by(None, None);
        let Some(grouping) = self.inner.grouping(orm, parent, &query)? else {
            return Ok(EntityIterator::empty());
        };
        let key = parent_key(parent)?;
        if grouping.get(&key).len() > 1 {
            tracing::warn!(
                relationship = %self.inner.relationship().name,
                parent = %key,
                "One-to-one relationship resolved to several rows; using the first"
            );
        }
        Ok(EntityIterator::new(grouping).with_data_index(key))
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
        self.inner.clear_cache();
    }
}
