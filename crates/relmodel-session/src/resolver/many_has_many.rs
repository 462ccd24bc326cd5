//! Many-has-many resolution through a join table.

use super::one_has_many::{limited_counts, tuples};
use super::{
    ParentBatch, RelationshipMapper, TargetIndex, bulk_fetch, parent_key, preload_grouping,
    read_counts,
};
use crate::config::MissingTargetPolicy;
use crate::entity::EntityRef;
use crate::fetch_cache::FetchCache;
use crate::iterator::{EntityIterator, Grouping};
use crate::orm::OrmContext;
use relmodel_core::{
    LinkTableInfo, RelationshipMetadata, Result, quote_ident, quote_qualified, table_alias,
};
use relmodel_query::{QueryBuilder, UnionAll, fingerprint};

/// Join table of `relationship`, seen from its source side.
///
/// An explicit table on the descriptor wins; otherwise the storage naming
/// convention of the main side decides.
pub(crate) fn link_table(orm: &OrmContext, relationship: &RelationshipMetadata) -> Result<LinkTableInfo> {
    if let Some(link) = &relationship.link_table {
        return Ok(link.clone());
    }
    let source = orm.repository(relationship.source)?.mapper().storage_reflection();
    let target = orm.repository(relationship.target)?.mapper().storage_reflection();
    Ok(if relationship.is_main {
        source.many_has_many_link(target.as_ref())
    } else {
        target.many_has_many_link(source.as_ref()).swapped()
    })
}

/// Batched resolver for targets linked through a join table.
///
/// The first pass reads `(parent, target)` pairs from the join table joined
/// onto the target query, so the target query's filters and ordering apply.
/// The second pass fetches the targets by primary key.
#[derive(Debug)]
pub struct ManyHasManyMapper {
    relationship: RelationshipMetadata,
    link: LinkTableInfo,
    primary_key: String,
    table: String,
    cache: FetchCache,
    missing_target: MissingTargetPolicy,
}

impl ManyHasManyMapper {
    pub fn new(
        relationship: RelationshipMetadata,
        link: LinkTableInfo,
        primary_key: impl Into<String>,
        table: impl Into<String>,
        cache: FetchCache,
        missing_target: MissingTargetPolicy,
    ) -> Self {
        Self {
            relationship,
            link,
            primary_key: primary_key.into(),
            table: table.into(),
            cache,
            missing_target,
        }
    }

    /// Join table, seen from the parent side.
    pub fn link(&self) -> &LinkTableInfo {
        &self.link
    }

    fn link_column(&self, column: &str) -> String {
        format!("{}.{}", table_alias(&self.link.table_name), column)
    }

    /// `query` with the join table joined onto the target primary key.
    fn joined(&self, query: &QueryBuilder) -> QueryBuilder {
        let on = format!(
            "{} = {}",
            quote_qualified(&self.link_column(&self.link.remote_column)),
            quote_qualified(&query.column(&self.primary_key))
        );
        let mut joined = query.clone();
        joined.inner_join(
            self.link.table_name.clone(),
            table_alias(&self.link.table_name).to_string(),
            on,
        );
        joined
    }

    fn fetch(&self, orm: &OrmContext, batch: &ParentBatch, query: &QueryBuilder) -> Result<Grouping> {
        let local = self.link_column(&self.link.local_column);
        let remote = self.link_column(&self.link.remote_column);
        let select = vec![
            format!("{} AS {}", quote_qualified(&local), quote_ident("join")),
            format!("{} AS {}", quote_qualified(&remote), quote_ident("target")),
        ];
        let joined = self.joined(query);

        let (sql, params) = if query.has_limit_offset_clause() && batch.values.len() > 1 {
            tracing::debug!(relationship = %self.relationship.name, "Resolving with two passes");
            let union: UnionAll = batch
                .values
                .iter()
                .map(|value| {
                    let mut per_parent = joined.clone();
                    per_parent
                        .set_select(select.clone())
                        .and_where_eq(&local, value.clone());
                    per_parent.build()
                })
                .collect();
            union.build().unwrap_or_default()
        } else {
            let mut pairs = joined;
            pairs
                .set_select(select)
                .and_where_in(&[local], &tuples(&batch.values));
            pairs.build()
        };

        let mapper = orm.repository(self.relationship.target)?.mapper();
        let mut index = TargetIndex::default();
        for row in mapper.query(&sql, &params)? {
            if let (Some(parent), Some(target)) = (row.get_by_name("join"), row.get_by_name("target")) {
                index.push(parent, vec![target.clone()]);
            }
        }
        let found = bulk_fetch(orm, self.relationship.target, index.ids())?;
        index.remap(&found, self.missing_target, &self.table, &self.relationship.name)
    }
}

impl RelationshipMapper for ManyHasManyMapper {
    #[tracing::instrument(level = "debug", skip_all, fields(relationship = %self.relationship.name))]
    fn get_iterator(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<EntityIterator> {
        let batch = ParentBatch::of(parent)?;
        if batch.is_empty() {
            return Ok(EntityIterator::empty());
        }
        let (sql, params) = query.build();
        let key = fingerprint(&sql, &params, &batch.values);
        let grouping = match self.cache.grouping(&key) {
            Some(hit) => hit,
            None => {
                let grouping = self.fetch(orm, &batch, query)?;
                preload_grouping(orm, &grouping);
                self.cache.store_grouping(key, grouping)
            }
        };
        Ok(EntityIterator::new(grouping).with_data_index(parent_key(parent)?))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(relationship = %self.relationship.name))]
    fn get_iterator_count(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<usize> {
        let batch = ParentBatch::of(parent)?;
        if batch.is_empty() {
            return Ok(0);
        }
        let (sql, params) = query.build();
        let key = fingerprint(&format!("COUNT:{sql}"), &params, &batch.values);
        let counts = match self.cache.counts(&key) {
            Some(hit) => hit,
            None => {
                let local = self.link_column(&self.link.local_column);
                let remote = quote_qualified(&self.link_column(&self.link.remote_column));
                let joined = self.joined(query);
                let (sql, params) = if query.has_limit_offset_clause() {
                    limited_counts(&joined, &local, &remote, &batch.values)
                } else {
                    let mut grouped = joined;
                    grouped
                        .set_select(vec![
                            format!("{} AS {}", quote_qualified(&local), quote_ident("join")),
                            format!("COUNT({}) AS {}", remote, quote_ident("count")),
                        ])
                        .clear_order_by()
                        .and_where_in(&[local.clone()], &tuples(&batch.values))
                        .group_by(local);
                    grouped.build()
                };
                let mapper = orm.repository(self.relationship.target)?.mapper();
                let rows = mapper.query(&sql, &params)?;
                self.cache.store_counts(key, read_counts(&rows))
            }
        };
        Ok(counts.get(&parent_key(parent)?).copied().unwrap_or(0))
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{EntityDef, SchemaBuilder};

    fn mapper() -> ManyHasManyMapper {
        let mut builder = SchemaBuilder::new();
        let book = builder.entity(EntityDef::new("Book", "books"));
        let tag = builder.entity(EntityDef::new("Tag", "tags"));
        let link = LinkTableInfo::new("public.books_x_tags", "book_id", "tag_id");
        let relationship = RelationshipMetadata::many_has_many("tags", book, tag, link.clone());
        ManyHasManyMapper::new(
            relationship,
            link,
            "id",
            "tags",
            FetchCache::default(),
            MissingTargetPolicy::Error,
        )
    }

    #[test]
    fn test_join_table_is_joined_on_target_key() {
        let mapper = mapper();
        assert_eq!(mapper.link_column("book_id"), "books_x_tags.book_id");

        let joined = mapper.joined(&QueryBuilder::new("tags"));
        assert!(joined.query_parameters().is_empty());
        assert_eq!(
            joined.query_sql(),
            "SELECT \"tags\".* FROM \"tags\" \
             INNER JOIN \"public\".\"books_x_tags\" AS \"books_x_tags\" \
             ON \"books_x_tags\".\"tag_id\" = \"tags\".\"id\""
        );
    }
}
