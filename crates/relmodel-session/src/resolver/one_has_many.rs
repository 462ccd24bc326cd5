//! One-has-many resolution: targets hold a foreign key to the parent.

use super::{
    ParentBatch, RelationshipMapper, TargetIndex, bulk_fetch, hydrate_rows, parent_key,
    preload_grouping, read_counts, row_values,
};
use crate::config::MissingTargetPolicy;
use crate::entity::EntityRef;
use crate::fetch_cache::{Counts, FetchCache};
use crate::iterator::{EntityIterator, Grouping};
use crate::orm::OrmContext;
use relmodel_core::{RelationshipMetadata, Result, Value, quote_ident, quote_qualified};
use relmodel_query::{QueryBuilder, UnionAll, fingerprint};
use std::rc::Rc;

/// Batched resolver for targets whose `join_column` points at the parent.
///
/// Without a LIMIT/OFFSET, or for a single parent, one IN query fetches
/// everything. With a limit and several parents, the limit has to hold per
/// parent: a UNION ALL of per-parent key queries runs first, then
/// the targets are fetched by primary key and put back in union order.
#[derive(Debug)]
pub struct OneHasManyMapper {
    relationship: RelationshipMetadata,
    join_column: String,
    primary_key: Vec<String>,
    table: String,
    cache: FetchCache,
    missing_target: MissingTargetPolicy,
}

impl OneHasManyMapper {
    /// Resolver for `relationship`, whose targets store the parent key in
    /// `join_column` and are identified by `primary_key` columns.
    pub fn new(
        relationship: RelationshipMetadata,
        join_column: impl Into<String>,
        primary_key: Vec<String>,
        table: impl Into<String>,
        cache: FetchCache,
        missing_target: MissingTargetPolicy,
    ) -> Self {
        Self {
            relationship,
            join_column: join_column.into(),
            primary_key,
            table: table.into(),
            cache,
            missing_target,
        }
    }

    /// Storage column on the target table holding the parent key.
    pub fn join_column(&self) -> &str {
        &self.join_column
    }

    pub(crate) fn relationship(&self) -> &RelationshipMetadata {
        &self.relationship
    }

    /// Grouping of targets per parent key, for the whole batch of `parent`.
    pub(crate) fn grouping(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<Option<Rc<Grouping>>> {
        let batch = ParentBatch::of(parent)?;
        if batch.is_empty() {
            return Ok(None);
        }
        let (sql, params) = query.build();
        let key = fingerprint(&sql, &params, &batch.values);
        if let Some(hit) = self.cache.grouping(&key) {
            return Ok(Some(hit));
        }

        let grouping = if query.has_limit_offset_clause() && batch.values.len() > 1 {
            tracing::debug!(
                relationship = %self.relationship.name,
                parents = batch.values.len(),
                "Resolving with two passes"
            );
            self.fetch_two_pass(orm, &batch, query)?
        } else {
            tracing::debug!(
                relationship = %self.relationship.name,
                parents = batch.values.len(),
                "Resolving with one pass"
            );
            self.fetch_one_pass(orm, &batch, query)?
        };
        self.init_reverse(&batch, &grouping)?;
        preload_grouping(orm, &grouping);
        Ok(Some(self.cache.store_grouping(key, grouping)))
    }

    fn fetch_one_pass(
        &self,
        orm: &OrmContext,
        batch: &ParentBatch,
        query: &QueryBuilder,
    ) -> Result<Grouping> {
        let join = query.column(&self.join_column);
        let all_columns = format!("{}.*", quote_ident(query.from_alias()));
        let distinct = query.has_joins();
        let mut query = query.clone();
        query
            .set_select(vec![all_columns])
            .distinct(distinct)
            .and_where_in(&[join], &tuples(&batch.values));

        let mapper = orm.repository(self.relationship.target)?.mapper();
        let (sql, params) = query.build();
        let rows = mapper.query(&sql, &params)?;
        let entities = hydrate_rows(orm, self.relationship.target, &rows)?;

        let mut grouping = Grouping::new();
        for (row, entity) in rows.iter().zip(entities) {
            if let Some(value) = row.get_by_name(&self.join_column) {
                grouping.push(value.key_fragment(), entity);
            }
        }
        Ok(grouping)
    }

    fn fetch_two_pass(
        &self,
        orm: &OrmContext,
        batch: &ParentBatch,
        query: &QueryBuilder,
    ) -> Result<Grouping> {
        let join = query.column(&self.join_column);
        let mut select: Vec<String> = self
            .primary_key
            .iter()
            .map(|column| quote_qualified(&query.column(column)))
            .collect();
        select.push(quote_qualified(&join));

        let mut union = UnionAll::new();
        for value in &batch.values {
            let mut per_parent = query.clone();
            per_parent
                .set_select(select.clone())
                .and_where_eq(&join, value.clone());
            let (sql, params) = per_parent.build();
            union.push(sql, params);
        }
        let Some((sql, params)) = union.build() else {
            return Ok(Grouping::new());
        };

        let mapper = orm.repository(self.relationship.target)?.mapper();
        let mut index = TargetIndex::default();
        for row in mapper.query(&sql, &params)? {
            let (Some(target), Some(parent)) = (
                row_values(&row, &self.primary_key),
                row.get_by_name(&self.join_column),
            ) else {
                continue;
            };
            index.push(parent, target);
        }

        let found = bulk_fetch(orm, self.relationship.target, index.ids())?;
        index.remap(&found, self.missing_target, &self.table, &self.relationship.name)
    }

    fn init_reverse(&self, batch: &ParentBatch, grouping: &Grouping) -> Result<()> {
        let Some(reverse) = self.relationship.reverse.as_deref() else {
            return Ok(());
        };
        for (key, parent) in &batch.parents {
            for member in grouping.get(key) {
                member.init_entity(reverse, parent)?;
            }
        }
        Ok(())
    }

    /// Counts per parent key, for the whole batch of `parent`.
    pub(crate) fn counts(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<Option<Rc<Counts>>> {
        let batch = ParentBatch::of(parent)?;
        if batch.is_empty() {
            return Ok(None);
        }
        let (sql, params) = query.build();
        let key = fingerprint(&format!("COUNT:{sql}"), &params, &batch.values);
        if let Some(hit) = self.cache.counts(&key) {
            return Ok(Some(hit));
        }

        let join = query.column(&self.join_column);
        let first_key = self.primary_key.first().map_or("id", String::as_str);
        let counted = quote_qualified(&query.column(first_key));
        let (sql, params) = if query.has_limit_offset_clause() {
            limited_counts(query, &join, &counted, &batch.values)
        } else {
            let mut grouped = query.clone();
            grouped
                .set_select(vec![
                    format!("{} AS {}", quote_qualified(&join), quote_ident("join")),
                    format!("COUNT({}) AS {}", counted, quote_ident("count")),
                ])
                .clear_order_by()
                .and_where_in(&[join.clone()], &tuples(&batch.values))
                .group_by(join);
            grouped.build()
        };

        let mapper = orm.repository(self.relationship.target)?.mapper();
        let rows = mapper.query(&sql, &params)?;
        Ok(Some(self.cache.store_counts(key, read_counts(&rows))))
    }
}

impl RelationshipMapper for OneHasManyMapper {
    #[tracing::instrument(level = "debug", skip_all, fields(relationship = %self.relationship.name))]
    fn get_iterator(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<EntityIterator> {
        match self.grouping(orm, parent, query)? {
            Some(grouping) => Ok(EntityIterator::new(grouping).with_data_index(parent_key(parent)?)),
            None => Ok(EntityIterator::empty()),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(relationship = %self.relationship.name))]
    fn get_iterator_count(
        &self,
        orm: &OrmContext,
        parent: &EntityRef,
        query: &QueryBuilder,
    ) -> Result<usize> {
        match self.counts(orm, parent, query)? {
            Some(counts) => Ok(counts.get(&parent_key(parent)?).copied().unwrap_or(0)),
            None => Ok(0),
        }
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// One single-column tuple per value.
pub(crate) fn tuples(values: &[Value]) -> Vec<Vec<Value>> {
    values.iter().map(|value| vec![value.clone()]).collect()
}

/// `SELECT ? AS "join", COUNT(*) AS "count" FROM (...) "temp"` per parent,
/// unioned, so LIMIT/OFFSET apply to each parent on its own.
pub(crate) fn limited_counts(
    query: &QueryBuilder,
    join: &str,
    counted: &str,
    values: &[Value],
) -> (String, Vec<Value>) {
    let mut union = UnionAll::new();
    for value in values {
        let mut sub = query.clone();
        sub.set_select(vec![counted.to_string()])
            .and_where_eq(join, value.clone());
        let (sub_sql, sub_params) = sub.build();
        let sql = format!(
            "SELECT ? AS {}, COUNT(*) AS {} FROM ({}) {}",
            quote_ident("join"),
            quote_ident("count"),
            sub_sql,
            quote_ident("temp")
        );
        let mut params = vec![value.clone()];
        params.extend(sub_params);
        union.push(sql, params);
    }
    union.build().unwrap_or_default()
}
