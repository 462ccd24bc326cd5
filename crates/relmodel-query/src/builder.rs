//! Clonable SELECT builder used by repositories and relationship resolvers.
//!
//! Resolvers receive a builder describing "the target collection", clone it,
//! and narrow the clone to a batch of parents. Everything is rendered with `?`
//! placeholders and ANSI-quoted identifiers.

use crate::clause::{Condition, Join, JoinType, OrderBy};
use relmodel_core::{Value, quote_qualified, quote_ident, table_alias};

/// A SELECT statement under construction.
///
/// Column references may be bare (`title`) or qualified with the alias
/// (`b.title`); each segment is quoted when rendered.
///
/// # Example
///
/// ```
/// use relmodel_query::{OrderBy, QueryBuilder};
/// use relmodel_core::Value;
///
/// let mut qb = QueryBuilder::new("books");
/// qb.and_where_eq("books.author_id", Value::BigInt(3))
///     .order_by(OrderBy::desc("books.id"))
///     .limit_by(Some(2), None);
///
/// assert_eq!(
///     qb.query_sql(),
///     "SELECT \"books\".* FROM \"books\" WHERE \"books\".\"author_id\" = ? ORDER BY \"books\".\"id\" DESC LIMIT 2"
/// );
/// assert_eq!(qb.query_parameters(), vec![Value::BigInt(3)]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    table: String,
    alias: String,
    select: Vec<String>,
    distinct: bool,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    group_by: Vec<String>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryBuilder {
    /// Select from `table`, aliased by its last dotted segment.
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        let alias = table_alias(&table).to_string();
        Self::with_alias(table, alias)
    }

    /// Select from `table` under an explicit alias.
    pub fn with_alias(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            select: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Table being selected from.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Alias of the FROM table.
    pub fn from_alias(&self) -> &str {
        &self.alias
    }

    /// `alias.column`, ready to pass back into the builder.
    pub fn column(&self, column: &str) -> String {
        format!("{}.{}", self.alias, column)
    }

    /// Append a raw select expression.
    pub fn add_select(&mut self, expr: impl Into<String>) -> &mut Self {
        self.select.push(expr.into());
        self
    }

    /// Append quoted column references to the select list.
    pub fn add_select_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.select
            .extend(columns.into_iter().map(|c| quote_qualified(c.as_ref())));
        self
    }

    /// Replace the select list. An empty list selects `alias.*`.
    pub fn set_select(&mut self, exprs: Vec<String>) -> &mut Self {
        self.select = exprs;
        self
    }

    /// Toggle SELECT DISTINCT.
    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    /// Add a join; `on` is raw SQL with `?` placeholders bound from `params`.
    pub fn join(
        &mut self,
        kind: JoinType,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: impl Into<String>,
        params: Vec<Value>,
    ) -> &mut Self {
        self.joins.push(Join {
            kind,
            table: table.into(),
            alias: alias.into(),
            on: Condition::raw(on, params),
        });
        self
    }

    /// Add an INNER JOIN.
    pub fn inner_join(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: impl Into<String>,
    ) -> &mut Self {
        self.join(JoinType::Inner, table, alias, on, Vec::new())
    }

    /// Add a LEFT JOIN.
    pub fn left_join(
        &mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: impl Into<String>,
    ) -> &mut Self {
        self.join(JoinType::Left, table, alias, on, Vec::new())
    }

    /// True when the query joins other tables, so rows may repeat.
    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// AND a raw condition.
    pub fn and_where(&mut self, sql: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.conditions.push(Condition::raw(sql, params));
        self
    }

    /// AND `column = value` (`IS NULL` for a null value).
    pub fn and_where_eq(&mut self, column: &str, value: Value) -> &mut Self {
        self.conditions.push(Condition::eq(column, value));
        self
    }

    /// AND `column IN (...)`, or a row-value IN for several columns.
    pub fn and_where_in(&mut self, columns: &[String], tuples: &[Vec<Value>]) -> &mut Self {
        self.conditions.push(Condition::is_in(columns, tuples));
        self
    }

    /// Number of WHERE conditions.
    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    /// Append a GROUP BY column.
    pub fn group_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.group_by.push(column.into());
        self
    }

    /// Append an ORDER BY entry.
    pub fn order_by(&mut self, order: OrderBy) -> &mut Self {
        self.order_by.push(order);
        self
    }

    /// Drop every ORDER BY entry.
    pub fn clear_order_by(&mut self) -> &mut Self {
        self.order_by.clear();
        self
    }

    /// True if the query has an ORDER BY.
    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Set LIMIT and OFFSET. `None` removes the clause.
    pub fn limit_by(&mut self, limit: Option<u64>, offset: Option<u64>) -> &mut Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Current LIMIT.
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Current OFFSET.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// True if a LIMIT or an OFFSET is set.
    pub fn has_limit_offset_clause(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Render the statement.
    pub fn query_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.select.is_empty() {
            sql.push_str(&quote_ident(&self.alias));
            sql.push_str(".*");
        } else {
            sql.push_str(&self.select.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&quote_qualified(&self.table));
        if table_alias(&self.table) != self.alias {
            sql.push_str(" AS ");
            sql.push_str(&quote_ident(&self.alias));
        }

        for join in &self.joins {
            sql.push_str(&join.to_sql());
        }

        match self.conditions.as_slice() {
            [] => {}
            [only] => {
                sql.push_str(" WHERE ");
                sql.push_str(only.sql());
            }
            many => {
                sql.push_str(" WHERE ");
                let parts: Vec<String> = many.iter().map(|c| format!("({})", c.sql())).collect();
                sql.push_str(&parts.join(" AND "));
            }
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            let cols: Vec<String> = self.group_by.iter().map(|c| quote_qualified(c)).collect();
            sql.push_str(&cols.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let parts: Vec<String> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(&parts.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ");
            sql.push_str(&limit.to_string());
        }
        if let Some(offset) = self.offset {
            sql.push_str(" OFFSET ");
            sql.push_str(&offset.to_string());
        }
        sql
    }

    /// Bound parameters, in placeholder order.
    pub fn query_parameters(&self) -> Vec<Value> {
        self.joins
            .iter()
            .flat_map(|j| j.on.params().iter())
            .chain(self.conditions.iter().flat_map(|c| c.params().iter()))
            .cloned()
            .collect()
    }

    /// SQL and parameters together.
    pub fn build(&self) -> (String, Vec<Value>) {
        (self.query_sql(), self.query_parameters())
    }
}
