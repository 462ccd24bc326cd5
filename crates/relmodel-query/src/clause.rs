//! SQL clause types (WHERE, JOIN, ORDER BY).

use relmodel_core::{Value, quote_qualified};

/// A WHERE condition with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    sql: String,
    params: Vec<Value>,
}

impl Condition {
    /// A raw SQL condition using `?` placeholders.
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// `column = ?`, or `column IS NULL` for a NULL value.
    pub fn eq(column: &str, value: Value) -> Self {
        if value.is_null() {
            return Self::raw(format!("{} IS NULL", quote_qualified(column)), Vec::new());
        }
        Self::raw(format!("{} = ?", quote_qualified(column)), vec![value])
    }

    /// `column IN (?, ...)` for one column, `(a, b) IN ((?, ?), ...)` for several.
    ///
    /// Each entry of `tuples` holds one value per column. An empty list yields a
    /// condition that matches nothing.
    pub fn is_in(columns: &[String], tuples: &[Vec<Value>]) -> Self {
        if tuples.is_empty() || columns.is_empty() {
            return Self::raw("1 = 0", Vec::new());
        }
        let mut params = Vec::with_capacity(tuples.len() * columns.len());
        if let [column] = columns {
            let placeholders = vec!["?"; tuples.len()].join(", ");
            params.extend(tuples.iter().filter_map(|t| t.first().cloned()));
            return Self::raw(
                format!("{} IN ({})", quote_qualified(column), placeholders),
                params,
            );
        }
        let lhs = columns
            .iter()
            .map(|c| quote_qualified(c))
            .collect::<Vec<_>>()
            .join(", ");
        let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
        let rhs = vec![tuple.as_str(); tuples.len()].join(", ");
        for t in tuples {
            params.extend(t.iter().cloned());
        }
        Self::raw(format!("({lhs}) IN ({rhs})"), params)
    }

    /// SQL fragment.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters, in placeholder order.
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// SQL keyword for this join type.
    pub const fn as_sql(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinType,
    pub table: String,
    pub alias: String,
    pub on: Condition,
}

impl Join {
    /// Generate SQL for this JOIN.
    pub fn to_sql(&self) -> String {
        format!(
            " {} {} AS {} ON {}",
            self.kind.as_sql(),
            quote_qualified(&self.table),
            quote_qualified(&self.alias),
            self.on.sql()
        )
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    column: String,
    direction: OrderDirection,
}

impl OrderBy {
    /// Create an ascending order by clause.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order by clause.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Generate SQL for this ORDER BY entry.
    pub fn to_sql(&self) -> String {
        let mut sql = quote_qualified(&self.column);
        sql.push_str(match self.direction {
            OrderDirection::Asc => " ASC",
            OrderDirection::Desc => " DESC",
        });
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_null_uses_is_null() {
        let cond = Condition::eq("b.author_id", Value::Null);
        assert_eq!(cond.sql(), "\"b\".\"author_id\" IS NULL");
        assert!(cond.params().is_empty());
    }

    #[test]
    fn test_in_single_column() {
        let cond = Condition::is_in(
            &["b.author_id".to_string()],
            &[vec![Value::BigInt(1)], vec![Value::BigInt(2)]],
        );
        assert_eq!(cond.sql(), "\"b\".\"author_id\" IN (?, ?)");
        assert_eq!(cond.params(), &[Value::BigInt(1), Value::BigInt(2)]);
    }

    #[test]
    fn test_in_composite_columns() {
        let cond = Condition::is_in(
            &["isbn".to_string(), "printing".to_string()],
            &[
                vec![Value::from("a"), Value::Int(1)],
                vec![Value::from("b"), Value::Int(2)],
            ],
        );
        assert_eq!(cond.sql(), "(\"isbn\", \"printing\") IN ((?, ?), (?, ?))");
        assert_eq!(cond.params().len(), 4);
        assert_eq!(cond.params()[2], Value::from("b"));
    }

    #[test]
    fn test_in_empty_matches_nothing() {
        let cond = Condition::is_in(&["id".to_string()], &[]);
        assert_eq!(cond.sql(), "1 = 0");
    }

    #[test]
    fn test_order_by_sql() {
        assert_eq!(OrderBy::desc("c.id").to_sql(), "\"c\".\"id\" DESC");
        assert_eq!(OrderBy::asc("title").to_sql(), "\"title\" ASC");
    }
}
