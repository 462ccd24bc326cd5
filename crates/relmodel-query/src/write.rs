//! Statement builders for INSERT, UPDATE and DELETE.

use relmodel_core::{Value, quote_ident, quote_qualified};

/// INSERT of one row.
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    values: Vec<(String, Value)>,
}

impl InsertBuilder {
    /// Insert into `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    /// Column/value pairs, in order.
    #[must_use]
    pub fn values(mut self, values: Vec<(String, Value)>) -> Self {
        self.values = values;
        self
    }

    /// Build the INSERT SQL and parameters. No columns inserts DEFAULT VALUES.
    pub fn build(&self) -> (String, Vec<Value>) {
        if self.values.is_empty() {
            return (
                format!("INSERT INTO {} DEFAULT VALUES", quote_qualified(&self.table)),
                Vec::new(),
            );
        }
        let columns: Vec<String> = self.values.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders = vec!["?"; self.values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_qualified(&self.table),
            columns.join(", "),
            placeholders
        );
        (sql, self.values.iter().map(|(_, v)| v.clone()).collect())
    }
}

/// UPDATE filtered by column equality.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    set: Vec<(String, Value)>,
    filter: Vec<(String, Value)>,
}

impl UpdateBuilder {
    /// Update rows of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            filter: Vec::new(),
        }
    }

    /// Columns to assign.
    #[must_use]
    pub fn set(mut self, values: Vec<(String, Value)>) -> Self {
        self.set = values;
        self
    }

    /// AND `column = value` for each pair.
    #[must_use]
    pub fn filter(mut self, primary: Vec<(String, Value)>) -> Self {
        self.filter.extend(primary);
        self
    }

    /// Build the UPDATE SQL and parameters; SET parameters come first.
    pub fn build(&self) -> (String, Vec<Value>) {
        let assignments: Vec<String> = self
            .set
            .iter()
            .map(|(column, _)| format!("{} = ?", quote_ident(column)))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_qualified(&self.table),
            assignments.join(", ")
        );
        let mut params: Vec<Value> = self.set.iter().map(|(_, v)| v.clone()).collect();
        push_filter(&mut sql, &mut params, &self.filter);
        (sql, params)
    }
}

/// DELETE filtered by column equality.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    filter: Vec<(String, Value)>,
}

impl DeleteBuilder {
    /// Delete rows of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Vec::new(),
        }
    }

    /// AND `column = value` for each pair.
    #[must_use]
    pub fn filter(mut self, primary: Vec<(String, Value)>) -> Self {
        self.filter.extend(primary);
        self
    }

    /// Build the DELETE SQL and parameters.
    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", quote_qualified(&self.table));
        let mut params = Vec::new();
        push_filter(&mut sql, &mut params, &self.filter);
        (sql, params)
    }
}

fn push_filter(sql: &mut String, params: &mut Vec<Value>, filter: &[(String, Value)]) {
    if filter.is_empty() {
        return;
    }
    let conditions: Vec<String> = filter
        .iter()
        .map(|(column, _)| format!("{} = ?", quote_ident(column)))
        .collect();
    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));
    params.extend(filter.iter().map(|(_, v)| v.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lists_columns_and_placeholders() {
        let (sql, params) = InsertBuilder::new("books")
            .values(vec![
                ("title".into(), Value::from("Dune")),
                ("author_id".into(), Value::BigInt(1)),
            ])
            .build();
        assert_eq!(
            sql,
            "INSERT INTO \"books\" (\"title\", \"author_id\") VALUES (?, ?)"
        );
        assert_eq!(params, vec![Value::from("Dune"), Value::BigInt(1)]);
    }

    #[test]
    fn test_insert_without_columns() {
        let (sql, params) = InsertBuilder::new("counters").build();
        assert_eq!(sql, "INSERT INTO \"counters\" DEFAULT VALUES");
        assert!(params.is_empty());
    }

    #[test]
    fn test_update_params_follow_placeholder_order() {
        let (sql, params) = UpdateBuilder::new("books")
            .set(vec![("title".into(), Value::from("Emma"))])
            .filter(vec![("id".into(), Value::BigInt(7))])
            .build();
        assert_eq!(sql, "UPDATE \"books\" SET \"title\" = ? WHERE \"id\" = ?");
        assert_eq!(params, vec![Value::from("Emma"), Value::BigInt(7)]);
    }

    #[test]
    fn test_delete_with_composite_key() {
        let (sql, params) = DeleteBuilder::new("editions")
            .filter(vec![
                ("isbn".into(), Value::from("x")),
                ("printing".into(), Value::Int(2)),
            ])
            .build();
        assert_eq!(
            sql,
            "DELETE FROM \"editions\" WHERE \"isbn\" = ? AND \"printing\" = ?"
        );
        assert_eq!(params.len(), 2);
    }
}
