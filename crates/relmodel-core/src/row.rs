//! Rows handed back by the storage collaborator.

use crate::value::Value;

/// An ordered field/value record.
///
/// Field order is preserved as returned by the storage; lookups by name
/// return the first matching field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of the named column, if present.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Append a field.
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.fields.push((column.into(), value));
    }

    /// Iterate over (column, value) pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(column, value)| (column.as_str(), value))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_keep_storage_order() {
        let row = Row::from_pairs([("title", Value::from("Dune")), ("id", Value::BigInt(1))]);
        let columns: Vec<&str> = row.iter().map(|(column, _)| column).collect();
        assert_eq!(columns, vec!["title", "id"]);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_lookup_by_name() {
        let mut row: Row = [("id", Value::BigInt(3))].into_iter().collect();
        row.push("author_id", Value::Null);

        assert_eq!(row.get_by_name("id"), Some(&Value::BigInt(3)));
        assert_eq!(row.get_by_name("author_id"), Some(&Value::Null));
        assert!(row.get_by_name("title").is_none());
    }
}
