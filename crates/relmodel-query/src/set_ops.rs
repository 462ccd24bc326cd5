//! `UNION ALL` of per-parent queries.
//!
//! Limited relationship fetches run one query per parent; gluing them
//! together keeps a whole batch at one round trip.
//!
//! ```
//! use relmodel_core::Value;
//! use relmodel_query::UnionAll;
//!
//! let union: UnionAll = [1, 2]
//!     .into_iter()
//!     .map(|id| ("SELECT id FROM a WHERE p = ? LIMIT 2".to_string(), vec![Value::BigInt(id)]))
//!     .collect();
//! let (sql, params) = union.build().unwrap();
//! assert!(sql.contains(") UNION ALL ("));
//! assert_eq!(params.len(), 2);
//! ```

use relmodel_core::Value;

/// Accumulates SELECT statements combined with `UNION ALL`.
#[derive(Debug, Clone, Default)]
pub struct UnionAll {
    parts: Vec<(String, Vec<Value>)>,
}

impl UnionAll {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sql: impl Into<String>, params: Vec<Value>) {
        self.parts.push((sql.into(), params));
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Render the combined statement with parameters in placeholder order.
    ///
    /// Each part is parenthesised so its own ORDER BY and LIMIT stay local. A
    /// lone part is returned untouched; nothing to combine yields `None`.
    pub fn build(self) -> Option<(String, Vec<Value>)> {
        if self.parts.len() <= 1 {
            return self.parts.into_iter().next();
        }
        let mut params = Vec::new();
        let mut pieces = Vec::with_capacity(self.parts.len());
        for (sql, part_params) in self.parts {
            pieces.push(format!("({sql})"));
            params.extend(part_params);
        }
        Some((pieces.join(" UNION ALL "), params))
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<Value>)> for UnionAll {
    fn from_iter<I: IntoIterator<Item = (S, Vec<Value>)>>(iter: I) -> Self {
        let mut union = Self::new();
        for (sql, params) in iter {
            union.push(sql, params);
        }
        union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_are_wrapped_and_params_concatenated() {
        let mut union = UnionAll::new();
        union.push("SELECT id FROM books WHERE author_id = ? LIMIT 2", vec![Value::BigInt(1)]);
        union.push("SELECT id FROM books WHERE author_id = ? LIMIT 2", vec![Value::BigInt(2)]);
        assert_eq!(union.len(), 2);

        let (sql, params) = union.build().unwrap();
        assert_eq!(
            sql,
            "(SELECT id FROM books WHERE author_id = ? LIMIT 2) UNION ALL \
             (SELECT id FROM books WHERE author_id = ? LIMIT 2)"
        );
        assert_eq!(params, vec![Value::BigInt(1), Value::BigInt(2)]);
    }

    #[test]
    fn test_a_single_part_is_left_alone() {
        let union: UnionAll = [("SELECT 1 LIMIT 2", vec![])].into_iter().collect();
        assert_eq!(union.build(), Some(("SELECT 1 LIMIT 2".to_string(), vec![])));
    }

    #[test]
    fn test_empty_union_builds_nothing() {
        assert!(UnionAll::new().build().is_none());
    }
}
