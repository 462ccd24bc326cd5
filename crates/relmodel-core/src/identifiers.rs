//! SQL identifier quoting and naming helpers.

use regex::Regex;
use std::sync::OnceLock;

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use relmodel_core::quote_ident;
///
/// assert_eq!(quote_ident("books"), "\"books\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly qualified column reference (`alias.column`).
///
/// Each dot-separated segment is quoted on its own.
///
/// ```
/// use relmodel_core::quote_qualified;
///
/// assert_eq!(quote_qualified("b.author_id"), "\"b\".\"author_id\"");
/// ```
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Default alias for a table: the last schema-qualified segment.
///
/// ```
/// use relmodel_core::table_alias;
///
/// assert_eq!(table_alias("public.books"), "books");
/// assert_eq!(table_alias("books"), "books");
/// ```
pub fn table_alias(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

fn camel_boundary() -> Option<&'static Regex> {
    static BOUNDARY: OnceLock<Option<Regex>> = OnceLock::new();
    BOUNDARY
        .get_or_init(|| Regex::new("([a-z0-9])([A-Z])").ok())
        .as_ref()
}

/// Convert a camelCase property name to snake_case.
///
/// ```
/// use relmodel_core::to_snake_case;
///
/// assert_eq!(to_snake_case("publishedAt"), "published_at");
/// assert_eq!(to_snake_case("id"), "id");
/// ```
pub fn to_snake_case(name: &str) -> String {
    match camel_boundary() {
        Some(boundary) => boundary.replace_all(name, "${1}_${2}").to_lowercase(),
        None => name.to_lowercase(),
    }
}

/// Convert a snake_case column name back to camelCase.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
