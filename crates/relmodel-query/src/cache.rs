//! Fingerprints for relationship fetch caches.
//!
//! Two fetches share a cache entry exactly when they would send the same SQL
//! with the same parameters for the same batch of parent keys. The
//! fingerprint is the full text of those three parts, so distinct fetches
//! never share a key.

use relmodel_core::Value;

/// Fingerprint of a fetch: query text, its parameters and the batch values.
///
/// The parts are encoded together as one JSON array. Batch values are reduced
/// to their key fragments, so `Int(1)` and `BigInt(1)` parents share an entry.
///
/// ```
/// use relmodel_core::Value;
/// use relmodel_query::fingerprint;
///
/// let key = fingerprint("SELECT ?", &[Value::Int(1)], &[Value::BigInt(5)]);
/// assert_eq!(key, r#"["SELECT ?",[{"Int":1}],["5"]]"#);
/// ```
pub fn fingerprint(sql: &str, params: &[Value], batch: &[Value]) -> String {
    let batch: Vec<String> = batch.iter().map(Value::key_fragment).collect();
    serde_json::to_string(&(sql, params, &batch))
        .unwrap_or_else(|_| format!("{sql}\u{0}{params:?}\u{0}{batch:?}"))
}
