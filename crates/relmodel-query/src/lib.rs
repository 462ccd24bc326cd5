//! SQL query building for relmodel.
//!
//! - [`QueryBuilder`]: clonable SELECT builder with `?` placeholders
//! - [`UnionAll`]: combine per-parent queries into one round trip
//! - [`fingerprint`]: collision-free keys for relationship fetch caches
//! - [`InsertBuilder`], [`UpdateBuilder`], [`DeleteBuilder`]: single-row writes

pub mod builder;
pub mod cache;
pub mod clause;
pub mod set_ops;
pub mod write;

pub use builder::QueryBuilder;
pub use cache::fingerprint;
pub use clause::{Condition, Join, JoinType, OrderBy, OrderDirection};
pub use set_ops::UnionAll;
pub use write::{DeleteBuilder, InsertBuilder, UpdateBuilder};
