//! Core types and traits for relmodel.
//!
//! This crate provides the foundations the session layer builds on:
//!
//! - `Value` and `Row` for data crossing the storage boundary
//! - `Connection`, the synchronous storage collaborator
//! - `Schema` arenas of entity and relationship metadata
//! - `StorageReflection` for property/column naming
//! - `Error` and `Result`

pub mod connection;
pub mod error;
pub mod identifiers;
pub mod metadata;
pub mod reflection;
pub mod row;
pub mod value;

pub use connection::Connection;
pub use error::{
    ConnectionError, Error, IntegrityError, QueryError, Result, SchemaError, SchemaErrorKind,
    TransactionError, TypeError,
};
pub use identifiers::{quote_ident, quote_qualified, table_alias, to_camel_case, to_snake_case};
pub use metadata::{
    EntityDef, EntityKind, EntityMetadata, LinkTableInfo, OrderBy, PropertyKind,
    PropertyMetadata, RelationshipId, RelationshipKind, RelationshipMetadata, Schema,
    SchemaBuilder,
};
pub use reflection::{StorageReflection, UnderscoredStorageReflection};
pub use row::Row;
pub use value::{Value, composite_key};
