//! relmodel - object-relational persistence with lazy, batched relationship
//! loading.
//!
//! relmodel keeps a graph of in-memory entities consistent with rows in a
//! relational store:
//!
//! - Entities described by a runtime [`Schema`] instead of generated structs
//! - Relationships resolved lazily, for every entity loaded together at once
//! - Fetches memoized per query fingerprint until the next flush
//! - Writes coordinated inside one transaction per connection
//!
//! The store itself is reached through the [`Connection`] trait; relmodel
//! ships no driver.
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! let mut builder = SchemaBuilder::new();
//! let author = builder.entity(EntityDef::new("Author", "authors").property("name"));
//! let book = builder.entity(EntityDef::new("Book", "books").property("title"));
//! builder.relationship(RelationshipMetadata::many_has_one("author", book, author).reverse("books"));
//! builder.relationship(RelationshipMetadata::one_has_many("books", author, book, "author"));
//! let schema = builder.build()?;
//!
//! let orm = Orm::new(schema, connection);
//!
//! // One query for the authors, one for the books of all of them.
//! for author in orm.repository(author)?.find_all()? {
//!     for book in author.collection("books")?.fetch_all()? {
//!         println!("{}", book.get("title")?);
//!     }
//! }
//!
//! let dune = orm.create(book)?;
//! dune.set("title", "Dune")?;
//! orm.persist(&dune)?;
//! orm.flush()?;
//! ```
//!
//! # Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | `relmodel-core` | values, rows, errors, `Connection`, schema metadata, storage reflection |
//! | `relmodel-query` | query builder, `UNION ALL`, write statements, fetch fingerprints |
//! | `relmodel-session` | entities, relationship containers and resolvers, mappers, `Orm` |

pub use relmodel_core::{
    Connection, ConnectionError, EntityDef, EntityKind, EntityMetadata, Error, IntegrityError,
    LinkTableInfo, PropertyKind, PropertyMetadata, QueryError, RelationshipId, RelationshipKind,
    RelationshipMetadata, Result, Row, Schema, SchemaBuilder, SchemaError, SchemaErrorKind,
    StorageReflection, TransactionError, TypeError, UnderscoredStorageReflection, Value,
    composite_key, quote_ident, quote_qualified,
};
pub use relmodel_query::{
    DeleteBuilder, InsertBuilder, OrderBy, OrderDirection, QueryBuilder, UnionAll,
    UpdateBuilder, fingerprint,
};
pub use relmodel_session::{
    CollectionSource, ContainerState, DbalMapper, Entity, EntityIterator, EntityRef, FetchState,
    Grouping, MapperConfig, MissingTargetPolicy, Orm, OrmBuilder, OrmContext, PreloadContainer,
    PropertyValue, RelationshipCollection, RelationshipMapper, RelationshipMapperKind,
    Repository, TransactionContext, TransactionState,
};

/// Everything needed to declare a schema, open an `Orm` and work with
/// entities.
///
/// ```ignore
/// use relmodel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Storage
        Connection,
        // Schema
        EntityDef,
        EntityKind,
        // Entities
        EntityRef,
        Error,
        // Configuration
        MapperConfig,
        MissingTargetPolicy,
        // Model
        Orm,
        PropertyValue,
        // Query building
        QueryBuilder,
        RelationshipCollection,
        RelationshipMetadata,
        Result,
        Row,
        SchemaBuilder,
        Value,
    };
}
