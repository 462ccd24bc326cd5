//! Entities, relationship resolution and persistence for relmodel.
//!
//! `relmodel-session` is the **object layer**. It keeps a graph of in-memory
//! entities consistent with rows in a relational store, resolves relationships
//! lazily and in batches, and coordinates writes inside one shared transaction
//! per connection.
//!
//! # Role In The Architecture
//!
//! - **Entities**: explicit property maps built from schema metadata, shared
//!   through [`EntityRef`].
//! - **Relationship containers**: [`HasOne`] and [`HasMany`] cache resolved
//!   targets and keep both sides of a relationship in sync.
//! - **Resolvers**: batch a relationship fetch over every entity loaded
//!   together (the preload batch) and memoize it until the next flush.
//! - **Persistence**: [`DbalMapper`] writes entities and join-table rows
//!   through the shared [`TransactionContext`].
//! - **Model**: [`Orm`] owns one [`Repository`] per entity kind.
//!
//! # Example
//!
//! ```ignore
//! let orm = Orm::new(schema, connection);
//! let authors = orm.repository(author)?.find_all()?;
//!
//! // One query resolves the books of every author loaded above.
//! for author in &authors {
//!     let books = author.collection("books")?.fetch_all()?;
//! }
//!
//! let book = orm.create(book_kind)?;
//! book.set("title", "Dune")?;
//! book.set_entity("author", Some(&authors[0]))?;
//! orm.persist(&book)?;
//! orm.flush()?;
//! ```

pub mod config;
pub mod entity;
pub mod fetch_cache;
pub mod identity_map;
pub mod iterator;
pub mod mapper;
pub mod orm;
pub mod preload;
pub mod relationships;
pub mod repository;
pub mod resolver;
pub mod transaction;

pub use config::{MapperConfig, MissingTargetPolicy};
pub use entity::{Entity, EntityRef, PropertyValue, SlotKind, WeakEntityRef};
pub use fetch_cache::{Counts, FetchCache};
pub use identity_map::IdentityMap;
pub use iterator::{EntityIterator, Grouping};
pub use mapper::{CollectionSource, DbalMapper};
pub use orm::{Orm, OrmBuilder, OrmContext};
pub use preload::PreloadContainer;
pub use relationships::{
    ContainerState, FetchState, HasMany, HasOne, RelationshipCollection, SyncState,
};
pub use repository::Repository;
pub use resolver::{
    HasOneMapper, ManyHasManyMapper, OneHasManyMapper, OneHasOneDirectedMapper,
    RelationshipMapper, RelationshipMapperKind,
};
pub use transaction::{TransactionContext, TransactionRegistry, TransactionState};
