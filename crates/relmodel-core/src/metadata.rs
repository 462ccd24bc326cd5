//! Entity and relationship metadata.
//!
//! Metadata is declared once through [`SchemaBuilder`] and frozen into a
//! [`Schema`]. Entity kinds and relationships live in arenas and are addressed
//! by stable indices ([`EntityKind`], [`RelationshipId`]), so caches elsewhere
//! can key on them without relying on object identity.
//!
//! # Example
//!
//! ```
//! use relmodel_core::{EntityDef, RelationshipMetadata, SchemaBuilder};
//!
//! let mut builder = SchemaBuilder::new();
//! let author = builder.entity(EntityDef::new("Author", "authors").property("name"));
//! let book = builder.entity(EntityDef::new("Book", "books").property("title"));
//! builder.relationship(RelationshipMetadata::many_has_one("author", book, author).reverse("books"));
//! builder.relationship(RelationshipMetadata::one_has_many("books", author, book, "author"));
//! let schema = builder.build().unwrap();
//!
//! assert_eq!(schema.entity(book).table, "books");
//! ```

use crate::error::{Error, Result, SchemaErrorKind};
use std::collections::HashMap;

/// Stable index of an entity kind inside a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKind(usize);

impl EntityKind {
    /// Arena index.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Stable index of a relationship descriptor inside a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipId(usize);

impl RelationshipId {
    /// Arena index.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// The kind of relationship a property describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// To-one, foreign key stored on this side: many `Book`s have one `Author`.
    ManyHasOne,
    /// To-one between two single rows; the main side stores the foreign key.
    OneHasOneDirected,
    /// To-many, foreign key stored on the other side: one `Author` has many `Book`s.
    OneHasMany,
    /// To-many through a join table.
    ManyHasMany,
}

impl RelationshipKind {
    /// Does the property hold a collection?
    pub const fn is_to_many(self) -> bool {
        matches!(self, Self::OneHasMany | Self::ManyHasMany)
    }

    /// The kind the reverse property must have.
    pub const fn reverse_kind(self) -> Self {
        match self {
            Self::ManyHasOne => Self::OneHasMany,
            Self::OneHasMany => Self::ManyHasOne,
            Self::OneHasOneDirected => Self::OneHasOneDirected,
            Self::ManyHasMany => Self::ManyHasMany,
        }
    }
}

/// Join table of a many-has-many relationship, seen from one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTableInfo {
    /// The join table name (e.g. `"books_x_tags"`).
    pub table_name: String,
    /// Column pointing to the side that declares this info.
    pub local_column: String,
    /// Column pointing to the other side.
    pub remote_column: String,
}

impl LinkTableInfo {
    /// Create a new link-table definition.
    pub fn new(
        table_name: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
        }
    }

    /// The same table seen from the other side.
    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            table_name: self.table_name.clone(),
            local_column: self.remote_column.clone(),
            remote_column: self.local_column.clone(),
        }
    }
}

/// Default ordering applied to a to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Property on the target entity.
    pub property: String,
    /// Sort descending.
    pub descending: bool,
}

/// Static description of one relationship property.
#[derive(Debug, Clone)]
pub struct RelationshipMetadata {
    /// Assigned when the relationship is registered.
    pub id: RelationshipId,
    /// Property name on the source entity.
    pub name: String,
    /// Entity declaring the property.
    pub source: EntityKind,
    /// Entity the property points to.
    pub target: EntityKind,
    /// Kind of relationship.
    pub kind: RelationshipKind,
    /// Whether this side is authoritative for the stored link.
    pub is_main: bool,
    /// Property on the target that points back.
    pub reverse: Option<String>,
    /// Join table (many-has-many only); `None` defers to the storage naming convention.
    pub link_table: Option<LinkTableInfo>,
    /// Default ordering for to-many relationships.
    pub order_by: Option<OrderBy>,
}

impl RelationshipMetadata {
    /// Create a relationship descriptor; the id is assigned on registration.
    pub fn new(
        name: impl Into<String>,
        source: EntityKind,
        target: EntityKind,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            id: RelationshipId(usize::MAX),
            name: name.into(),
            source,
            target,
            kind,
            is_main: matches!(kind, RelationshipKind::ManyHasOne),
            reverse: None,
            link_table: None,
            order_by: None,
        }
    }

    /// `source.name` stores a foreign key to `target`.
    pub fn many_has_one(name: impl Into<String>, source: EntityKind, target: EntityKind) -> Self {
        Self::new(name, source, target, RelationshipKind::ManyHasOne)
    }

    /// `source.name` collects the `target` rows whose `reverse` property points here.
    pub fn one_has_many(
        name: impl Into<String>,
        source: EntityKind,
        target: EntityKind,
        reverse: impl Into<String>,
    ) -> Self {
        Self::new(name, source, target, RelationshipKind::OneHasMany).reverse(reverse)
    }

    /// One-to-one; mark the side owning the foreign key with [`main`](Self::main).
    pub fn one_has_one_directed(
        name: impl Into<String>,
        source: EntityKind,
        target: EntityKind,
    ) -> Self {
        Self::new(name, source, target, RelationshipKind::OneHasOneDirected)
    }

    /// Many-to-many through `link_table`.
    pub fn many_has_many(
        name: impl Into<String>,
        source: EntityKind,
        target: EntityKind,
        link_table: LinkTableInfo,
    ) -> Self {
        let mut meta = Self::new(name, source, target, RelationshipKind::ManyHasMany);
        meta.link_table = Some(link_table);
        meta
    }

    /// Set the reverse property name on the target.
    #[must_use]
    pub fn reverse(mut self, property: impl Into<String>) -> Self {
        self.reverse = Some(property.into());
        self
    }

    /// Mark this side as the authoritative one.
    #[must_use]
    pub fn main(mut self, value: bool) -> Self {
        self.is_main = value;
        self
    }

    /// Set the default ordering of a to-many relationship.
    #[must_use]
    pub fn order_by(mut self, property: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            property: property.into(),
            descending,
        });
        self
    }

    /// Does this property write a column of its own entity's table?
    pub fn stores_column(&self) -> bool {
        match self.kind {
            RelationshipKind::ManyHasOne => true,
            RelationshipKind::OneHasOneDirected => self.is_main,
            RelationshipKind::OneHasMany | RelationshipKind::ManyHasMany => false,
        }
    }
}

/// What a property slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Plain column value.
    Scalar,
    /// Computed value; never written to storage.
    Virtual,
    /// Relationship container.
    Relationship(RelationshipId),
}

/// Description of one entity property.
#[derive(Debug, Clone)]
pub struct PropertyMetadata {
    /// Property name.
    pub name: String,
    /// What the property holds.
    pub kind: PropertyKind,
    /// Part of the primary key.
    pub is_primary: bool,
}

/// Description of one entity kind.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    /// Assigned when the entity is registered.
    pub kind: EntityKind,
    /// Entity name, e.g. `"Book"`.
    pub name: String,
    /// Storage table, e.g. `"books"`.
    pub table: String,
    /// Primary key property names, in order.
    pub primary_key: Vec<String>,
    /// All properties in declaration order.
    pub properties: Vec<PropertyMetadata>,
    index: HashMap<String, usize>,
}

impl EntityMetadata {
    /// Slot index of a property.
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.property_index(name).map(|i| &self.properties[i])
    }

    /// Look up a property, failing with a descriptive error.
    #[allow(clippy::result_large_err)]
    pub fn require_property(&self, name: &str) -> Result<&PropertyMetadata> {
        self.property(name).ok_or_else(|| {
            Error::InvalidInput(format!("entity {} has no property '{}'", self.name, name))
        })
    }

    /// Is the primary key made of several properties?
    pub fn has_composite_key(&self) -> bool {
        self.primary_key.len() > 1
    }
}

/// Declaration of an entity for [`SchemaBuilder::entity`].
#[derive(Debug, Clone)]
pub struct EntityDef {
    name: String,
    table: String,
    primary_key: Vec<String>,
    scalars: Vec<String>,
    virtuals: Vec<String>,
}

impl EntityDef {
    /// Declare an entity with a single `id` primary key.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: vec!["id".to_string()],
            scalars: Vec::new(),
            virtuals: Vec::new(),
        }
    }

    /// Replace the primary key; composite keys list several properties.
    ///
    /// Key properties that are not declared as scalars are added as scalars,
    /// unless a relationship with the same name is registered later.
    #[must_use]
    pub fn primary_key<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Add a scalar property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.scalars.push(name.into());
        self
    }

    /// Add a virtual property.
    #[must_use]
    pub fn virtual_property(mut self, name: impl Into<String>) -> Self {
        self.virtuals.push(name.into());
        self
    }
}

/// Collects entity and relationship declarations, then validates them.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
    relationships: Vec<RelationshipMetadata>,
}

impl SchemaBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity kind.
    pub fn entity(&mut self, def: EntityDef) -> EntityKind {
        self.entities.push(def);
        EntityKind(self.entities.len() - 1)
    }

    /// Register a relationship property on its source entity.
    pub fn relationship(&mut self, mut meta: RelationshipMetadata) -> RelationshipId {
        let id = RelationshipId(self.relationships.len());
        meta.id = id;
        self.relationships.push(meta);
        id
    }

    /// Validate every declaration and freeze the schema.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<Schema> {
        let SchemaBuilder {
            entities: defs,
            relationships: mut rels,
        } = self;

        let mut entities: Vec<EntityMetadata> = Vec::with_capacity(defs.len());
        for (i, def) in defs.into_iter().enumerate() {
            let mut meta = EntityMetadata {
                kind: EntityKind(i),
                name: def.name,
                table: def.table,
                primary_key: def.primary_key,
                properties: Vec::new(),
                index: HashMap::new(),
            };
            if meta.primary_key.is_empty() {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("entity {} declares no primary key", meta.name),
                ));
            }
            let relationship_names: Vec<&str> = rels
                .iter()
                .filter(|r| r.source.0 == i)
                .map(|r| r.name.as_str())
                .collect();
            let undeclared_keys: Vec<String> = meta
                .primary_key
                .iter()
                .filter(|key| {
                    !def.scalars.contains(*key) && !relationship_names.contains(&key.as_str())
                })
                .cloned()
                .collect();
            for key in undeclared_keys {
                push_property(&mut meta, key, PropertyKind::Scalar)?;
            }
            for name in def.scalars {
                push_property(&mut meta, name, PropertyKind::Scalar)?;
            }
            for name in def.virtuals {
                push_property(&mut meta, name, PropertyKind::Virtual)?;
            }
            entities.push(meta);
        }

        for rel in &rels {
            for kind in [rel.source, rel.target] {
                if kind.0 >= entities.len() {
                    return Err(Error::schema(
                        SchemaErrorKind::UnknownEntity,
                        format!("relationship '{}' references an unknown entity", rel.name),
                    ));
                }
            }
            let source = &mut entities[rel.source.0];
            push_property(source, rel.name.clone(), PropertyKind::Relationship(rel.id))?;
        }

        for i in 0..rels.len() {
            validate_relationship(&entities, &rels, i)?;
            if rels[i].kind == RelationshipKind::ManyHasMany && rels[i].link_table.is_none() {
                let mirrored = rels[i]
                    .reverse
                    .as_deref()
                    .and_then(|r| find_relationship(&entities, &rels, rels[i].target, r))
                    .and_then(|id| rels[id.0].link_table.as_ref())
                    .map(LinkTableInfo::swapped);
                // Without an explicit table on either side, the storage
                // reflection naming convention decides.
                rels[i].link_table = mirrored;
            }
        }

        for entity in &entities {
            for key in &entity.primary_key {
                if entity.property(key).is_none() {
                    return Err(Error::schema(
                        SchemaErrorKind::UnknownProperty,
                        format!("primary key '{}' of {} is not a property", key, entity.name),
                    ));
                }
            }
        }

        for entity in &mut entities {
            for prop in &mut entity.properties {
                prop.is_primary = entity.primary_key.contains(&prop.name);
            }
        }

        tracing::debug!(
            entities = entities.len(),
            relationships = rels.len(),
            "Schema built"
        );
        let by_name = entities.iter().map(|e| (e.name.clone(), e.kind)).collect();
        Ok(Schema {
            entities,
            relationships: rels,
            by_name,
        })
    }
}

#[allow(clippy::result_large_err)]
fn push_property(meta: &mut EntityMetadata, name: String, kind: PropertyKind) -> Result<()> {
    if meta.index.contains_key(&name) {
        return Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!("property '{}' declared twice on {}", name, meta.name),
        ));
    }
    meta.index.insert(name.clone(), meta.properties.len());
    meta.properties.push(PropertyMetadata {
        name,
        kind,
        is_primary: false,
    });
    Ok(())
}

fn find_relationship(
    entities: &[EntityMetadata],
    rels: &[RelationshipMetadata],
    entity: EntityKind,
    property: &str,
) -> Option<RelationshipId> {
    match entities[entity.0].property(property)?.kind {
        PropertyKind::Relationship(id) if id.0 < rels.len() => Some(id),
        _ => None,
    }
}

#[allow(clippy::result_large_err)]
fn validate_relationship(
    entities: &[EntityMetadata],
    rels: &[RelationshipMetadata],
    i: usize,
) -> Result<()> {
    let rel = &rels[i];
    let source = &entities[rel.source.0];
    let target = &entities[rel.target.0];
    let label = format!("{}.{}", source.name, rel.name);

    let needs_reverse = matches!(rel.kind, RelationshipKind::OneHasMany)
        || (rel.kind == RelationshipKind::OneHasOneDirected && !rel.is_main);
    if rel.kind == RelationshipKind::OneHasMany && rel.is_main {
        return Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!("{label}: one-has-many cannot be the main side"),
        ));
    }
    if rel.kind == RelationshipKind::ManyHasOne && !rel.is_main {
        return Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!("{label}: many-has-one always owns its foreign key"),
        ));
    }

    if let Some(order) = &rel.order_by {
        if target.property(&order.property).is_none() {
            return Err(Error::schema(
                SchemaErrorKind::UnknownProperty,
                format!("{label}: order property '{}' not on {}", order.property, target.name),
            ));
        }
    }

    let Some(reverse_name) = rel.reverse.as_deref() else {
        if needs_reverse {
            return Err(Error::schema(
                SchemaErrorKind::ReverseMismatch,
                format!("{label}: a reverse property is required"),
            ));
        }
        return Ok(());
    };

    let reverse_id = find_relationship(entities, rels, rel.target, reverse_name).ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::ReverseMismatch,
            format!("{label}: reverse '{}.{}' does not exist", target.name, reverse_name),
        )
    })?;
    let reverse = &rels[reverse_id.0];

    if reverse.kind != rel.kind.reverse_kind() || reverse.target != rel.source {
        return Err(Error::schema(
            SchemaErrorKind::ReverseMismatch,
            format!("{label}: reverse '{}.{}' has an incompatible kind", target.name, reverse_name),
        ));
    }
    if let Some(back) = reverse.reverse.as_deref() {
        if back != rel.name {
            return Err(Error::schema(
                SchemaErrorKind::ReverseMismatch,
                format!(
                    "{label}: reverse '{}.{}' points back to '{}'",
                    target.name, reverse_name, back
                ),
            ));
        }
    }
    if matches!(
        rel.kind,
        RelationshipKind::OneHasOneDirected | RelationshipKind::ManyHasMany
    ) && reverse.reverse.is_some()
        && rel.is_main == reverse.is_main
    {
        return Err(Error::schema(
            SchemaErrorKind::ReverseMismatch,
            format!("{label}: exactly one side must be main"),
        ));
    }
    Ok(())
}

/// Frozen, validated metadata for every entity kind and relationship.
#[derive(Debug, Clone)]
pub struct Schema {
    entities: Vec<EntityMetadata>,
    relationships: Vec<RelationshipMetadata>,
    by_name: HashMap<String, EntityKind>,
}

impl Schema {
    /// Metadata of an entity kind.
    pub fn entity(&self, kind: EntityKind) -> &EntityMetadata {
        &self.entities[kind.0]
    }

    /// Look up an entity kind by name.
    pub fn entity_by_name(&self, name: &str) -> Option<EntityKind> {
        self.by_name.get(name).copied()
    }

    /// All entity kinds.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities.iter()
    }

    /// Metadata of a relationship.
    pub fn relationship(&self, id: RelationshipId) -> &RelationshipMetadata {
        &self.relationships[id.0]
    }

    /// Relationship behind a property, if the property is one.
    pub fn relationship_of(&self, kind: EntityKind, property: &str) -> Option<&RelationshipMetadata> {
        match self.entity(kind).property(property)?.kind {
            PropertyKind::Relationship(id) => Some(self.relationship(id)),
            _ => None,
        }
    }

    /// The descriptor on the other side of a relationship, if declared.
    pub fn reverse_of(&self, id: RelationshipId) -> Option<&RelationshipMetadata> {
        let rel = self.relationship(id);
        let reverse = rel.reverse.as_deref()?;
        self.relationship_of(rel.target, reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> (SchemaBuilder, EntityKind, EntityKind) {
        let mut builder = SchemaBuilder::new();
        let author = builder.entity(EntityDef::new("Author", "authors").property("name"));
        let book = builder.entity(EntityDef::new("Book", "books").property("title"));
        (builder, author, book)
    }

    #[test]
    fn test_build_links_reverse_sides() {
        let (mut builder, author, book) = library();
        let many = builder.relationship(
            RelationshipMetadata::many_has_one("author", book, author).reverse("books"),
        );
        let one = builder.relationship(RelationshipMetadata::one_has_many(
            "books", author, book, "author",
        ));
        let schema = builder.build().unwrap();

        assert_eq!(schema.reverse_of(many).unwrap().id, one);
        assert_eq!(schema.reverse_of(one).unwrap().id, many);
        assert!(schema.relationship(many).is_main);
        assert!(!schema.relationship(one).is_main);
        assert!(schema.entity(book).property("id").unwrap().is_primary);
    }

    #[test]
    fn test_one_has_many_requires_reverse() {
        let (mut builder, author, book) = library();
        builder.relationship(RelationshipMetadata::new(
            "books",
            author,
            book,
            RelationshipKind::OneHasMany,
        ));
        let err = builder.build().unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::ReverseMismatch
        ));
    }

    #[test]
    fn test_reverse_kind_mismatch_is_rejected() {
        let (mut builder, author, book) = library();
        builder.relationship(
            RelationshipMetadata::many_has_one("author", book, author).reverse("favorite"),
        );
        builder.relationship(
            RelationshipMetadata::one_has_one_directed("favorite", author, book).reverse("author"),
        );
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_one_to_one_needs_exactly_one_main() {
        let mut builder = SchemaBuilder::new();
        let book = builder.entity(EntityDef::new("Book", "books"));
        builder.relationship(
            RelationshipMetadata::one_has_one_directed("nextVolume", book, book)
                .reverse("previousVolume")
                .main(true),
        );
        builder.relationship(
            RelationshipMetadata::one_has_one_directed("previousVolume", book, book)
                .reverse("nextVolume")
                .main(true),
        );
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_many_has_many_mirrors_link_table() {
        let mut builder = SchemaBuilder::new();
        let book = builder.entity(EntityDef::new("Book", "books"));
        let tag = builder.entity(EntityDef::new("Tag", "tags").property("label"));
        builder.relationship(
            RelationshipMetadata::many_has_many(
                "tags",
                book,
                tag,
                LinkTableInfo::new("books_x_tags", "book_id", "tag_id"),
            )
            .reverse("books")
            .main(true),
        );
        let books = builder.relationship(
            RelationshipMetadata::new("books", tag, book, RelationshipKind::ManyHasMany)
                .reverse("tags"),
        );
        let schema = builder.build().unwrap();
        let link = schema.relationship(books).link_table.clone().unwrap();
        assert_eq!(link.local_column, "tag_id");
        assert_eq!(link.remote_column, "book_id");
    }

    #[test]
    fn test_duplicate_property_is_rejected() {
        let mut builder = SchemaBuilder::new();
        builder.entity(EntityDef::new("Book", "books").property("title").property("title"));
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_composite_key_properties_are_added() {
        let mut builder = SchemaBuilder::new();
        let kind = builder.entity(
            EntityDef::new("Edition", "editions").primary_key(["isbn", "printing"]),
        );
        let schema = builder.build().unwrap();
        let meta = schema.entity(kind);
        assert!(meta.has_composite_key());
        assert!(meta.property("printing").unwrap().is_primary);
    }

    #[test]
    fn test_declared_key_properties_are_not_added_twice() {
        let mut builder = SchemaBuilder::new();
        let kind = builder.entity(
            EntityDef::new("Edition", "editions")
                .primary_key(["isbn", "printing"])
                .property("printing")
                .property("title"),
        );
        let schema = builder.build().unwrap();
        let names: Vec<&str> = schema
            .entity(kind)
            .properties
            .iter()
            .map(|property| property.name.as_str())
            .collect();
        assert_eq!(names, vec!["isbn", "printing", "title"]);
    }
}
