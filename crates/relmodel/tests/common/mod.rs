//! Shared fixtures: a recording connection and a small library schema.

#![allow(dead_code)]

use relmodel::{
    Connection, EntityDef, EntityKind, Error, LinkTableInfo, MapperConfig, Orm,
    RelationshipMetadata, Result, Row, Schema, SchemaBuilder, TransactionError, Value,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Connection that records every statement and answers queries with canned
/// rows, matched by SQL fragment in registration order.
///
/// Transaction commands are strict: nesting a BEGIN or committing with
/// nothing open fails the way a real driver would.
#[derive(Debug, Default)]
pub struct MockConnection {
    open: Cell<bool>,
    statements: RefCell<Vec<(String, Vec<Value>)>>,
    responses: RefCell<Vec<(String, Vec<Row>)>>,
    queries: Cell<usize>,
    begins: Cell<usize>,
    commits: Cell<usize>,
    rollbacks: Cell<usize>,
    next_id: Cell<i64>,
}

impl MockConnection {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            next_id: Cell::new(100),
            ..Self::default()
        })
    }

    /// Answer queries containing `fragment` with `rows`.
    pub fn respond(&self, fragment: &str, rows: Vec<Row>) {
        self.responses
            .borrow_mut()
            .push((fragment.to_string(), rows));
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.borrow().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements
            .borrow()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// SELECT statements only.
    pub fn selects(&self) -> Vec<(String, Vec<Value>)> {
        self.statements
            .borrow()
            .iter()
            .filter(|(sql, _)| sql.starts_with("SELECT") || sql.starts_with('('))
            .cloned()
            .collect()
    }

    /// Writes only.
    pub fn writes(&self) -> Vec<(String, Vec<Value>)> {
        self.statements
            .borrow()
            .iter()
            .filter(|(sql, _)| !sql.starts_with("SELECT") && !sql.starts_with('('))
            .cloned()
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.get()
    }

    pub fn begins(&self) -> usize {
        self.begins.get()
    }

    pub fn commits(&self) -> usize {
        self.commits.get()
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.get()
    }

    pub fn reset(&self) {
        self.statements.borrow_mut().clear();
        self.queries.set(0);
    }
}

impl Connection for MockConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.statements
            .borrow_mut()
            .push((sql.to_string(), params.to_vec()));
        self.queries.set(self.queries.get() + 1);
        let rows = self
            .responses
            .borrow()
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.statements
            .borrow_mut()
            .push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    fn begin_transaction(&self) -> Result<()> {
        if self.open.replace(true) {
            return Err(transaction_error("transaction already open"));
        }
        self.begins.set(self.begins.get() + 1);
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        if !self.open.replace(false) {
            return Err(transaction_error("no transaction to commit"));
        }
        self.commits.set(self.commits.get() + 1);
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        if !self.open.replace(false) {
            return Err(transaction_error("no transaction to roll back"));
        }
        self.rollbacks.set(self.rollbacks.get() + 1);
        Ok(())
    }

    fn last_inserted_id(&self, _sequence: Option<&str>) -> Result<Value> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Ok(Value::BigInt(id))
    }
}

fn transaction_error(message: &str) -> Error {
    Error::Transaction(TransactionError {
        message: message.to_string(),
    })
}

/// Authors write books, books carry tags, an author may have a profile.
pub struct Library {
    pub schema: Rc<Schema>,
    pub author: EntityKind,
    pub book: EntityKind,
    pub tag: EntityKind,
    pub profile: EntityKind,
}

pub fn library() -> Library {
    let mut builder = SchemaBuilder::new();
    let author = builder.entity(EntityDef::new("Author", "authors").property("name"));
    let book = builder.entity(EntityDef::new("Book", "books").property("title"));
    let tag = builder.entity(EntityDef::new("Tag", "tags").property("name"));
    let profile = builder.entity(EntityDef::new("Profile", "profiles").property("bio"));

    builder.relationship(RelationshipMetadata::many_has_one("author", book, author).reverse("books"));
    builder.relationship(RelationshipMetadata::one_has_many(
        "books", author, book, "author",
    ));
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
    builder.relationship(
        RelationshipMetadata::many_has_many(
            "books",
            tag,
            book,
            LinkTableInfo::new("books_x_tags", "tag_id", "book_id"),
        )
        .reverse("tags")
        .main(false),
    );
    builder.relationship(
        RelationshipMetadata::one_has_one_directed("profile", author, profile).reverse("author"),
    );
    builder.relationship(
        RelationshipMetadata::one_has_one_directed("author", profile, author)
            .reverse("profile")
            .main(true),
    );

    Library {
        schema: Rc::new(builder.build().expect("library schema is valid")),
        author,
        book,
        tag,
        profile,
    }
}

pub fn orm(library: &Library, db: &Rc<MockConnection>) -> Orm {
    Orm::new(Rc::clone(&library.schema), Rc::clone(db) as Rc<dyn Connection>)
}

pub fn orm_with(library: &Library, db: &Rc<MockConnection>, config: MapperConfig) -> Orm {
    Orm::builder(Rc::clone(&library.schema), Rc::clone(db) as Rc<dyn Connection>)
        .config(config)
        .build()
}

pub fn author_row(id: i64, name: &str) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("name", Value::Text(name.to_string())),
    ])
}

pub fn book_row(id: i64, title: &str, author: i64) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("title", Value::Text(title.to_string())),
        ("author_id", Value::BigInt(author)),
    ])
}

pub fn tag_row(id: i64, name: &str) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("name", Value::Text(name.to_string())),
    ])
}

/// Key-only row of a two-pass first pass.
pub fn pair_row(id: i64, author: i64) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("author_id", Value::BigInt(author)),
    ])
}

pub fn ids(entities: &[relmodel::EntityRef]) -> Vec<Value> {
    entities.iter().flat_map(|entity| entity.id()).collect()
}
