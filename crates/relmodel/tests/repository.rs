//! Loading entities: identity map, lookups and collection sources.

mod common;

use common::{MockConnection, author_row, book_row, ids, library, orm};
use relmodel::prelude::*;
use relmodel::CollectionSource;
use serde_json::json;

#[test]
fn loading_twice_yields_the_same_instances() {
    let lib = library();
    let db = MockConnection::new();
    db.respond("FROM \"authors\"", vec![author_row(1, "Herbert")]);
    let orm = orm(&lib, &db);
    let repository = orm.repository(lib.author).unwrap();

    let first = repository.find_all().unwrap();
    first[0].set("name", "Frank Herbert").unwrap();
    let second = repository.find_all().unwrap();

    assert!(first[0].ptr_eq(&second[0]));
    assert_eq!(second[0].get("name").unwrap(), Value::from("Frank Herbert"));
    assert_eq!(repository.identity_map_len(), 1);
}

#[test]
fn get_by_id_queries_once() {
    let lib = library();
    let db = MockConnection::new();
    db.respond("FROM \"authors\"", vec![author_row(1, "Herbert")]);
    let orm = orm(&lib, &db);
    let repository = orm.repository(lib.author).unwrap();

    let author = repository
        .get_by_id(&[Value::BigInt(1)])
        .unwrap()
        .expect("author 1");
    let again = repository.get_by_id(&[Value::Int(1)]).unwrap().expect("mapped");

    assert!(author.ptr_eq(&again));
    assert_eq!(
        db.selects(),
        vec![(
            "SELECT \"authors\".* FROM \"authors\" WHERE \"authors\".\"id\" = ?".to_string(),
            vec![Value::BigInt(1)],
        )]
    );
}

#[test]
fn get_by_id_of_a_missing_row_is_none() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    assert!(orm.repository(lib.author).unwrap().get_by_id(&[Value::BigInt(5)]).unwrap().is_none());
}

#[test]
fn get_by_id_checks_the_key_length() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    let err = orm
        .repository(lib.author).unwrap()
        .get_by_id(&[Value::BigInt(1), Value::BigInt(2)])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(db.query_count(), 0);
}

#[test]
fn find_by_filters_on_storage_columns() {
    let lib = library();
    let db = MockConnection::new();
    db.respond("FROM \"books\"", vec![book_row(1, "Dune", 1)]);
    let orm = orm(&lib, &db);

    let books = orm
        .repository(lib.book).unwrap()
        .find_by(&[("title", Value::from("Dune")), ("author", Value::BigInt(1))])
        .unwrap();

    assert_eq!(ids(&books), vec![Value::BigInt(1)]);
    assert_eq!(
        db.selects(),
        vec![(
            "SELECT \"books\".* FROM \"books\" WHERE (\"books\".\"title\" = ?) \
             AND (\"books\".\"author_id\" = ?)"
                .to_string(),
            vec![Value::from("Dune"), Value::BigInt(1)],
        )]
    );
}

#[test]
fn find_by_rejects_unknown_properties() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    assert!(orm
        .repository(lib.book).unwrap()
        .find_by(&[("isbn", Value::from("x"))])
        .is_err());
    assert_eq!(db.query_count(), 0);
}

#[test]
fn json_rows_become_one_batch() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    let authors = orm
        .repository(lib.author).unwrap()
        .to_collection(json!([
            {"id": 1, "name": "Herbert"},
            {"id": 2, "name": "Joyce"},
        ]))
        .unwrap();
    assert_eq!(authors.len(), 2);
    assert_eq!(authors[1].get("name").unwrap(), Value::from("Joyce"));
    assert_eq!(db.query_count(), 0);

    authors[0].collection("books").unwrap().fetch_all().unwrap();
    assert_eq!(
        db.selects()[0].1,
        vec![Value::BigInt(1), Value::BigInt(2)]
    );
}

#[test]
fn rows_and_queries_are_collection_sources() {
    let lib = library();
    let db = MockConnection::new();
    db.respond("FROM \"authors\"", vec![author_row(3, "Austen")]);
    let orm = orm(&lib, &db);
    let repository = orm.repository(lib.author).unwrap();

    let from_rows = repository
        .to_collection(vec![author_row(3, "Austen")])
        .unwrap();
    let from_query = repository
        .to_collection(CollectionSource::Query(repository.mapper().builder()))
        .unwrap();

    assert!(from_rows[0].ptr_eq(&from_query[0]));
    assert_eq!(db.query_count(), 1);
}

#[test]
fn other_json_shapes_are_rejected() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);
    let repository = orm.repository(lib.author).unwrap();

    for input in [json!({"id": 1}), json!("authors"), json!([1, 2])] {
        let err = repository.to_collection(input).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}

#[test]
fn rows_without_a_primary_key_are_rejected() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    let err = orm
        .repository(lib.author).unwrap()
        .to_collection(json!([{"name": "Nobody"}]))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn repositories_are_found_by_entity_name() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    assert_eq!(orm.repository_by_name("Book").unwrap().kind(), lib.book);
    assert!(orm.repository_by_name("Magazine").is_err());
}

#[test]
fn repositories_only_store_their_own_kind() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    let book = orm.create(lib.book).unwrap();
    let err = orm.repository(lib.author).unwrap().persist(&book).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(db.statements().is_empty());
}

#[test]
fn entities_outlive_the_model_but_stop_resolving() {
    let lib = library();
    let db = MockConnection::new();
    db.respond("FROM \"authors\"", vec![author_row(1, "Herbert")]);
    let orm = orm(&lib, &db);
    let author = orm.repository(lib.author).unwrap().find_all().unwrap().remove(0);

    drop(orm);

    assert_eq!(author.get("name").unwrap(), Value::from("Herbert"));
    assert!(author.collection("books").unwrap().fetch_all().is_err());
}

#[test]
fn kinds_from_a_larger_schema_are_rejected() {
    let lib = library();
    let db = MockConnection::new();
    let orm = orm(&lib, &db);

    let mut other = SchemaBuilder::new();
    let kinds: Vec<EntityKind> = (0..6)
        .map(|i| other.entity(EntityDef::new(format!("Thing{i}"), format!("things_{i}"))))
        .collect();
    let unmapped = kinds[5];

    assert!(matches!(orm.repository(unmapped), Err(Error::InvalidInput(_))));
    assert!(matches!(orm.create(unmapped), Err(Error::InvalidInput(_))));
    assert_eq!(db.query_count(), 0);
}
