//! Undo/redo and JSON round-trip tests

use proptest::prelude::*;
use serde_json::json;

use hyperstore::{
    Cardinality, Cursor, Domain, ElementId, SchemaEntityBuilder, SchemaPropertyBuilder,
    SchemaRelationshipBuilder, Store, UndoManager,
};

fn library_schema(store: &Store) {
    store
        .define_entity(
            SchemaEntityBuilder::new("lib", "Book")
                .property(SchemaPropertyBuilder::new("Title", "string"))
                .property(SchemaPropertyBuilder::new("Copies", "number").default_literal(json!(1))),
        )
        .unwrap();
    store
        .define_entity(
            SchemaEntityBuilder::new("lib", "Library")
                .property(SchemaPropertyBuilder::new("Name", "string")),
        )
        .unwrap();
    store
        .define_relationship(
            SchemaRelationshipBuilder::new("lib", "LibraryHasBooks", "lib:Library", "lib:Book")
                .cardinality(Cardinality::OneToMany)
                .embedded()
                .start_property("Books")
                .end_property("Library"),
        )
        .unwrap();
}

fn fixture() -> (Store, Domain, UndoManager) {
    let store = Store::new();
    library_schema(&store);
    let domain = store.create_domain("d").unwrap();
    let undo = UndoManager::new(&store);
    undo.register_domain(&domain);
    (store, domain, undo)
}

#[test]
fn undoing_a_first_write_clears_the_slot() {
    let (_store, domain, undo) = fixture();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("x")).unwrap();

    undo.undo().unwrap();

    let title = book.get_property_value("Title").unwrap();
    assert_eq!(title.value, None);
    assert_eq!(title.version, 0);

    // the default-bearing property falls back to its default after undo
    book.set_property_value("Copies", json!(9)).unwrap();
    undo.undo().unwrap();
    assert_eq!(book.get_property_value("Copies").unwrap().value, Some(json!(1)));
}

#[test]
fn undo_and_redo_replay_an_embedded_cascade() {
    let (_store, domain, undo) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("tea")).unwrap();
    let rel = domain
        .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
        .unwrap();

    domain.remove(library.id()).unwrap();
    assert!(!domain.element_exists(library.id()));

    undo.undo().unwrap();
    assert!(domain.element_exists(library.id()));
    assert!(domain.element_exists(book.id()));
    assert!(domain.element_exists(rel.id()));
    let restored = domain.get(book.id()).unwrap();
    assert_eq!(restored.get_property_value("Title").unwrap().value, Some(json!("tea")));

    undo.redo().unwrap();
    assert!(!domain.element_exists(library.id()));
    assert!(!domain.element_exists(book.id()));
    assert!(!domain.element_exists(rel.id()));

    undo.undo().unwrap();
    assert!(domain.element_exists(library.id()));
    assert!(domain.element_exists(book.id()));
    assert!(domain.element_exists(rel.id()));
}

#[test]
fn new_mutations_clear_the_redo_stack() {
    let (_store, domain, undo) = fixture();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("a")).unwrap();

    undo.undo().unwrap();
    assert!(undo.can_redo());

    book.set_property_value("Title", json!("b")).unwrap();
    assert!(!undo.can_redo());
    assert_eq!(book.get_property_value("Title").unwrap().value, Some(json!("b")));
}

#[test]
fn save_points_unwind_multiple_frames() {
    let (_store, domain, undo) = fixture();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("first")).unwrap();

    let save_point = undo.save_point();
    assert!(save_point.is_some());

    book.set_property_value("Title", json!("second")).unwrap();
    book.set_property_value("Title", json!("third")).unwrap();

    undo.undo_to(save_point).unwrap();
    assert_eq!(book.get_property_value("Title").unwrap().value, Some(json!("first")));

    // an unknown save-point drains the whole stack
    undo.undo_to(Some(u64::MAX)).unwrap();
    assert!(!undo.can_undo());
    assert!(!domain.element_exists(book.id()));
}

#[test]
fn sessions_in_loading_mode_are_not_recorded() {
    let (_store, domain, undo) = fixture();
    domain
        .load_from_json(&json!({
            "entities": [{ "id": 1, "schema": "lib:Book" }],
            "relationships": []
        }))
        .unwrap();
    assert!(!undo.can_undo());
    assert!(domain.element_exists(&ElementId::new("d", "1")));
}

#[test]
fn loading_numeric_ids_raises_the_sequence() {
    let (_store, domain, _undo) = fixture();
    domain
        .load_from_json(&json!({
            "entities": [{
                "id": 42,
                "schema": "lib:Book",
                "properties": [{ "name": "Title", "value": "loaded" }]
            }],
            "relationships": []
        }))
        .unwrap();

    assert_eq!(domain.sequence(), 42);
    let fresh = domain.create_entity("lib:Book").unwrap();
    assert_eq!(fresh.id(), &ElementId::new("d", "43"));
}

#[test]
fn envelope_schema_indices_resolve_through_the_table() {
    let (_store, domain, _undo) = fixture();
    let loaded = domain
        .load_from_json(&json!({
            "schemas": [{ "name": "lib", "elements": [{ "id": 1, "name": "Book" }] }],
            "entities": [{
                "id": "b1",
                "schema": 0,
                "properties": [{ "name": "Title", "value": "indexed" }]
            }]
        }))
        .unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].schema_id(), &ElementId::new("lib", "Book"));
    assert_eq!(loaded[0].get_property_value("Title").unwrap().value, Some(json!("indexed")));
}

#[test]
fn envelope_state_d_removes_elements() {
    let (_store, domain, _undo) = fixture();
    let book = domain.create_entity_with("lib:Book", Some("b1"), None).unwrap();
    domain
        .load_from_json(&json!({
            "entities": [{ "id": "b1", "schema": "lib:Book", "state": "D" }],
            "relationships": []
        }))
        .unwrap();
    assert!(!domain.element_exists(book.id()));
}

#[test]
fn envelope_round_trips_between_stores() {
    let (_store, domain, _undo) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    library.set_property_value("Name", json!("central")).unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("tea")).unwrap();
    domain
        .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
        .unwrap();

    let envelope = domain.to_json().unwrap();

    let second = Store::new();
    library_schema(&second);
    let target = second.create_domain("d").unwrap();
    target.load_from_json(&envelope).unwrap();

    assert!(target.element_exists(library.id()));
    assert!(target.element_exists(book.id()));
    let restored = target.get(book.id()).unwrap();
    assert_eq!(restored.get_property_value("Title").unwrap().value, Some(json!("tea")));
    let mut rels = target
        .find_relationships(Some("lib:LibraryHasBooks"), Some(library.id()), None)
        .unwrap();
    assert_eq!(rels.count(), 1);
}

#[test]
fn stringify_round_trips_through_the_object_form() {
    let (_store, domain, _undo) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    library.set_property_value("Name", json!("central")).unwrap();
    for title in ["tea", "toy"] {
        let book = domain.create_entity("lib:Book").unwrap();
        book.set_property_value("Title", json!(title)).unwrap();
        domain
            .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
            .unwrap();
    }

    let rendered = library.stringify().unwrap();
    assert_eq!(rendered["$schema"], json!("lib:Library"));
    assert_eq!(rendered["Name"], json!("central"));
    assert_eq!(rendered["Books"].as_array().unwrap().len(), 2);

    // loading the rendered form into an empty domain rebuilds the
    // neighborhood, modulo id remapping
    let second = Store::new();
    library_schema(&second);
    let target = second.create_domain("copy").unwrap();
    let loaded = target.load_from_json(&rendered).unwrap();
    let root = &loaded[0];
    assert_eq!(root.get_property_value("Name").unwrap().value, Some(json!("central")));
    let books = root.related("Books").unwrap();
    assert_eq!(books.len(), 2);
    let mut titles: Vec<String> = books
        .iter()
        .map(|b| {
            b.get_property_value("Title")
                .unwrap()
                .value
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap()
        })
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["tea", "toy"]);
}

#[test]
fn object_documents_resolve_refs() {
    let (_store, domain, _undo) = fixture();
    let loaded = domain
        .load_from_json(&json!({
            "$schema": "lib:Library",
            "$id": "L",
            "Name": "central",
            "Books": [
                { "Title": "tea" },
                { "Title": "toy" }
            ]
        }))
        .unwrap();
    let library = &loaded[0];
    assert_eq!(library.related("Books").unwrap().len(), 2);

    // a $ref pointing at nothing is a format error
    let err = domain.load_from_json(&json!({ "$ref": "missing" })).unwrap_err();
    assert!(matches!(err, hyperstore::HyperstoreError::InvalidFormat(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Committing writes, undoing them all and redoing them all restores
    /// exactly the committed state.
    #[test]
    fn undo_then_redo_round_trips(values in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
        let (_store, domain, undo) = fixture();
        let book = domain.create_entity("lib:Book").unwrap();
        for value in &values {
            book.set_property_value("Title", json!(value)).unwrap();
        }
        let committed = book.get_property_value("Title").unwrap().value;

        for _ in &values {
            undo.undo().unwrap();
        }
        prop_assert_eq!(book.get_property_value("Title").unwrap().value, None);

        for _ in &values {
            undo.redo().unwrap();
        }
        prop_assert_eq!(book.get_property_value("Title").unwrap().value, committed);

        // and the round trip is stable when driven once more
        undo.undo().unwrap();
        undo.redo().unwrap();
        let replayed = domain.get(book.id()).unwrap();
        prop_assert_eq!(
            replayed.get_property_value("Title").unwrap().value,
            Some(json!(values.last().unwrap()))
        );
    }
}
