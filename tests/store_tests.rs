//! Store integration tests

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;

use hyperstore::{
    Cardinality, Constraint, Cursor, Domain, ElementId, FilterConfig, HyperstoreError,
    ModelElementCollection, SchemaEntityBuilder, SchemaPropertyBuilder,
    SchemaRelationshipBuilder, SessionInfo, Store,
};

/// A store with the library schema and one domain `d`
fn fixture() -> (Store, Domain) {
    let store = Store::new();
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
    store.define_entity(SchemaEntityBuilder::new("lib", "Novel").base("lib:Book")).unwrap();
    store
        .define_relationship(
            SchemaRelationshipBuilder::new("lib", "LibraryHasBooks", "lib:Library", "lib:Book")
                .cardinality(Cardinality::OneToMany)
                .embedded()
                .start_property("Books")
                .end_property("Library"),
        )
        .unwrap();
    store
        .define_relationship(
            SchemaRelationshipBuilder::new("lib", "References", "lib:Book", "lib:Book")
                .cardinality(Cardinality::ManyToMany),
        )
        .unwrap();
    let domain = store.create_domain("d").unwrap();
    (store, domain)
}

fn capture_sessions(store: &Store) -> Rc<RefCell<Vec<SessionInfo>>> {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&captured);
    store.subscribe_session_completed(move |info| sink.borrow_mut().push(info.clone()));
    captured
}

fn id(local: &str) -> ElementId {
    ElementId::new("d", local)
}

#[test]
fn autogenerated_ids_follow_the_domain_sequence() {
    let (store, domain) = fixture();
    let captured = capture_sessions(&store);

    let mut session = store.begin_session();
    let book = domain.create_entity("lib:Book").unwrap();
    session.accept_changes();
    session.close().unwrap();

    assert_eq!(book.id(), &id("1"));
    assert_eq!(domain.sequence(), 1);

    let captured = captured.borrow();
    assert_eq!(captured.len(), 1);
    let events = &captured[0].events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name(), "AddEntity");
    assert_eq!(events[0].id(), &id("1"));
}

#[test]
fn mutations_without_a_session_run_in_a_one_shot_session() {
    let (store, domain) = fixture();
    let captured = capture_sessions(&store);

    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("tea")).unwrap();

    let captured = captured.borrow();
    assert_eq!(captured.len(), 2);
    assert!(captured.iter().all(|info| !info.aborted));
}

#[test]
fn closing_without_accept_rolls_back() {
    let (store, domain) = fixture();
    let captured = capture_sessions(&store);

    let session = store.begin_session();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("gone")).unwrap();
    session.close().unwrap();

    assert!(!domain.element_exists(&id("1")));
    assert!(book.is_disposed());
    let captured = captured.borrow();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].aborted);
}

#[test]
fn duplicate_element_ids_are_rejected() {
    let (_store, domain) = fixture();
    domain.create_entity_with("lib:Book", Some("b"), None).unwrap();
    let err = domain.create_entity_with("lib:Book", Some("b"), None).unwrap_err();
    assert!(matches!(err, HyperstoreError::DuplicateElement(_)));
}

#[test]
fn property_defaults_materialize_on_read() {
    let (_store, domain) = fixture();
    let book = domain.create_entity("lib:Book").unwrap();

    let copies = book.get_property_value("Copies").unwrap();
    assert_eq!(copies.value, Some(json!(1)));
    assert_eq!(copies.version, 0);

    let title = book.get_property_value("Title").unwrap();
    assert_eq!(title.value, None);

    book.set_property_value("Copies", json!(7)).unwrap();
    let copies = book.get_property_value("Copies").unwrap();
    assert_eq!(copies.value, Some(json!(7)));
    assert!(copies.version > 0);
}

#[test]
fn computed_defaults_are_invoked_on_every_read() {
    let store = Store::new();
    let counter = Rc::new(RefCell::new(0));
    let source = Rc::clone(&counter);
    store
        .define_entity(SchemaEntityBuilder::new("lib", "Ticket").property(
            SchemaPropertyBuilder::new("Number", "number").default_computed(move || {
                *source.borrow_mut() += 1;
                json!(*source.borrow())
            }),
        ))
        .unwrap();
    let domain = store.create_domain("d").unwrap();
    let ticket = domain.create_entity("lib:Ticket").unwrap();

    assert_eq!(ticket.get_property_value("Number").unwrap().value, Some(json!(1)));
    assert_eq!(ticket.get_property_value("Number").unwrap().value, Some(json!(2)));
}

#[test]
fn calculated_properties_derive_from_the_element() {
    let store = Store::new();
    store
        .define_entity(
            SchemaEntityBuilder::new("lib", "Book")
                .property(SchemaPropertyBuilder::new("Title", "string"))
                .property(SchemaPropertyBuilder::new("Label", "string").calculated(|el| {
                    let title = el
                        .get_property_value("Title")
                        .ok()
                        .and_then(|p| p.value)
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    json!(format!("book: {title}"))
                })),
        )
        .unwrap();
    let domain = store.create_domain("d").unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("tea")).unwrap();

    assert_eq!(book.get_property_value("Label").unwrap().value, Some(json!("book: tea")));
    let err = book.set_property_value("Label", json!("nope")).unwrap_err();
    assert!(matches!(err, HyperstoreError::TypeMismatch(_)));
}

#[test]
fn embedded_cascade_removes_children_first() {
    let (store, domain) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    domain
        .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
        .unwrap();

    let captured = capture_sessions(&store);
    domain.remove(library.id()).unwrap();

    let captured = captured.borrow();
    let names: Vec<_> = captured[0].events.iter().map(|e| e.event_name()).collect();
    assert_eq!(names, vec!["RemoveRelationship", "RemoveEntity", "RemoveEntity"]);
    assert_eq!(captured[0].events[1].id(), book.id());
    assert_eq!(captured[0].events[2].id(), library.id());
    assert!(captured[0].events[2].is_top_level());
    assert!(!captured[0].events[1].is_top_level());

    assert!(!domain.element_exists(library.id()));
    assert!(!domain.element_exists(book.id()));
    assert!(library.is_disposed());
}

#[test]
fn non_embedded_relationships_do_not_cascade_to_the_end() {
    let (_store, domain) = fixture();
    let a = domain.create_entity("lib:Book").unwrap();
    let b = domain.create_entity("lib:Book").unwrap();
    let rel = domain.create_relationship("lib:References", a.id(), b.id()).unwrap();

    domain.remove(a.id()).unwrap();

    assert!(!domain.element_exists(a.id()));
    assert!(!domain.element_exists(rel.id()));
    assert!(domain.element_exists(b.id()));
}

#[test]
fn find_relationships_by_either_terminal() {
    let (_store, domain) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    let rel = domain
        .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
        .unwrap();

    let mut from_start = domain
        .find_relationships(Some("lib:LibraryHasBooks"), Some(library.id()), None)
        .unwrap();
    assert_eq!(from_start.to_vec().len(), 1);

    let mut from_end = domain
        .find_relationships(Some("lib:LibraryHasBooks"), None, Some(book.id()))
        .unwrap();
    let found = from_end.to_vec();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), rel.id());

    let mut all = domain.find_relationships(None, None, None).unwrap();
    assert_eq!(all.count(), 1);
}

#[test]
fn find_scans_entities_by_exact_schema() {
    let (_store, domain) = fixture();
    domain.create_entity("lib:Book").unwrap();
    domain.create_entity("lib:Novel").unwrap();
    domain.create_entity("lib:Library").unwrap();

    // exact schema match, no subtyping
    assert_eq!(domain.find(Some("lib:Book")).unwrap().count(), 1);
    assert_eq!(domain.find(None).unwrap().count(), 3);

    let mut nodes = domain.get_nodes(hyperstore::NodeKind::NODE_OR_EDGE, None).unwrap();
    assert_eq!(nodes.count(), 3);
}

#[test]
fn self_loops_are_visible_from_both_sides() {
    let (_store, domain) = fixture();
    let book = domain.create_entity("lib:Book").unwrap();
    domain.create_relationship("lib:References", book.id(), book.id()).unwrap();

    let mut outgoing =
        domain.find_relationships(Some("lib:References"), Some(book.id()), None).unwrap();
    assert_eq!(outgoing.count(), 1);
    let mut incoming =
        domain.find_relationships(Some("lib:References"), None, Some(book.id())).unwrap();
    assert_eq!(incoming.count(), 1);
}

#[test]
fn subtype_relationships_are_found_through_is_a() {
    let (_store, domain) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    let novel = domain.create_entity("lib:Novel").unwrap();
    domain
        .create_relationship("lib:LibraryHasBooks", library.id(), novel.id())
        .unwrap();

    let mut books = domain
        .find_relationships(Some("lib:LibraryHasBooks"), Some(library.id()), None)
        .unwrap();
    assert_eq!(books.count(), 1);
}

#[test]
fn property_check_constraints_abort_the_session() {
    let store = Store::new();
    store
        .define_entity(
            SchemaEntityBuilder::new("lib", "Book")
                .property(SchemaPropertyBuilder::new("Title", "string"))
                .property(
                    SchemaPropertyBuilder::new("Copies", "number")
                        .default_literal(json!(1))
                        .constraint(Constraint::check("Copies must not be negative", |ctx| {
                            ctx.value().and_then(|v| v.as_i64()).map(|n| n >= 0).unwrap_or(true)
                        })),
                ),
        )
        .unwrap();
    let domain = store.create_domain("d").unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Copies", json!(5)).unwrap();

    let session = store.begin_session();
    book.set_property_value("Title", json!("draft")).unwrap();
    let err = book.set_property_value("Copies", json!(-1)).unwrap_err();
    assert!(matches!(err, HyperstoreError::ConstraintViolation(_)));
    session.close().unwrap();

    // the whole session rolled back, including the unrelated write
    assert_eq!(book.get_property_value("Copies").unwrap().value, Some(json!(5)));
    assert_eq!(book.get_property_value("Title").unwrap().value, None);
}

#[test]
fn commit_time_check_constraints_roll_the_session_back() {
    let store = Store::new();
    store
        .define_entity(
            SchemaEntityBuilder::new("lib", "Book")
                .property(SchemaPropertyBuilder::new("Title", "string"))
                .constraint(Constraint::check("a book needs a title", |ctx| {
                    ctx.element
                        .get_property_value("Title")
                        .ok()
                        .and_then(|p| p.value)
                        .is_some()
                })),
        )
        .unwrap();
    let domain = store.create_domain("d").unwrap();

    let mut session = store.begin_session();
    let book = domain.create_entity("lib:Book").unwrap();
    session.accept_changes();
    let err = session.close().unwrap_err();
    assert!(matches!(err, HyperstoreError::ConstraintViolation(_)));
    assert!(!domain.element_exists(book.id()));

    // a titled book commits
    let mut session = store.begin_session();
    let book = domain.create_entity("lib:Book").unwrap();
    book.set_property_value("Title", json!("kept")).unwrap();
    session.accept_changes();
    session.close().unwrap();
    assert!(domain.element_exists(book.id()));
}

#[test]
fn validate_constraints_report_without_aborting() {
    let store = Store::new();
    store
        .define_entity(
            SchemaEntityBuilder::new("lib", "Library")
                .property(SchemaPropertyBuilder::new("Name", "string"))
                .constraint(Constraint::validate("a library should be named", |ctx| {
                    ctx.element
                        .get_property_value("Name")
                        .ok()
                        .and_then(|p| p.value)
                        .is_some()
                })),
        )
        .unwrap();
    let domain = store.create_domain("d").unwrap();
    let captured = capture_sessions(&store);

    let mut session = store.begin_session();
    let library = domain.create_entity("lib:Library").unwrap();
    session.accept_changes();
    session.close().unwrap();

    assert!(domain.element_exists(library.id()));
    let captured = captured.borrow();
    assert!(!captured[0].aborted);
    assert_eq!(captured[0].diagnostics.len(), 1);
    assert_eq!(captured[0].diagnostics[0].message, "a library should be named");
}

#[test]
fn query_filters_page_over_accepted_roots() {
    let (_store, domain) = fixture();
    for title in ["tea", "ten", "toy", "test", "term"] {
        let book = domain.create_entity("lib:Book").unwrap();
        book.set_property_value("Title", json!(title)).unwrap();
    }

    let mut query = domain
        .query(
            FilterConfig::new()
                .schema("lib:Book")
                .matching_pattern("Title", "^te")
                .unwrap()
                .skip(1)
                .take(2),
        )
        .unwrap();
    let titles: Vec<String> = query
        .to_vec()
        .iter()
        .map(|el| {
            el.get_property_value("Title")
                .unwrap()
                .value
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap()
        })
        .collect();
    assert_eq!(titles, vec!["ten", "test"]);
}

#[test]
fn query_or_branches_and_predicates() {
    let (_store, domain) = fixture();
    for title in ["tea", "toy", "ink"] {
        let book = domain.create_entity("lib:Book").unwrap();
        book.set_property_value("Title", json!(title)).unwrap();
    }

    // title == "ink" OR title == "toy"
    let mut query = domain
        .query(
            FilterConfig::new().schema("lib:Book").or(FilterConfig::new()
                .matching("Title", json!("ink"))
                .matching("Title", json!("toy"))),
        )
        .unwrap();
    assert_eq!(query.count(), 2);

    let mut query = domain
        .query(FilterConfig::new().schema("lib:Book").filter(|el| {
            el.get_property_value("Title")
                .ok()
                .and_then(|p| p.value)
                .and_then(|v| v.as_str().map(|s| s.len() == 3))
                .unwrap_or(false)
        }))
        .unwrap();
    assert_eq!(query.count(), 3);
}

#[test]
fn query_sub_queries_stream_after_the_root() {
    let (_store, domain) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    library.set_property_value("Name", json!("central")).unwrap();
    for title in ["tea", "toy"] {
        let book = domain.create_entity("lib:Book").unwrap();
        book.set_property_value("Title", json!(title)).unwrap();
        domain
            .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
            .unwrap();
    }

    // without select, only sub-query results stream out
    let mut query = domain
        .query(
            FilterConfig::new()
                .schema("lib:Library")
                .sub_query("Books", FilterConfig::new().matching("Title", json!("tea"))),
        )
        .unwrap();
    let results = query.to_vec();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get_property_value("Title").unwrap().value, Some(json!("tea")));

    // with select, the root is emitted before its sub-query stream
    let mut query = domain
        .query(
            FilterConfig::new()
                .schema("lib:Library")
                .select()
                .sub_query("Books", FilterConfig::new()),
        )
        .unwrap();
    let results = query.to_vec();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id(), library.id());
}

#[test]
fn live_collections_follow_the_event_stream() {
    let (_store, domain) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    let books =
        ModelElementCollection::new(&domain, "lib:LibraryHasBooks", &library, false, None).unwrap();
    assert_eq!(books.count(), 0);

    let book = domain.create_entity("lib:Book").unwrap();
    domain
        .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
        .unwrap();
    assert_eq!(books.count(), 1);
    assert!(books.contains(book.id()));

    let second = domain.create_entity("lib:Book").unwrap();
    books.add(second.id()).unwrap();
    assert_eq!(books.count(), 2);

    books.remove(book.id()).unwrap();
    assert_eq!(books.count(), 1);

    // removing the library cascades; the view empties itself
    domain.remove(library.id()).unwrap();
    assert_eq!(books.count(), 0);
}

#[test]
fn filtered_collections_apply_the_predicate() {
    let (_store, domain) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    let long_titles = ModelElementCollection::new(
        &domain,
        "lib:LibraryHasBooks",
        &library,
        false,
        Some(Box::new(|el| {
            el.get_property_value("Title")
                .ok()
                .and_then(|p| p.value)
                .and_then(|v| v.as_str().map(|s| s.len() > 3))
                .unwrap_or(false)
        })),
    )
    .unwrap();

    for title in ["tea", "test"] {
        let book = domain.create_entity("lib:Book").unwrap();
        book.set_property_value("Title", json!(title)).unwrap();
        domain
            .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
            .unwrap();
    }
    assert_eq!(long_titles.count(), 1);
}

#[test]
fn opposite_collections_track_the_start_side() {
    let (_store, domain) = fixture();
    let library = domain.create_entity("lib:Library").unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    let libraries =
        ModelElementCollection::new(&domain, "lib:LibraryHasBooks", &book, true, None).unwrap();

    domain
        .create_relationship("lib:LibraryHasBooks", library.id(), book.id())
        .unwrap();
    assert_eq!(libraries.count(), 1);
    assert!(libraries.contains(library.id()));
}

#[test]
fn disposed_domains_reject_operations() {
    let (store, domain) = fixture();
    let book = domain.create_entity("lib:Book").unwrap();
    store.unload_domain("d");

    assert!(book.is_disposed());
    let err = book.get_property_value("Title").unwrap_err();
    assert!(matches!(err, HyperstoreError::DisposedElement(_)));
    let err = domain.create_entity("lib:Book").unwrap_err();
    assert!(matches!(err, HyperstoreError::DisposedElement(_)));
}

#[test]
fn cross_domain_relationships_keep_no_incoming_record() {
    let (store, domain) = fixture();
    let other = store.create_domain("other").unwrap();
    let book = domain.create_entity("lib:Book").unwrap();
    let cited = other.create_entity("lib:Book").unwrap();

    let rel = domain.create_relationship("lib:References", book.id(), cited.id()).unwrap();
    assert_eq!(rel.end_id(), Some(cited.id()));

    // removing the citing book drops the edge; the other domain is untouched
    domain.remove(book.id()).unwrap();
    assert!(other.element_exists(cited.id()));
}
