//! Library Model Demo
//!
//! This example walks through the full life of a small library model:
//! schema registration, transactional mutations, live collections,
//! undo/redo and JSON round-tripping.

use serde_json::json;

use hyperstore::{
    Cardinality, Constraint, Cursor, FilterConfig, ModelElementCollection, SchemaEntityBuilder,
    SchemaPropertyBuilder, SchemaRelationshipBuilder, Store, UndoManager,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Library Model Demo ===\n");

    // 1. Register the schema
    let store = Store::new();
    store.define_entity(
        SchemaEntityBuilder::new("lib", "Book")
            .property(SchemaPropertyBuilder::new("Title", "string"))
            .property(
                SchemaPropertyBuilder::new("Copies", "number")
                    .default_literal(json!(1))
                    .constraint(Constraint::check("Copies must not be negative", |ctx| {
                        ctx.value().and_then(|v| v.as_i64()).map(|n| n >= 0).unwrap_or(true)
                    })),
            ),
    )?;
    store.define_entity(
        SchemaEntityBuilder::new("lib", "Library")
            .property(SchemaPropertyBuilder::new("Name", "string")),
    )?;
    store.define_relationship(
        SchemaRelationshipBuilder::new("lib", "LibraryHasBooks", "lib:Library", "lib:Book")
            .cardinality(Cardinality::OneToMany)
            .embedded()
            .start_property("Books")
            .end_property("Library"),
    )?;
    println!("1. Schema registered");

    // 2. Populate a domain inside one session
    let domain = store.create_domain("demo")?;
    let undo = UndoManager::new(&store);
    undo.register_domain(&domain);

    let mut session = store.begin_session();
    let library = domain.create_entity("lib:Library")?;
    library.set_property_value("Name", json!("Central"))?;
    for title in ["tea", "ten", "toy", "test", "term"] {
        let book = domain.create_entity("lib:Book")?;
        book.set_property_value("Title", json!(title))?;
        domain.create_relationship("lib:LibraryHasBooks", library.id(), book.id())?;
    }
    session.accept_changes();
    session.close()?;
    println!("2. Library populated with 5 books");

    // 3. A live collection follows the event stream
    let books = ModelElementCollection::new(&domain, "lib:LibraryHasBooks", &library, false, None)?;
    println!("3. Live collection sees {} books", books.count());

    // 4. Query with a pattern and paging
    let mut query = domain.query(
        FilterConfig::new()
            .schema("lib:Book")
            .matching_pattern("Title", "^te")?
            .skip(1)
            .take(2),
    )?;
    let page: Vec<String> = query
        .to_vec()
        .iter()
        .filter_map(|book| {
            book.get_property_value("Title")
                .ok()
                .and_then(|p| p.value)
                .and_then(|v| v.as_str().map(str::to_string))
        })
        .collect();
    println!("4. Query page: {page:?}");

    // 5. Cascading removal, undone and redone
    domain.remove(library.id())?;
    println!("5. Library removed, collection sees {} books", books.count());
    undo.undo()?;
    println!("   ... undone, {} books are back", books.count());
    undo.redo()?;
    println!("   ... redone, {} books again", books.count());
    undo.undo()?;

    // 6. Round-trip the domain through the envelope form
    let envelope = domain.to_json()?;
    let second = Store::new();
    // the target store needs the same schema
    second.define_entity(
        SchemaEntityBuilder::new("lib", "Book")
            .property(SchemaPropertyBuilder::new("Title", "string"))
            .property(SchemaPropertyBuilder::new("Copies", "number").default_literal(json!(1))),
    )?;
    second.define_entity(
        SchemaEntityBuilder::new("lib", "Library")
            .property(SchemaPropertyBuilder::new("Name", "string")),
    )?;
    second.define_relationship(
        SchemaRelationshipBuilder::new("lib", "LibraryHasBooks", "lib:Library", "lib:Book")
            .cardinality(Cardinality::OneToMany)
            .embedded()
            .start_property("Books"),
    )?;
    let target = second.create_domain("demo")?;
    let loaded = target.load_from_json(&envelope)?;
    println!("6. Envelope round-trip loaded {} elements", loaded.len());

    println!("\n=== Demo Complete ===");
    Ok(())
}
