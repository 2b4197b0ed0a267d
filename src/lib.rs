//! Hyperstore: an in-memory, schema-driven hypergraph model store
//!
//! Client code registers a schema (entities, relationships with cardinality
//! and embedding, properties with types, defaults and constraints), then
//! mutates a graph of entities and relationships inside transactional
//! sessions. Every mutation is recorded as an event with a deterministic
//! inverse; event streams feed the undo manager, synchronization adapters
//! and live collection views. Removal cascades through embedded
//! relationships, and domains load and save JSON documents.
//!
//! ```
//! use hyperstore::{Cardinality, SchemaEntityBuilder, SchemaPropertyBuilder,
//!     SchemaRelationshipBuilder, Store};
//!
//! let store = Store::new();
//! store.define_entity(
//!     SchemaEntityBuilder::new("lib", "Book")
//!         .property(SchemaPropertyBuilder::new("Title", "string")),
//! )?;
//! store.define_entity(SchemaEntityBuilder::new("lib", "Library"))?;
//! store.define_relationship(
//!     SchemaRelationshipBuilder::new("lib", "LibraryHasBooks", "lib:Library", "lib:Book")
//!         .cardinality(Cardinality::OneToMany)
//!         .embedded()
//!         .start_property("Books"),
//! )?;
//!
//! let domain = store.create_domain("d")?;
//! let mut session = store.begin_session();
//! let library = domain.create_entity("lib:Library")?;
//! let book = domain.create_entity("lib:Book")?;
//! book.set_property_value("Title", "The Hypergraph".into())?;
//! domain.create_relationship("lib:LibraryHasBooks", library.id(), book.id())?;
//! session.accept_changes();
//! session.close()?;
//! # Ok::<(), hyperstore::HyperstoreError>(())
//! ```

pub mod aggregate;
pub mod domain;
pub mod errors;
pub mod events;
pub mod infrastructure;
pub mod projections;
pub mod queries;
pub mod schema;
pub mod session;
pub mod store;
pub mod undo;
pub mod value_objects;

// Re-export the main types
pub use domain::{Domain, ModelElement};
pub use errors::{HyperstoreError, Result};
pub use events::ModelEvent;
pub use store::Store;

// Re-export schema types
pub use schema::{
    Constraint, ConstraintContext, ConstraintKind, DiagnosticMessage, DiagnosticSeverity,
    SchemaElement, SchemaEntityBuilder, SchemaProperty, SchemaPropertyBuilder, SchemaReference,
    SchemaRegistry, SchemaRelationshipBuilder, SchemaValueObjectBuilder,
};

// Re-export session types
pub use session::{Session, SessionConfig, SessionInfo, SessionMode};

// Re-export query types
pub use queries::{ArrayCursor, Cursor, FilterConfig, PropertyMatch, Query};

// Re-export projections and undo
pub use projections::ModelElementCollection;
pub use undo::UndoManager;

// Re-export adapters
pub use infrastructure::{DomainAdapter, TraceAdapter};

// Re-export value objects
pub use value_objects::{Cardinality, ElementId, NodeKind, PropertyValue, SchemaKind};
