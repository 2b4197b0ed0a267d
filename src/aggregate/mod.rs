//! Hypergraph aggregate
//!
//! The hypergraph stores entities, relationships and property values. Edges
//! are themselves nodes: they have ids, schemas and property values, and can
//! participate in further relationships.

pub mod hypergraph;
pub mod node;

pub use hypergraph::{Hypergraph, PropertyKey, COMPACTION_THRESHOLD};
pub use node::{EdgeInfo, GraphNode};
