//! Graph nodes and incident-edge records

use indexmap::IndexMap;
use serde_json::Value;

use crate::value_objects::{Direction, ElementId, NodeKind};

/// Incident-edge record kept on a node for O(1) traversal.
///
/// On the start node `end_id` points at the edge's end; on the end node it
/// points back at the start.
#[derive(Debug, Clone)]
pub struct EdgeInfo {
    pub id: ElementId,
    pub schema_id: ElementId,
    pub end_id: ElementId,
    pub end_schema_id: ElementId,
    pub direction: Direction,
}

/// A node of the hypergraph: an entity, a relationship or a property slot
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: ElementId,
    pub schema_id: ElementId,
    pub kind: NodeKind,
    pub version: u64,
    pub start_id: Option<ElementId>,
    pub start_schema_id: Option<ElementId>,
    pub end_id: Option<ElementId>,
    pub end_schema_id: Option<ElementId>,
    /// Property nodes only
    pub value: Option<Value>,
    pub outgoings: IndexMap<ElementId, EdgeInfo>,
    pub incomings: IndexMap<ElementId, EdgeInfo>,
}

impl GraphNode {
    /// An entity node
    pub fn entity(id: ElementId, schema_id: ElementId, version: u64) -> Self {
        Self {
            id,
            schema_id,
            kind: NodeKind::NODE,
            version,
            start_id: None,
            start_schema_id: None,
            end_id: None,
            end_schema_id: None,
            value: None,
            outgoings: IndexMap::new(),
            incomings: IndexMap::new(),
        }
    }

    /// A relationship node between two elements
    pub fn edge(
        id: ElementId,
        schema_id: ElementId,
        start_id: ElementId,
        start_schema_id: ElementId,
        end_id: ElementId,
        end_schema_id: ElementId,
        version: u64,
    ) -> Self {
        Self {
            id,
            schema_id,
            kind: NodeKind::EDGE,
            version,
            start_id: Some(start_id),
            start_schema_id: Some(start_schema_id),
            end_id: Some(end_id),
            end_schema_id: Some(end_schema_id),
            value: None,
            outgoings: IndexMap::new(),
            incomings: IndexMap::new(),
        }
    }

    /// A property slot owned by an entity or relationship node
    pub fn property(owner_id: ElementId, value_schema_id: ElementId, value: Value, version: u64) -> Self {
        Self {
            id: owner_id,
            schema_id: value_schema_id,
            kind: NodeKind::PROPERTY,
            version,
            start_id: None,
            start_schema_id: None,
            end_id: None,
            end_schema_id: None,
            value: Some(value),
            outgoings: IndexMap::new(),
            incomings: IndexMap::new(),
        }
    }

    pub fn is_edge(&self) -> bool {
        self.kind.intersects(NodeKind::EDGE)
    }
}
