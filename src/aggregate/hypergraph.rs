//! Adjacency storage with tombstoned slots and cascading deletion
//!
//! Entity and relationship nodes live in an ordered slot sequence; an
//! id-to-slot map provides O(1) lookup. Removing a node leaves a tombstone
//! (the map entry points at a sentinel and the slot holds nothing) until the
//! tombstone count passes [`COMPACTION_THRESHOLD`] and the sequence is
//! rebuilt. Property slots live in a separate dictionary keyed by owner id
//! and property name.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

use super::node::{EdgeInfo, GraphNode};
use crate::errors::{HyperstoreError, Result};
use crate::events::ModelEvent;
use crate::value_objects::{Direction, ElementId};

/// Tombstone count that triggers a rebuild of the slot sequence
pub const COMPACTION_THRESHOLD: usize = 1000;

const TOMBSTONE: usize = usize::MAX;

/// Dictionary key of a property slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub owner: ElementId,
    pub name: String,
}

/// In-memory adjacency storage of one domain
pub struct Hypergraph {
    domain: String,
    slots: Vec<Option<GraphNode>>,
    index: IndexMap<ElementId, usize>,
    properties: HashMap<PropertyKey, GraphNode>,
    tombstones: usize,
}

impl Hypergraph {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            slots: Vec::new(),
            index: IndexMap::new(),
            properties: HashMap::new(),
            tombstones: 0,
        }
    }

    /// True when the id maps to a live node
    pub fn has_node(&self, id: &ElementId) -> bool {
        self.index
            .get(id)
            .is_some_and(|&i| i != TOMBSTONE && self.slots.get(i).is_some_and(Option::is_some))
    }

    pub fn node(&self, id: &ElementId) -> Option<&GraphNode> {
        let &i = self.index.get(id)?;
        if i == TOMBSTONE {
            return None;
        }
        self.slots.get(i)?.as_ref()
    }

    fn node_mut(&mut self, id: &ElementId) -> Option<&mut GraphNode> {
        let &i = self.index.get(id)?;
        if i == TOMBSTONE {
            return None;
        }
        self.slots.get_mut(i)?.as_mut()
    }

    /// Number of live entity and relationship nodes
    pub fn len(&self) -> usize {
        self.index.len() - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, node: GraphNode) {
        let slot = self.slots.len();
        let id = node.id.clone();
        self.slots.push(Some(node));
        if let Some(prev) = self.index.insert(id, slot) {
            if prev == TOMBSTONE {
                // the id is live again; the key no longer marks a tombstone
                self.tombstones -= 1;
            }
        }
    }

    fn take_node(&mut self, id: &ElementId) -> Option<GraphNode> {
        let i = *self.index.get(id)?;
        if i == TOMBSTONE {
            return None;
        }
        let node = self.slots.get_mut(i)?.take()?;
        self.index.insert(id.clone(), TOMBSTONE);
        self.tombstones += 1;
        Some(node)
    }

    /// Create an entity node
    pub fn add_node(&mut self, id: &ElementId, schema_id: &ElementId, version: u64) -> Result<()> {
        if self.has_node(id) {
            return Err(HyperstoreError::DuplicateElement(id.clone()));
        }
        self.insert(GraphNode::entity(id.clone(), schema_id.clone(), version));
        Ok(())
    }

    /// Create a relationship node and record it on its endpoints.
    ///
    /// The start must be live in this domain. An unknown end is allowed (the
    /// target may live in another domain); no incoming record is kept there.
    /// A self-loop is recorded once on the source with [`Direction::Both`].
    #[allow(clippy::too_many_arguments)]
    pub fn add_relationship(
        &mut self,
        id: &ElementId,
        schema_id: &ElementId,
        start_id: &ElementId,
        start_schema_id: &ElementId,
        end_id: &ElementId,
        end_schema_id: &ElementId,
        version: u64,
    ) -> Result<()> {
        if self.has_node(id) {
            return Err(HyperstoreError::DuplicateElement(id.clone()));
        }
        if !self.has_node(start_id) {
            return Err(HyperstoreError::InvalidElement(format!(
                "unknown start element {start_id} for relationship {id}"
            )));
        }

        self.insert(GraphNode::edge(
            id.clone(),
            schema_id.clone(),
            start_id.clone(),
            start_schema_id.clone(),
            end_id.clone(),
            end_schema_id.clone(),
            version,
        ));

        let self_loop = start_id == end_id;
        if let Some(start) = self.node_mut(start_id) {
            start.outgoings.insert(
                id.clone(),
                EdgeInfo {
                    id: id.clone(),
                    schema_id: schema_id.clone(),
                    end_id: end_id.clone(),
                    end_schema_id: end_schema_id.clone(),
                    direction: if self_loop { Direction::Both } else { Direction::Outgoing },
                },
            );
        }
        if !self_loop {
            if let Some(end) = self.node_mut(end_id) {
                end.incomings.insert(
                    id.clone(),
                    EdgeInfo {
                        id: id.clone(),
                        schema_id: schema_id.clone(),
                        end_id: start_id.clone(),
                        end_schema_id: start_schema_id.clone(),
                        direction: Direction::Incoming,
                    },
                );
            }
        }
        Ok(())
    }

    /// Remove a node with cascading deletion.
    ///
    /// Breadth-first from the start node: incident edges are enqueued at
    /// every visited node, and an embedded relationship also enqueues its
    /// end. `suppress_cascade` limits the removal to the requested node (the
    /// replaying event stream carries the individual removals itself).
    ///
    /// The returned events are ordered property removals first, then
    /// relationship removals, then entity removals, each group children
    /// before parents, so that replaying them in reverse recreates a target
    /// before its edges and its edges before their properties.
    pub fn remove_node(
        &mut self,
        id: &ElementId,
        version: u64,
        correlation_id: u64,
        suppress_cascade: bool,
        is_embedded: &dyn Fn(&ElementId) -> bool,
    ) -> Result<Vec<ModelEvent>> {
        if !self.has_node(id) {
            return Err(HyperstoreError::InvalidElement(format!("unknown element {id}")));
        }

        let mut entity_events = Vec::new();
        let mut rel_events = Vec::new();
        let mut to_unlink: Vec<ElementId> = Vec::new();
        let mut visited: HashSet<ElementId> = HashSet::new();
        let mut queue: VecDeque<ElementId> = VecDeque::new();
        queue.push_back(id.clone());

        while let Some(cur) = queue.pop_front() {
            if !visited.insert(cur.clone()) {
                continue;
            }
            // ends living in another domain resolve to nothing here
            let node = match self.node(&cur) {
                Some(n) => n,
                None => continue,
            };
            let top_level = cur == *id;

            if node.is_edge() {
                if let (Some(start), Some(end)) = (&node.start_id, &node.end_id) {
                    rel_events.push(ModelEvent::RemoveRelationship {
                        domain: self.domain.clone(),
                        id: cur.clone(),
                        schema_id: node.schema_id.clone(),
                        start_id: start.clone(),
                        start_schema_id: node
                            .start_schema_id
                            .clone()
                            .unwrap_or_else(|| node.schema_id.clone()),
                        end_id: end.clone(),
                        end_schema_id: node
                            .end_schema_id
                            .clone()
                            .unwrap_or_else(|| node.schema_id.clone()),
                        correlation_id,
                        version,
                        top_level,
                    });
                }
            } else {
                entity_events.push(ModelEvent::RemoveEntity {
                    domain: self.domain.clone(),
                    id: cur.clone(),
                    schema_id: node.schema_id.clone(),
                    correlation_id,
                    version,
                    top_level,
                });
            }

            if !suppress_cascade {
                for eid in node.outgoings.keys() {
                    queue.push_back(eid.clone());
                }
                for eid in node.incomings.keys() {
                    queue.push_back(eid.clone());
                }
                if node.is_edge() && is_embedded(&node.schema_id) {
                    if let Some(end) = &node.end_id {
                        trace!(edge = %cur, end = %end, "embedded cascade");
                        queue.push_back(end.clone());
                    }
                }
            }
            to_unlink.push(cur);
        }

        let mut prop_events = Vec::new();
        for cur in &to_unlink {
            let node = match self.take_node(cur) {
                Some(n) => n,
                None => continue,
            };
            if node.is_edge() {
                if let (Some(start), Some(end)) = (node.start_id.clone(), node.end_id.clone()) {
                    if let Some(s) = self.node_mut(&start) {
                        s.outgoings.shift_remove(&node.id);
                    }
                    if end != start {
                        if let Some(e) = self.node_mut(&end) {
                            e.incomings.shift_remove(&node.id);
                        }
                    }
                }
            }

            let keys: Vec<PropertyKey> =
                self.properties.keys().filter(|k| k.owner == *cur).cloned().collect();
            for key in keys {
                if let Some(slot) = self.properties.remove(&key) {
                    prop_events.push(ModelEvent::RemoveProperty {
                        domain: self.domain.clone(),
                        id: cur.clone(),
                        schema_id: node.schema_id.clone(),
                        property_name: key.name,
                        value: slot.value,
                        correlation_id,
                        version,
                        top_level: false,
                    });
                }
            }
        }

        // children before parents, so reverse replay recreates parents first
        rel_events.reverse();
        entity_events.reverse();

        let mut events = prop_events;
        events.extend(rel_events);
        events.extend(entity_events);

        trace!(root = %id, removed = to_unlink.len(), events = events.len(), "cascade removal");
        self.maybe_compact();
        Ok(events)
    }

    /// Read a property slot
    pub fn property_node(&self, owner: &ElementId, name: &str) -> Option<&GraphNode> {
        self.properties.get(&PropertyKey { owner: owner.clone(), name: name.to_string() })
    }

    /// Allocate or overwrite a property slot. Returns the replaced value and
    /// the slot version, which never decreases.
    pub fn set_property_node(
        &mut self,
        owner: &ElementId,
        name: &str,
        value_schema: &ElementId,
        value: Value,
        version: u64,
    ) -> (Option<Value>, u64) {
        let key = PropertyKey { owner: owner.clone(), name: name.to_string() };
        match self.properties.get_mut(&key) {
            Some(slot) => {
                let version = version.max(slot.version);
                let old = slot.value.replace(value);
                slot.version = version;
                (old, version)
            }
            None => {
                self.properties
                    .insert(key, GraphNode::property(owner.clone(), value_schema.clone(), value, version));
                (None, version)
            }
        }
    }

    /// Drop a property slot, returning it when present
    pub fn remove_property_node(&mut self, owner: &ElementId, name: &str) -> Option<GraphNode> {
        self.properties.remove(&PropertyKey { owner: owner.clone(), name: name.to_string() })
    }

    /// Names and slots of every property stored for an owner
    pub fn properties_of(&self, owner: &ElementId) -> Vec<(String, GraphNode)> {
        self.properties
            .iter()
            .filter(|(k, _)| k.owner == *owner)
            .map(|(k, v)| (k.name.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot_at(&self, i: usize) -> Option<&GraphNode> {
        self.slots.get(i)?.as_ref()
    }

    fn maybe_compact(&mut self) {
        if self.tombstones > COMPACTION_THRESHOLD {
            self.compact();
        }
    }

    /// Rebuild the slot sequence, dropping tombstones and reindexing
    fn compact(&mut self) {
        let old_index = std::mem::take(&mut self.index);
        let mut slots = Vec::with_capacity(old_index.len().saturating_sub(self.tombstones));
        let mut index = IndexMap::with_capacity(slots.capacity());
        for (id, slot) in old_index {
            if slot == TOMBSTONE {
                continue;
            }
            if let Some(node) = self.slots.get_mut(slot).and_then(Option::take) {
                index.insert(id, slots.len());
                slots.push(Some(node));
            }
        }
        trace!(domain = %self.domain, live = slots.len(), "graph compacted");
        self.slots = slots;
        self.index = index;
        self.tombstones = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(local: &str) -> ElementId {
        ElementId::new("d", local)
    }

    fn schema(name: &str) -> ElementId {
        ElementId::new("lib", name)
    }

    fn graph_with_pair() -> Hypergraph {
        let mut g = Hypergraph::new("d");
        g.add_node(&id("1"), &schema("Library"), 1).unwrap();
        g.add_node(&id("2"), &schema("Book"), 1).unwrap();
        g.add_relationship(&id("3"), &schema("Has"), &id("1"), &schema("Library"), &id("2"), &schema("Book"), 1)
            .unwrap();
        g
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut g = Hypergraph::new("d");
        g.add_node(&id("1"), &schema("Book"), 1).unwrap();
        assert!(matches!(
            g.add_node(&id("1"), &schema("Book"), 1),
            Err(HyperstoreError::DuplicateElement(_))
        ));
    }

    #[test]
    fn relationship_records_both_incident_entries() {
        let g = graph_with_pair();
        let start = g.node(&id("1")).unwrap();
        let end = g.node(&id("2")).unwrap();
        assert_eq!(start.outgoings.get(&id("3")).unwrap().end_id, id("2"));
        assert_eq!(end.incomings.get(&id("3")).unwrap().end_id, id("1"));
    }

    #[test]
    fn self_loop_is_recorded_once_with_both_direction() {
        let mut g = Hypergraph::new("d");
        g.add_node(&id("1"), &schema("Book"), 1).unwrap();
        g.add_relationship(&id("2"), &schema("Cites"), &id("1"), &schema("Book"), &id("1"), &schema("Book"), 1)
            .unwrap();
        let node = g.node(&id("1")).unwrap();
        assert_eq!(node.outgoings.get(&id("2")).unwrap().direction, Direction::Both);
        assert!(node.incomings.is_empty());
    }

    #[test]
    fn unknown_start_is_rejected_but_unknown_end_is_allowed() {
        let mut g = Hypergraph::new("d");
        g.add_node(&id("1"), &schema("Book"), 1).unwrap();
        assert!(g
            .add_relationship(&id("9"), &schema("Has"), &id("missing"), &schema("Library"), &id("1"), &schema("Book"), 1)
            .is_err());
        // the end may live in another domain
        let other: ElementId = "other:1".parse().unwrap();
        g.add_relationship(&id("2"), &schema("Refs"), &id("1"), &schema("Book"), &other, &schema("Book"), 1)
            .unwrap();
        assert!(g.has_node(&id("2")));
    }

    #[test]
    fn cascade_emits_props_then_rels_then_entities() {
        let mut g = graph_with_pair();
        g.set_property_node(&id("2"), "Title", &ElementId::new("$", "string"), "tea".into(), 5);
        let events = g
            .remove_node(&id("1"), 9, 1, false, &|s| s.eq_ignore_case(&schema("Has")))
            .unwrap();
        let names: Vec<_> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            vec!["RemoveProperty", "RemoveRelationship", "RemoveEntity", "RemoveEntity"]
        );
        // embedded cascade reaches the book; children are removed first
        assert_eq!(events[2].id(), &id("2"));
        assert_eq!(events[3].id(), &id("1"));
        assert!(events[3].is_top_level());
        assert!(!events[2].is_top_level());
        assert!(g.is_empty());
    }

    #[test]
    fn non_embedded_cascade_keeps_the_end() {
        let mut g = graph_with_pair();
        let events = g.remove_node(&id("1"), 9, 1, false, &|_| false).unwrap();
        assert_eq!(events.len(), 2);
        assert!(!g.has_node(&id("1")));
        assert!(!g.has_node(&id("3")));
        assert!(g.has_node(&id("2")));
        assert!(g.node(&id("2")).unwrap().incomings.is_empty());
    }

    #[test]
    fn suppressed_cascade_removes_only_the_requested_node() {
        let mut g = graph_with_pair();
        let events = g.remove_node(&id("3"), 9, 1, true, &|_| true).unwrap();
        assert_eq!(events.len(), 1);
        assert!(g.has_node(&id("1")));
        assert!(g.has_node(&id("2")));
        assert!(g.node(&id("1")).unwrap().outgoings.is_empty());
    }

    #[test]
    fn tombstoned_id_can_be_reused() {
        let mut g = Hypergraph::new("d");
        g.add_node(&id("1"), &schema("Book"), 1).unwrap();
        g.remove_node(&id("1"), 2, 1, false, &|_| false).unwrap();
        assert!(!g.has_node(&id("1")));
        g.add_node(&id("1"), &schema("Book"), 3).unwrap();
        assert!(g.has_node(&id("1")));
    }

    #[test]
    fn compaction_rebuilds_the_slot_sequence() {
        let mut g = Hypergraph::new("d");
        for i in 0..=COMPACTION_THRESHOLD + 1 {
            let node = ElementId::new("d", &format!("n{i}"));
            g.add_node(&node, &schema("Book"), 1).unwrap();
            g.remove_node(&node, 2, 1, false, &|_| false).unwrap();
        }
        g.add_node(&id("keep"), &schema("Book"), 1).unwrap();
        assert!(g.slot_count() < COMPACTION_THRESHOLD);
        assert!(g.has_node(&id("keep")));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn property_versions_never_decrease() {
        let mut g = Hypergraph::new("d");
        g.add_node(&id("1"), &schema("Book"), 1).unwrap();
        let s = ElementId::new("$", "string");
        let (_, v1) = g.set_property_node(&id("1"), "Title", &s, "a".into(), 10);
        let (old, v2) = g.set_property_node(&id("1"), "Title", &s, "b".into(), 5);
        assert_eq!(v1, 10);
        assert_eq!(v2, 10);
        assert_eq!(old, Some("a".into()));
    }
}
