//! Value objects of the model store
//!
//! Value objects are immutable types compared by value rather than identity:
//! element ids, schema kinds, node kinds, relationship cardinalities and the
//! property-value triple returned by property accessors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;
use std::str::FromStr;

/// Identifier of a graph element or schema element.
///
/// Every id has the form `<domain>:<localPart>`. The local part is either a
/// minted sequence number or a caller-supplied token. Ids are cheap to clone
/// and hash; the backing string is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ElementId {
    full: Rc<str>,
    sep: usize,
}

impl ElementId {
    /// Build an id from a domain name and a local part
    pub fn new(domain: &str, local: &str) -> Self {
        let full: Rc<str> = Rc::from(format!("{domain}:{local}"));
        Self { sep: domain.len(), full }
    }

    /// The domain (or schema namespace) part
    pub fn domain(&self) -> &str {
        &self.full[..self.sep]
    }

    /// The local part after the first `:`
    pub fn local(&self) -> &str {
        &self.full[self.sep + 1..]
    }

    /// The full `<domain>:<local>` form
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// The local part parsed as a sequence number, when numeric
    pub fn numeric_local(&self) -> Option<u64> {
        self.local().parse().ok()
    }

    /// Case-insensitive id equality
    pub fn eq_ignore_case(&self, other: &ElementId) -> bool {
        self.full.eq_ignore_ascii_case(&other.full)
    }
}

impl FromStr for ElementId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.find(':') {
            Some(sep) => Ok(Self { full: Rc::from(s), sep }),
            None => Ok(Self::new("", s)),
        }
    }
}

impl From<String> for ElementId {
    fn from(s: String) -> Self {
        s.parse().expect("element id parse is infallible")
    }
}

impl From<ElementId> for String {
    fn from(id: ElementId) -> Self {
        id.full.to_string()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.full)
    }
}

/// Kind of a schema element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaKind {
    /// Entity schemas become graph nodes
    Entity,
    /// Relationship schemas become graph edges (which are themselves nodes)
    Relationship,
    /// Value objects type property values and may carry custom codecs
    ValueObject,
    /// Built-in property types (`string`, `number`, `boolean`, `any`)
    Primitive,
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaKind::Entity => "entity",
            SchemaKind::Relationship => "relationship",
            SchemaKind::ValueObject => "valueObject",
            SchemaKind::Primitive => "primitive",
        };
        f.write_str(s)
    }
}

/// Kind mask of a graph node; used to filter node scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeKind(u8);

impl NodeKind {
    /// Entity node
    pub const NODE: NodeKind = NodeKind(1);
    /// Relationship node
    pub const EDGE: NodeKind = NodeKind(2);
    /// Property node
    pub const PROPERTY: NodeKind = NodeKind(4);
    /// Entity or relationship node
    pub const NODE_OR_EDGE: NodeKind = NodeKind(1 | 2);

    /// True when the two masks share at least one kind bit
    pub fn intersects(self, other: NodeKind) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for NodeKind {
    type Output = NodeKind;

    fn bitor(self, rhs: NodeKind) -> NodeKind {
        NodeKind(self.0 | rhs.0)
    }
}

/// Direction of an incident-edge entry on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    /// Self-loop; a single entry on the source covers both directions
    Both,
}

/// Cardinality of a relationship schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    /// True when the end side can hold many elements (the start-side
    /// reference is a collection)
    pub fn many_end(self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }

    /// True when the start side can hold many elements (the end-side
    /// reference is a collection)
    pub fn many_start(self) -> bool {
        matches!(self, Cardinality::ManyToOne | Cardinality::ManyToMany)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::OneToOne => "1-1",
            Cardinality::OneToMany => "1-*",
            Cardinality::ManyToOne => "*-1",
            Cardinality::ManyToMany => "*-*",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a property read or write: the current value, the value it
/// replaced (writes only) and the version stamp of the slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    /// Current value; absent when the property was never set and the schema
    /// declares no default
    pub value: Option<Value>,
    /// Previous value replaced by a write
    pub old_value: Option<Value>,
    /// Version stamp; 0 for a materialized default
    pub version: u64,
}

impl PropertyValue {
    pub(crate) fn new(value: Option<Value>, old_value: Option<Value>, version: u64) -> Self {
        Self { value, old_value, version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_id_splits_on_first_colon() {
        let id: ElementId = "lib:a:b".parse().unwrap();
        assert_eq!(id.domain(), "lib");
        assert_eq!(id.local(), "a:b");
    }

    #[test]
    fn element_id_numeric_local() {
        let id = ElementId::new("d", "42");
        assert_eq!(id.numeric_local(), Some(42));
        assert_eq!(ElementId::new("d", "book").numeric_local(), None);
    }

    #[test]
    fn node_kind_mask() {
        assert!(NodeKind::NODE_OR_EDGE.intersects(NodeKind::EDGE));
        assert!(!NodeKind::PROPERTY.intersects(NodeKind::NODE_OR_EDGE));
        assert!((NodeKind::NODE | NodeKind::PROPERTY).intersects(NodeKind::PROPERTY));
    }

    #[test]
    fn cardinality_collection_sides() {
        assert!(Cardinality::OneToMany.many_end());
        assert!(!Cardinality::OneToMany.many_start());
        assert!(Cardinality::ManyToMany.many_start());
    }
}
