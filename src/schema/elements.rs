//! Schema element descriptors
//!
//! Schema elements describe what may live in a domain graph: entities,
//! relationships (with cardinality and embedding), value objects and
//! primitives. Elements are immutable after registration except for the
//! reference descriptors and constraints the registry attaches to them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use super::constraints::Constraint;
use crate::domain::ModelElement;
use crate::value_objects::{Cardinality, ElementId, SchemaKind};

/// Identity of a schema element
#[derive(Debug, Clone)]
pub struct SchemaInfo {
    pub id: ElementId,
    pub name: String,
    pub kind: SchemaKind,
}

/// Default value of a property: a literal, or a thunk invoked on every read
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Computed(Rc<dyn Fn() -> Value>),
}

impl DefaultValue {
    /// Materialize the default for one read
    pub fn materialize(&self) -> Value {
        match self {
            DefaultValue::Literal(v) => v.clone(),
            DefaultValue::Computed(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(v) => write!(f, "Literal({v})"),
            DefaultValue::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// How a property produces its value
#[derive(Clone)]
pub enum PropertyKind {
    /// Stored in the graph as a property node
    Normal,
    /// Derived on every read from the owning element; never stored
    Calculated(Rc<dyn Fn(&ModelElement) -> Value>),
}

impl PropertyKind {
    pub fn is_calculated(&self) -> bool {
        matches!(self, PropertyKind::Calculated(_))
    }
}

type ValueFn = Rc<dyn Fn(&Value) -> Value>;

/// A property declared on a schema element
pub struct SchemaProperty {
    name: String,
    value_schema: ElementId,
    kind: PropertyKind,
    default: Option<DefaultValue>,
    serializer: Option<ValueFn>,
    deserializer: Option<ValueFn>,
    constraints: RefCell<Vec<Constraint>>,
}

impl SchemaProperty {
    pub(crate) fn new(
        name: String,
        value_schema: ElementId,
        kind: PropertyKind,
        default: Option<DefaultValue>,
        serializer: Option<ValueFn>,
        deserializer: Option<ValueFn>,
        constraints: Vec<Constraint>,
    ) -> Self {
        Self {
            name,
            value_schema,
            kind,
            default,
            serializer,
            deserializer,
            constraints: RefCell::new(constraints),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema id of the property's value type
    pub fn value_schema(&self) -> &ElementId {
        &self.value_schema
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn is_calculated(&self) -> bool {
        self.kind.is_calculated()
    }

    /// Materialize the declared default, when there is one
    pub fn default_value(&self) -> Option<Value> {
        self.default.as_ref().map(DefaultValue::materialize)
    }

    /// Run the property's serializer, identity when none is declared
    pub fn serialize(&self, value: &Value) -> Value {
        match &self.serializer {
            Some(f) => f(value),
            None => value.clone(),
        }
    }

    /// Run the property's deserializer, identity when none is declared
    pub fn deserialize(&self, value: &Value) -> Value {
        match &self.deserializer {
            Some(f) => f(value),
            None => value.clone(),
        }
    }

    pub fn add_constraint(&self, constraint: Constraint) {
        self.constraints.borrow_mut().push(constraint);
    }

    pub fn constraints(&self) -> Vec<Constraint> {
        self.constraints.borrow().clone()
    }
}

impl fmt::Debug for SchemaProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaProperty")
            .field("name", &self.name)
            .field("value_schema", &self.value_schema)
            .field("calculated", &self.is_calculated())
            .finish_non_exhaustive()
    }
}

/// Relationship-only part of a schema element
#[derive(Debug, Clone)]
pub struct RelationshipDef {
    pub start_schema: ElementId,
    pub end_schema: ElementId,
    pub cardinality: Cardinality,
    /// Deleting the start of an embedded relationship cascades to its end
    pub embedded: bool,
    pub start_property: Option<String>,
    pub end_property: Option<String>,
}

/// A navigation descriptor attached to a schema by the registry when a
/// relationship declares a start or end property name.
#[derive(Debug, Clone)]
pub struct SchemaReference {
    /// Property name used to navigate
    pub name: String,
    /// Relationship schema backing the navigation
    pub relationship: ElementId,
    /// True when navigation goes from the relationship's end to its start
    pub opposite: bool,
    /// True when the reachable side can hold many elements
    pub is_collection: bool,
}

/// Custom (de)serialization for a value-object schema
#[derive(Clone)]
pub struct ValueCodec {
    pub serialize: ValueFn,
    pub deserialize: ValueFn,
}

/// A registered schema element: entity, relationship, value object or
/// primitive, with its properties, references, constraints and base.
pub struct SchemaElement {
    info: SchemaInfo,
    base: Option<Rc<SchemaElement>>,
    properties: RefCell<IndexMap<String, Rc<SchemaProperty>>>,
    references: RefCell<IndexMap<String, SchemaReference>>,
    constraints: RefCell<Vec<Constraint>>,
    relationship: Option<RelationshipDef>,
    codec: Option<ValueCodec>,
}

impl SchemaElement {
    pub(crate) fn new(
        info: SchemaInfo,
        base: Option<Rc<SchemaElement>>,
        properties: Vec<SchemaProperty>,
        constraints: Vec<Constraint>,
        relationship: Option<RelationshipDef>,
        codec: Option<ValueCodec>,
    ) -> Self {
        let properties = properties
            .into_iter()
            .map(|p| (p.name().to_ascii_lowercase(), Rc::new(p)))
            .collect();
        Self {
            info,
            base,
            properties: RefCell::new(properties),
            references: RefCell::new(IndexMap::new()),
            constraints: RefCell::new(constraints),
            relationship,
            codec,
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.info.id
    }

    /// Unqualified name of the schema element
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn kind(&self) -> SchemaKind {
        self.info.kind
    }

    /// Relationship descriptor; `None` for non-relationship schemas
    pub fn relationship(&self) -> Option<&RelationshipDef> {
        self.relationship.as_ref()
    }

    /// Walk the base chain testing for the given schema id
    pub fn is_a(&self, schema_id: &ElementId) -> bool {
        let mut current = Some(self);
        while let Some(el) = current {
            if el.info.id.eq_ignore_case(schema_id) {
                return true;
            }
            current = el.base.as_deref();
        }
        false
    }

    /// Look a property up by name, searching the base chain bottom-up when
    /// `recurse` is set
    pub fn property(&self, name: &str, recurse: bool) -> Option<Rc<SchemaProperty>> {
        let key = name.to_ascii_lowercase();
        if let Some(p) = self.properties.borrow().get(&key) {
            return Some(Rc::clone(p));
        }
        if recurse {
            if let Some(base) = &self.base {
                return base.property(name, true);
            }
        }
        None
    }

    /// All properties, inherited ones first
    pub fn properties(&self, include_inherited: bool) -> Vec<Rc<SchemaProperty>> {
        let mut out = Vec::new();
        if include_inherited {
            if let Some(base) = &self.base {
                out.extend(base.properties(true));
            }
        }
        out.extend(self.properties.borrow().values().cloned());
        out
    }

    /// Look a reference descriptor up by name
    pub fn reference(&self, name: &str, recurse: bool) -> Option<SchemaReference> {
        let key = name.to_ascii_lowercase();
        if let Some(r) = self.references.borrow().get(&key) {
            return Some(r.clone());
        }
        if recurse {
            if let Some(base) = &self.base {
                return base.reference(name, true);
            }
        }
        None
    }

    /// All reference descriptors, inherited ones first
    pub fn references(&self, include_inherited: bool) -> Vec<SchemaReference> {
        let mut out = Vec::new();
        if include_inherited {
            if let Some(base) = &self.base {
                out.extend(base.references(true));
            }
        }
        out.extend(self.references.borrow().values().cloned());
        out
    }

    /// Declare an additional property on a registered schema
    pub fn add_property(&self, property: SchemaProperty) -> Rc<SchemaProperty> {
        let key = property.name().to_ascii_lowercase();
        let rc = Rc::new(property);
        self.properties.borrow_mut().insert(key, Rc::clone(&rc));
        rc
    }

    pub(crate) fn add_reference(&self, reference: SchemaReference) {
        let key = reference.name.to_ascii_lowercase();
        self.references.borrow_mut().insert(key, reference);
    }

    pub fn add_constraint(&self, constraint: Constraint) {
        self.constraints.borrow_mut().push(constraint);
    }

    /// Element-level constraints (not property-scoped ones)
    pub fn constraints(&self) -> Vec<Constraint> {
        self.constraints.borrow().clone()
    }

    /// Serialize a value through the schema codec, identity when none
    pub fn serialize_value(&self, value: &Value) -> Value {
        match &self.codec {
            Some(c) => (c.serialize)(value),
            None => value.clone(),
        }
    }

    /// Deserialize a value through the schema codec, identity when none
    pub fn deserialize_value(&self, value: &Value) -> Value {
        match &self.codec {
            Some(c) => (c.deserialize)(value),
            None => value.clone(),
        }
    }
}

impl fmt::Debug for SchemaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaElement")
            .field("id", &self.info.id)
            .field("kind", &self.info.kind)
            .field("properties", &self.properties.borrow().len())
            .field("references", &self.references.borrow().len())
            .finish_non_exhaustive()
    }
}
