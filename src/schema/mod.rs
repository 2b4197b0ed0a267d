//! Schema registry and schema builders
//!
//! The registry interns schema elements by id and by unqualified name, with
//! duplicate and ambiguity detection, indexes relationships by their start
//! and end schemas, and attaches navigation descriptors when a relationship
//! declares start/end property names.

pub mod constraints;
pub mod elements;

pub use constraints::{
    Constraint, ConstraintContext, ConstraintKind, DiagnosticMessage, DiagnosticSeverity,
};
pub use elements::{
    DefaultValue, PropertyKind, RelationshipDef, SchemaElement, SchemaInfo, SchemaProperty,
    SchemaReference, ValueCodec,
};

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::domain::ModelElement;
use crate::errors::{HyperstoreError, Result};
use crate::value_objects::{Cardinality, ElementId, SchemaKind};

/// Namespace reserved for the built-in primitive schemas
pub const PRIMITIVE_NAMESPACE: &str = "$";

/// Simple-name entry; a collision poisons the name for good
enum NameEntry {
    Unique(ElementId),
    Ambiguous,
}

/// Interning registry for schema elements
pub struct SchemaRegistry {
    by_id: IndexMap<String, Rc<SchemaElement>>,
    by_name: HashMap<String, NameEntry>,
    rels_by_start: HashMap<ElementId, Vec<ElementId>>,
    rels_by_end: HashMap<ElementId, Vec<ElementId>>,
}

impl SchemaRegistry {
    pub(crate) fn new() -> Self {
        let mut registry = Self {
            by_id: IndexMap::new(),
            by_name: HashMap::new(),
            rels_by_start: HashMap::new(),
            rels_by_end: HashMap::new(),
        };
        for name in ["string", "number", "boolean", "any"] {
            let info = SchemaInfo {
                id: ElementId::new(PRIMITIVE_NAMESPACE, name),
                name: name.to_string(),
                kind: SchemaKind::Primitive,
            };
            let el = SchemaElement::new(info, None, Vec::new(), Vec::new(), None, None);
            registry
                .intern(el)
                .expect("primitive registration cannot collide in an empty registry");
        }
        registry
    }

    /// Register a finished schema element
    fn intern(&mut self, element: SchemaElement) -> Result<Rc<SchemaElement>> {
        let id = element.id().clone();
        let id_key = id.as_str().to_ascii_lowercase();
        if self.by_id.contains_key(&id_key) {
            return Err(HyperstoreError::DuplicateSchema(id.to_string()));
        }

        let name_key = element.name().to_ascii_lowercase();
        if self.by_name.contains_key(&name_key) {
            self.by_name.insert(name_key, NameEntry::Ambiguous);
        } else {
            self.by_name.insert(name_key, NameEntry::Unique(id.clone()));
        }

        if let Some(def) = element.relationship() {
            self.rels_by_start
                .entry(def.start_schema.clone())
                .or_default()
                .push(id.clone());
            self.rels_by_end.entry(def.end_schema.clone()).or_default().push(id.clone());
        }

        debug!(schema = %id, kind = %element.kind(), "schema registered");
        let rc = Rc::new(element);
        self.by_id.insert(id_key, Rc::clone(&rc));
        Ok(rc)
    }

    /// Resolve a schema by full id or by unambiguous simple name
    pub fn get_schema_info(&self, name: &str) -> Result<Rc<SchemaElement>> {
        if name.contains(':') {
            return self
                .by_id
                .get(&name.to_ascii_lowercase())
                .cloned()
                .ok_or_else(|| HyperstoreError::UnknownSchema(name.to_string()));
        }
        match self.by_name.get(&name.to_ascii_lowercase()) {
            Some(NameEntry::Unique(id)) => self
                .by_id
                .get(&id.as_str().to_ascii_lowercase())
                .cloned()
                .ok_or_else(|| HyperstoreError::UnknownSchema(name.to_string())),
            Some(NameEntry::Ambiguous) => Err(HyperstoreError::AmbiguousSchema(name.to_string())),
            None => Err(HyperstoreError::UnknownSchema(name.to_string())),
        }
    }

    /// Non-throwing lookup; `None` covers both unknown and ambiguous names
    pub fn try_get_schema_info(&self, name: &str) -> Option<Rc<SchemaElement>> {
        self.get_schema_info(name).ok()
    }

    /// Resolve a schema that describes graph elements (entity or relationship)
    pub fn get_schema_element(&self, name: &str) -> Result<Rc<SchemaElement>> {
        let el = self.get_schema_info(name)?;
        match el.kind() {
            SchemaKind::Entity | SchemaKind::Relationship => Ok(el),
            kind => Err(HyperstoreError::TypeMismatch(format!(
                "'{name}' is a {kind} schema, not a graph element schema"
            ))),
        }
    }

    /// Resolve an entity schema
    pub fn get_schema_entity(&self, name: &str) -> Result<Rc<SchemaElement>> {
        let el = self.get_schema_info(name)?;
        if el.kind() == SchemaKind::Entity {
            Ok(el)
        } else {
            Err(HyperstoreError::TypeMismatch(format!("'{name}' is not an entity schema")))
        }
    }

    /// Resolve a relationship schema
    pub fn get_schema_relationship(&self, name: &str) -> Result<Rc<SchemaElement>> {
        let el = self.get_schema_info(name)?;
        if el.kind() == SchemaKind::Relationship {
            Ok(el)
        } else {
            Err(HyperstoreError::TypeMismatch(format!("'{name}' is not a relationship schema")))
        }
    }

    /// Relationship schemas whose declared start/end accept the given
    /// schemas, derived schemas included
    pub fn get_schema_relationships(
        &self,
        start: Option<&ElementId>,
        end: Option<&ElementId>,
    ) -> Vec<Rc<SchemaElement>> {
        let start_el = start.and_then(|id| self.try_get_schema_info(id.as_str()));
        let end_el = end.and_then(|id| self.try_get_schema_info(id.as_str()));

        let accepts = |schema: &Option<Rc<SchemaElement>>,
                       requested: Option<&ElementId>,
                       declared: &ElementId| match (schema, requested) {
            (Some(s), _) => s.is_a(declared),
            (None, Some(id)) => id.eq_ignore_case(declared),
            (None, None) => true,
        };

        // walk whichever terminal index the caller constrained
        let by_end_only = start.is_none() && end.is_some();
        let index = if by_end_only { &self.rels_by_end } else { &self.rels_by_start };

        let mut out = Vec::new();
        for (declared, rel_ids) in index {
            let indexed_ok = if by_end_only {
                accepts(&end_el, end, declared)
            } else {
                accepts(&start_el, start, declared)
            };
            if !indexed_ok {
                continue;
            }
            for rel_id in rel_ids {
                let rel = match self.try_get_schema_info(rel_id.as_str()) {
                    Some(r) => r,
                    None => continue,
                };
                let other_ok = rel
                    .relationship()
                    .map(|def| {
                        if by_end_only {
                            accepts(&start_el, start, &def.start_schema)
                        } else {
                            accepts(&end_el, end, &def.end_schema)
                        }
                    })
                    .unwrap_or(false);
                if other_ok {
                    out.push(rel);
                }
            }
        }
        out
    }

    /// All registered schema elements
    pub fn all(&self) -> Vec<Rc<SchemaElement>> {
        self.by_id.values().cloned().collect()
    }

    /// Register an entity schema
    pub fn define_entity(&mut self, builder: SchemaEntityBuilder) -> Result<Rc<SchemaElement>> {
        let base = builder.base.as_deref().map(|b| self.get_schema_element(b)).transpose()?;
        let properties = builder
            .properties
            .into_iter()
            .map(|p| p.build(self))
            .collect::<Result<Vec<_>>>()?;
        let info = SchemaInfo {
            id: ElementId::new(&builder.namespace, &builder.name),
            name: builder.name,
            kind: SchemaKind::Entity,
        };
        self.intern(SchemaElement::new(info, base, properties, builder.constraints, None, None))
    }

    /// Register a relationship schema and attach its navigation descriptors
    pub fn define_relationship(
        &mut self,
        builder: SchemaRelationshipBuilder,
    ) -> Result<Rc<SchemaElement>> {
        let start = self.get_schema_element(&builder.start)?;
        let end = self.get_schema_element(&builder.end)?;
        let properties = builder
            .properties
            .into_iter()
            .map(|p| p.build(self))
            .collect::<Result<Vec<_>>>()?;
        let def = RelationshipDef {
            start_schema: start.id().clone(),
            end_schema: end.id().clone(),
            cardinality: builder.cardinality,
            embedded: builder.embedded,
            start_property: builder.start_property,
            end_property: builder.end_property,
        };
        let id = ElementId::new(&builder.namespace, &builder.name);
        let info = SchemaInfo { id: id.clone(), name: builder.name, kind: SchemaKind::Relationship };
        let element = self.intern(SchemaElement::new(
            info,
            None,
            properties,
            builder.constraints,
            Some(def.clone()),
            None,
        ))?;

        if let Some(name) = &def.start_property {
            start.add_reference(SchemaReference {
                name: name.clone(),
                relationship: id.clone(),
                opposite: false,
                is_collection: def.cardinality.many_end(),
            });
        }
        if let Some(name) = &def.end_property {
            end.add_reference(SchemaReference {
                name: name.clone(),
                relationship: id,
                opposite: true,
                is_collection: def.cardinality.many_start(),
            });
        }
        Ok(element)
    }

    /// Register a value-object schema, optionally with a custom codec
    pub fn define_value_object(
        &mut self,
        builder: SchemaValueObjectBuilder,
    ) -> Result<Rc<SchemaElement>> {
        let info = SchemaInfo {
            id: ElementId::new(&builder.namespace, &builder.name),
            name: builder.name,
            kind: SchemaKind::ValueObject,
        };
        self.intern(SchemaElement::new(info, None, Vec::new(), Vec::new(), None, builder.codec))
    }
}

/// Builder for a property declaration
pub struct SchemaPropertyBuilder {
    name: String,
    value_schema: String,
    default: Option<DefaultValue>,
    serializer: Option<Rc<dyn Fn(&Value) -> Value>>,
    deserializer: Option<Rc<dyn Fn(&Value) -> Value>>,
    calculated: Option<Rc<dyn Fn(&ModelElement) -> Value>>,
    constraints: Vec<Constraint>,
}

impl SchemaPropertyBuilder {
    /// `value_schema` names a value-object or primitive schema, by full id
    /// or unambiguous simple name (`"string"`, `"number"`, ...)
    pub fn new(name: impl Into<String>, value_schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_schema: value_schema.into(),
            default: None,
            serializer: None,
            deserializer: None,
            calculated: None,
            constraints: Vec::new(),
        }
    }

    pub fn default_literal(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Literal(value));
        self
    }

    /// Default produced by a thunk invoked on every read
    pub fn default_computed(mut self, f: impl Fn() -> Value + 'static) -> Self {
        self.default = Some(DefaultValue::Computed(Rc::new(f)));
        self
    }

    pub fn serializer(mut self, f: impl Fn(&Value) -> Value + 'static) -> Self {
        self.serializer = Some(Rc::new(f));
        self
    }

    pub fn deserializer(mut self, f: impl Fn(&Value) -> Value + 'static) -> Self {
        self.deserializer = Some(Rc::new(f));
        self
    }

    /// Derive the value from the owning element on every read
    pub fn calculated(mut self, f: impl Fn(&ModelElement) -> Value + 'static) -> Self {
        self.calculated = Some(Rc::new(f));
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    fn build(self, registry: &SchemaRegistry) -> Result<SchemaProperty> {
        let value_el = registry.get_schema_info(&self.value_schema)?;
        match value_el.kind() {
            SchemaKind::ValueObject | SchemaKind::Primitive => {}
            kind => {
                return Err(HyperstoreError::TypeMismatch(format!(
                    "property '{}' needs a value schema, got {kind} '{}'",
                    self.name, self.value_schema
                )))
            }
        }
        let kind = match self.calculated {
            Some(f) => PropertyKind::Calculated(f),
            None => PropertyKind::Normal,
        };
        Ok(SchemaProperty::new(
            self.name,
            value_el.id().clone(),
            kind,
            self.default,
            self.serializer,
            self.deserializer,
            self.constraints,
        ))
    }
}

/// Builder for an entity schema
pub struct SchemaEntityBuilder {
    namespace: String,
    name: String,
    base: Option<String>,
    properties: Vec<SchemaPropertyBuilder>,
    constraints: Vec<Constraint>,
}

impl SchemaEntityBuilder {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            base: None,
            properties: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Single-inheritance base, by id or unambiguous simple name
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn property(mut self, property: SchemaPropertyBuilder) -> Self {
        self.properties.push(property);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Builder for a relationship schema
pub struct SchemaRelationshipBuilder {
    namespace: String,
    name: String,
    start: String,
    end: String,
    cardinality: Cardinality,
    embedded: bool,
    start_property: Option<String>,
    end_property: Option<String>,
    properties: Vec<SchemaPropertyBuilder>,
    constraints: Vec<Constraint>,
}

impl SchemaRelationshipBuilder {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            start: start.into(),
            end: end.into(),
            cardinality: Cardinality::OneToOne,
            embedded: false,
            start_property: None,
            end_property: None,
            properties: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Deleting the start cascades to the end
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Navigation property attached to the start schema
    pub fn start_property(mut self, name: impl Into<String>) -> Self {
        self.start_property = Some(name.into());
        self
    }

    /// Navigation property attached to the end schema
    pub fn end_property(mut self, name: impl Into<String>) -> Self {
        self.end_property = Some(name.into());
        self
    }

    pub fn property(mut self, property: SchemaPropertyBuilder) -> Self {
        self.properties.push(property);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Builder for a value-object schema
pub struct SchemaValueObjectBuilder {
    namespace: String,
    name: String,
    codec: Option<ValueCodec>,
}

impl SchemaValueObjectBuilder {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into(), codec: None }
    }

    pub fn codec(
        mut self,
        serialize: impl Fn(&Value) -> Value + 'static,
        deserialize: impl Fn(&Value) -> Value + 'static,
    ) -> Self {
        self.codec = Some(ValueCodec {
            serialize: Rc::new(serialize),
            deserialize: Rc::new(deserialize),
        });
        self
    }
}
