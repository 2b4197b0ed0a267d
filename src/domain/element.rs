//! Materialized model elements
//!
//! A [`ModelElement`] is a lightweight handle over a graph node, materialized
//! on demand through the domain cache. Elements cross-reference arbitrarily;
//! cycles are resolved by keying everything on ids, so a handle never holds
//! another element, only ids.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use super::{Domain, DomainInner};
use crate::errors::{HyperstoreError, Result};
use crate::queries::Cursor;
use crate::schema::SchemaElement;
use crate::value_objects::{ElementId, PropertyValue};

pub(crate) struct ElementInner {
    pub(crate) id: ElementId,
    pub(crate) schema_id: ElementId,
    pub(crate) start_id: Option<ElementId>,
    pub(crate) start_schema_id: Option<ElementId>,
    pub(crate) end_id: Option<ElementId>,
    pub(crate) end_schema_id: Option<ElementId>,
    pub(crate) domain: Weak<DomainInner>,
    pub(crate) disposed: Cell<bool>,
}

/// Handle on a live entity or relationship.
///
/// Handles are cheap to clone and shared through the domain cache; removing
/// the underlying node disposes every outstanding handle.
#[derive(Clone)]
pub struct ModelElement {
    inner: Rc<ElementInner>,
}

impl ModelElement {
    pub(crate) fn new(inner: ElementInner) -> Self {
        Self { inner: Rc::new(inner) }
    }

    pub fn id(&self) -> &ElementId {
        &self.inner.id
    }

    pub fn schema_id(&self) -> &ElementId {
        &self.inner.schema_id
    }

    /// Start element id; relationships only
    pub fn start_id(&self) -> Option<&ElementId> {
        self.inner.start_id.as_ref()
    }

    /// End element id; relationships only
    pub fn end_id(&self) -> Option<&ElementId> {
        self.inner.end_id.as_ref()
    }

    pub fn start_schema_id(&self) -> Option<&ElementId> {
        self.inner.start_schema_id.as_ref()
    }

    pub fn end_schema_id(&self) -> Option<&ElementId> {
        self.inner.end_schema_id.as_ref()
    }

    pub fn is_relationship(&self) -> bool {
        self.inner.start_id.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub(crate) fn dispose(&self) {
        self.inner.disposed.set(true);
    }

    /// The owning domain
    pub fn domain(&self) -> Result<Domain> {
        Ok(Domain { inner: self.live_domain()? })
    }

    pub(crate) fn live_domain(&self) -> Result<Rc<DomainInner>> {
        if self.inner.disposed.get() {
            return Err(HyperstoreError::DisposedElement(self.inner.id.clone()));
        }
        self.inner
            .domain
            .upgrade()
            .ok_or_else(|| HyperstoreError::DisposedElement(self.inner.id.clone()))
    }

    /// The element's schema
    pub fn schema(&self) -> Result<Rc<SchemaElement>> {
        let domain = self.live_domain()?;
        let store = domain.store()?;
        let schemas = store.schemas.borrow();
        schemas.get_schema_info(self.inner.schema_id.as_str())
    }

    /// Read a property; absent slots materialize the schema default
    pub fn get_property_value(&self, property: &str) -> Result<PropertyValue> {
        let domain = self.live_domain()?;
        DomainInner::get_property_value(&domain, &self.inner.id, property)
    }

    /// Write a property inside the active session
    pub fn set_property_value(&self, property: &str, value: Value) -> Result<PropertyValue> {
        let domain = self.live_domain()?;
        DomainInner::set_property_value(&domain, &self.inner.id, property, value, None)
    }

    /// Elements reachable through a named reference of this element's schema
    pub fn related(&self, reference: &str) -> Result<Vec<ModelElement>> {
        let domain = self.live_domain()?;
        let store = domain.store()?;
        let schema = {
            let schemas = store.schemas.borrow();
            schemas.get_schema_info(self.inner.schema_id.as_str())?
        };
        let descriptor = schema.reference(reference, true).ok_or_else(|| {
            HyperstoreError::InvalidArgument(format!(
                "unknown reference '{reference}' on schema {}",
                schema.id()
            ))
        })?;

        let (start, end) = if descriptor.opposite {
            (None, Some(&self.inner.id))
        } else {
            (Some(&self.inner.id), None)
        };
        let mut rels = DomainInner::find_relationships(
            &domain,
            Some(descriptor.relationship.as_str()),
            start,
            end,
        )?;

        let mut out = Vec::new();
        while rels.has_next() {
            let rel = match rels.next() {
                Some(r) => r,
                None => break,
            };
            let other = if descriptor.opposite { rel.start_id() } else { rel.end_id() };
            let other = match other {
                Some(id) => id.clone(),
                None => continue,
            };
            let resolved = if other.domain() == domain.name() {
                domain.get(&other)
            } else {
                store.domain_inner(other.domain()).and_then(|d| d.get(&other))
            };
            if let Some(el) = resolved {
                out.push(el);
            }
        }
        Ok(out)
    }

    /// Serialize this element and its reachable neighborhood to JSON
    pub fn stringify(&self) -> Result<Value> {
        crate::infrastructure::json::stringify(self)
    }
}

impl PartialEq for ModelElement {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ModelElement {}

impl fmt::Debug for ModelElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelElement")
            .field("id", &self.inner.id)
            .field("schema_id", &self.inner.schema_id)
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
