//! Domains: the mutation facade over a hypergraph
//!
//! A domain owns a hypergraph, mints ids, materializes elements through a
//! cache, and appends an event to the ambient session for every change it
//! makes. Mutations that run without an active session open and close a
//! one-shot session around themselves.

pub mod element;

pub use element::ModelElement;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregate::{GraphNode, Hypergraph};
use crate::errors::{HyperstoreError, Result};
use crate::events::ModelEvent;
use crate::infrastructure::{json, DomainAdapter};
use crate::queries::{ArrayCursor, Cursor, FilterConfig, NodesCursor, Query};
use crate::schema::{ConstraintContext, ConstraintKind, PropertyKind, SchemaElement};
use crate::session::{SessionConfig, SessionMode};
use crate::store::StoreInner;
use crate::value_objects::{Direction, ElementId, NodeKind, PropertyValue};

use element::ElementInner;

pub(crate) struct DomainInner {
    pub(crate) name: String,
    pub(crate) store: Weak<StoreInner>,
    pub(crate) graph: Rc<RefCell<Hypergraph>>,
    pub(crate) weak_self: Weak<DomainInner>,
    seq: Cell<u64>,
    cache: RefCell<HashMap<ElementId, ModelElement>>,
    adapters: RefCell<Vec<Rc<dyn DomainAdapter>>>,
    adapter_cookie: Cell<Option<u32>>,
    disposed: Cell<bool>,
}

impl DomainInner {
    pub(crate) fn create(name: String, store: Weak<StoreInner>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            graph: Rc::new(RefCell::new(Hypergraph::new(name.clone()))),
            name,
            store,
            weak_self: weak_self.clone(),
            seq: Cell::new(0),
            cache: RefCell::new(HashMap::new()),
            adapters: RefCell::new(Vec::new()),
            adapter_cookie: Cell::new(None),
            disposed: Cell::new(false),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.seq.get()
    }

    pub(crate) fn store(&self) -> Result<Rc<StoreInner>> {
        self.store
            .upgrade()
            .ok_or_else(|| HyperstoreError::InvalidElement("the owning store has been dropped".into()))
    }

    fn ensure_usable(&self, id: &ElementId) -> Result<()> {
        if self.disposed.get() {
            return Err(HyperstoreError::DisposedElement(id.clone()));
        }
        Ok(())
    }

    /// Mint or recover an id. A numeric caller-supplied local part raises the
    /// sequence counter so later minted ids never collide with loaded ones.
    pub(crate) fn create_id(&self, requested: Option<&str>) -> ElementId {
        match requested {
            Some(local) => {
                if let Ok(n) = local.parse::<u64>() {
                    if n > self.seq.get() {
                        self.seq.set(n);
                    }
                }
                ElementId::new(&self.name, local)
            }
            None => {
                let n = self.seq.get() + 1;
                self.seq.set(n);
                ElementId::new(&self.name, &n.to_string())
            }
        }
    }

    pub(crate) fn emit(&self, event: ModelEvent) -> Result<()> {
        self.store()?.push_event(event)
    }

    pub(crate) fn materialize(&self, node: &GraphNode) -> ModelElement {
        if let Some(el) = self.cache.borrow().get(&node.id) {
            if !el.is_disposed() {
                return el.clone();
            }
        }
        let el = ModelElement::new(ElementInner {
            id: node.id.clone(),
            schema_id: node.schema_id.clone(),
            start_id: node.start_id.clone(),
            start_schema_id: node.start_schema_id.clone(),
            end_id: node.end_id.clone(),
            end_schema_id: node.end_schema_id.clone(),
            domain: self.weak_self.clone(),
            disposed: Cell::new(false),
        });
        self.cache.borrow_mut().insert(node.id.clone(), el.clone());
        el
    }

    pub(crate) fn get(&self, id: &ElementId) -> Option<ModelElement> {
        if self.disposed.get() {
            return None;
        }
        if let Some(el) = self.cache.borrow().get(id) {
            if !el.is_disposed() {
                return Some(el.clone());
            }
        }
        let node = self.graph.borrow().node(id).cloned()?;
        Some(self.materialize(&node))
    }

    pub(crate) fn element_exists(&self, id: &ElementId) -> bool {
        !self.disposed.get() && self.graph.borrow().has_node(id)
    }

    pub(crate) fn create_entity(
        &self,
        schema: &str,
        requested_id: Option<&str>,
        version: Option<u64>,
    ) -> Result<ModelElement> {
        let store = self.store()?;
        store.run_in_session(SessionConfig::default(), || {
            let schema_el = {
                let schemas = store.schemas.borrow();
                schemas.get_schema_entity(schema)?
            };
            let id = self.create_id(requested_id);
            self.ensure_usable(&id)?;
            let version = version.unwrap_or_else(|| store.tick());
            self.graph.borrow_mut().add_node(&id, schema_el.id(), version)?;
            self.emit(ModelEvent::AddEntity {
                domain: self.name.clone(),
                id: id.clone(),
                schema_id: schema_el.id().clone(),
                correlation_id: store.current_session_id(),
                version,
                top_level: true,
            })?;
            debug!(domain = %self.name, element = %id, schema = %schema_el.id(), "entity created");
            let node = GraphNode::entity(id, schema_el.id().clone(), version);
            Ok(self.materialize(&node))
        })
    }

    pub(crate) fn create_relationship(
        &self,
        schema: &str,
        start: &ElementId,
        end: &ElementId,
        end_schema: Option<&ElementId>,
        requested_id: Option<&str>,
        version: Option<u64>,
    ) -> Result<ModelElement> {
        let store = self.store()?;
        store.run_in_session(SessionConfig::default(), || {
            let (schema_el, def) = {
                let schemas = store.schemas.borrow();
                let el = schemas.get_schema_relationship(schema)?;
                let def = el.relationship().cloned().ok_or_else(|| {
                    HyperstoreError::TypeMismatch(format!("'{schema}' has no relationship definition"))
                })?;
                (el, def)
            };
            if start.domain() != self.name {
                return Err(HyperstoreError::InvalidElement(format!(
                    "start element {start} does not belong to domain '{}'",
                    self.name
                )));
            }
            let (start_schema_id, end_schema_id) = {
                let graph = self.graph.borrow();
                let start_node = graph.node(start).ok_or_else(|| {
                    HyperstoreError::InvalidElement(format!("unknown start element {start}"))
                })?;
                let start_schema_id = start_node.schema_id.clone();
                let end_schema_id = graph
                    .node(end)
                    .map(|n| n.schema_id.clone())
                    .or_else(|| end_schema.cloned())
                    .unwrap_or_else(|| def.end_schema.clone());
                (start_schema_id, end_schema_id)
            };
            {
                let schemas = store.schemas.borrow();
                let start_schema = schemas.get_schema_info(start_schema_id.as_str())?;
                if !start_schema.is_a(&def.start_schema) {
                    return Err(HyperstoreError::TypeMismatch(format!(
                        "start element {start} is a {start_schema_id}, expected {}",
                        def.start_schema
                    )));
                }
            }

            let id = self.create_id(requested_id);
            self.ensure_usable(&id)?;
            let version = version.unwrap_or_else(|| store.tick());
            self.graph.borrow_mut().add_relationship(
                &id,
                schema_el.id(),
                start,
                &start_schema_id,
                end,
                &end_schema_id,
                version,
            )?;
            self.emit(ModelEvent::AddRelationship {
                domain: self.name.clone(),
                id: id.clone(),
                schema_id: schema_el.id().clone(),
                start_id: start.clone(),
                start_schema_id: start_schema_id.clone(),
                end_id: end.clone(),
                end_schema_id: end_schema_id.clone(),
                correlation_id: store.current_session_id(),
                version,
                top_level: true,
            })?;
            debug!(domain = %self.name, relationship = %id, start = %start, end = %end, "relationship created");
            let node = GraphNode::edge(
                id,
                schema_el.id().clone(),
                start.clone(),
                start_schema_id,
                end.clone(),
                end_schema_id,
                version,
            );
            Ok(self.materialize(&node))
        })
    }

    pub(crate) fn remove(&self, id: &ElementId, version: Option<u64>) -> Result<()> {
        let store = self.store()?;
        store.run_in_session(SessionConfig::default(), || {
            self.ensure_usable(id)?;
            let mode = store.current_mode();
            let suppress = mode.is_undo_or_redo() || mode.contains(SessionMode::ROLLBACK);
            let version = version.unwrap_or_else(|| store.tick());
            let correlation_id = store.current_session_id();

            let store_for_embedded = Rc::clone(&store);
            let is_embedded = move |schema_id: &ElementId| {
                store_for_embedded
                    .schemas
                    .borrow()
                    .try_get_schema_info(schema_id.as_str())
                    .and_then(|el| el.relationship().map(|d| d.embedded))
                    .unwrap_or(false)
            };

            let events = self.graph.borrow_mut().remove_node(
                id,
                version,
                correlation_id,
                suppress,
                &is_embedded,
            )?;
            for event in &events {
                self.emit(event.clone())?;
            }
            self.dispose_removed(&events);
            debug!(domain = %self.name, element = %id, cascade = events.len(), "element removed");
            Ok(())
        })
    }

    fn dispose_removed(&self, events: &[ModelEvent]) {
        let mut cache = self.cache.borrow_mut();
        for event in events {
            match event {
                ModelEvent::RemoveEntity { id, .. } | ModelEvent::RemoveRelationship { id, .. } => {
                    if let Some(el) = cache.remove(id) {
                        el.dispose();
                    }
                }
                _ => {}
            }
        }
    }

    fn resolve_property(
        &self,
        owner: &ElementId,
        property: &str,
    ) -> Result<(Rc<SchemaElement>, Rc<crate::schema::SchemaProperty>, ElementId, u64)> {
        let store = self.store()?;
        let (schema_id, version) = {
            let graph = self.graph.borrow();
            let node = graph
                .node(owner)
                .ok_or_else(|| HyperstoreError::InvalidElement(format!("unknown element {owner}")))?;
            (node.schema_id.clone(), node.version)
        };
        let schemas = store.schemas.borrow();
        let schema_el = schemas.get_schema_info(schema_id.as_str())?;
        let prop = schema_el.property(property, true).ok_or_else(|| {
            HyperstoreError::InvalidArgument(format!("unknown property '{property}' on schema {schema_id}"))
        })?;
        Ok((schema_el, prop, schema_id, version))
    }

    pub(crate) fn get_property_value(&self, owner: &ElementId, property: &str) -> Result<PropertyValue> {
        self.ensure_usable(owner)?;
        let (_, prop, _, owner_version) = self.resolve_property(owner, property)?;

        if let PropertyKind::Calculated(f) = prop.kind() {
            let f = Rc::clone(f);
            let element = self.get(owner).ok_or_else(|| {
                HyperstoreError::InvalidElement(format!("unknown element {owner}"))
            })?;
            return Ok(PropertyValue::new(Some(f(&element)), None, owner_version));
        }

        let graph = self.graph.borrow();
        match graph.property_node(owner, property) {
            Some(slot) => Ok(PropertyValue::new(slot.value.clone(), None, slot.version)),
            // a thunk default is re-invoked on every read; version 0 keeps
            // write-on-first-read semantics sound
            None => Ok(PropertyValue::new(prop.default_value(), None, 0)),
        }
    }

    pub(crate) fn set_property_value(
        &self,
        owner: &ElementId,
        property: &str,
        value: Value,
        version: Option<u64>,
    ) -> Result<PropertyValue> {
        let store = self.store()?;
        store.run_in_session(SessionConfig::default(), || {
            self.ensure_usable(owner)?;
            let (_, prop, schema_id, _) = self.resolve_property(owner, property)?;
            if prop.is_calculated() {
                return Err(HyperstoreError::TypeMismatch(format!(
                    "can not write calculated property '{property}'"
                )));
            }
            let version = version.unwrap_or_else(|| store.tick());
            let (old, version) = self.graph.borrow_mut().set_property_node(
                owner,
                property,
                prop.value_schema(),
                value.clone(),
                version,
            );

            self.emit(ModelEvent::ChangePropertyValue {
                domain: self.name.clone(),
                id: owner.clone(),
                schema_id: schema_id.clone(),
                property_name: property.to_string(),
                value: Some(prop.serialize(&value)),
                old_value: old.as_ref().map(|v| prop.serialize(v)),
                correlation_id: store.current_session_id(),
                version,
                top_level: true,
            })?;

            // check constraints see the written value; an error-severity
            // failure aborts the session, which rolls the write back
            if let Some(element) = self.get(owner) {
                for constraint in prop.constraints() {
                    if constraint.kind() != ConstraintKind::Check {
                        continue;
                    }
                    let ctx = ConstraintContext { element: &element, property_name: Some(property) };
                    if !constraint.evaluate(&ctx) {
                        let diagnostic = constraint.diagnostic(owner.clone(), Some(property));
                        warn!(%diagnostic, "check constraint failed");
                        store.push_diagnostic(diagnostic);
                        if constraint.as_error() {
                            return Err(HyperstoreError::ConstraintViolation(
                                constraint.message().to_string(),
                            ));
                        }
                    }
                }
            }
            debug!(domain = %self.name, element = %owner, property, version, "property written");
            Ok(PropertyValue::new(Some(value), old, version))
        })
    }

    pub(crate) fn remove_property(
        &self,
        owner: &ElementId,
        property: &str,
        version: Option<u64>,
    ) -> Result<()> {
        let store = self.store()?;
        store.run_in_session(SessionConfig::default(), || {
            self.ensure_usable(owner)?;
            let (_, prop, schema_id, _) = self.resolve_property(owner, property)?;
            let slot = self.graph.borrow_mut().remove_property_node(owner, property);
            if let Some(slot) = slot {
                self.emit(ModelEvent::RemoveProperty {
                    domain: self.name.clone(),
                    id: owner.clone(),
                    schema_id: schema_id.clone(),
                    property_name: property.to_string(),
                    value: slot.value.as_ref().map(|v| prop.serialize(v)),
                    correlation_id: store.current_session_id(),
                    version: version.unwrap_or(slot.version),
                    top_level: true,
                })?;
            }
            Ok(())
        })
    }

    /// Entities of the domain, optionally filtered by exact schema
    pub(crate) fn find(&self, schema: Option<&str>) -> Result<Box<dyn Cursor<Item = ModelElement>>> {
        let schema_id = match schema {
            Some(name) => {
                let store = self.store()?;
                let schemas = store.schemas.borrow();
                Some(schemas.get_schema_element(name)?.id().clone())
            }
            None => None,
        };
        let me = self.rc();
        let cursor = NodesCursor::new(Rc::clone(&self.graph), NodeKind::NODE, schema_id)
            .map(move |node: &GraphNode| me.materialize(node));
        Ok(Box::new(cursor))
    }

    /// Relationship elements, filtered by schema (subtypes included) and by
    /// terminal elements.
    pub(crate) fn find_relationships(
        &self,
        schema: Option<&str>,
        start: Option<&ElementId>,
        end: Option<&ElementId>,
    ) -> Result<Box<dyn Cursor<Item = ModelElement>>> {
        let store = self.store()?;
        let target = match schema {
            Some(name) => {
                let schemas = store.schemas.borrow();
                Some(schemas.get_schema_relationship(name)?)
            }
            None => None,
        };

        let matches_schema = {
            let store = Rc::clone(&store);
            let target = target.clone();
            move |schema_id: &ElementId| match &target {
                None => true,
                Some(t) => store
                    .schemas
                    .borrow()
                    .try_get_schema_info(schema_id.as_str())
                    .map(|el| el.is_a(t.id()))
                    .unwrap_or(false),
            }
        };

        if let Some(start_id) = start {
            let end = end.cloned();
            let ids: Vec<ElementId> = {
                let graph = self.graph.borrow();
                match graph.node(start_id) {
                    Some(node) => node
                        .outgoings
                        .values()
                        .filter(|ei| end.as_ref().map_or(true, |e| ei.end_id == *e))
                        .filter(|ei| matches_schema(&ei.schema_id))
                        .map(|ei| ei.id.clone())
                        .collect(),
                    None => Vec::new(),
                }
            };
            return Ok(Box::new(ArrayCursor::new(self.elements_for(&ids))));
        }

        if let Some(end_id) = end {
            let ids: Vec<ElementId> = {
                let graph = self.graph.borrow();
                match graph.node(end_id) {
                    Some(node) => node
                        .incomings
                        .values()
                        .chain(
                            // a self-loop is recorded once on the source
                            node.outgoings.values().filter(|ei| ei.direction == Direction::Both),
                        )
                        .filter(|ei| matches_schema(&ei.schema_id))
                        .map(|ei| ei.id.clone())
                        .collect(),
                    None => Vec::new(),
                }
            };
            return Ok(Box::new(ArrayCursor::new(self.elements_for(&ids))));
        }

        let me = self.rc();
        let cursor = NodesCursor::new(Rc::clone(&self.graph), NodeKind::EDGE, None)
            .filter(move |node: &GraphNode| matches_schema(&node.schema_id))
            .map(move |node: &GraphNode| me.materialize(node));
        Ok(Box::new(cursor))
    }

    fn elements_for(&self, ids: &[ElementId]) -> Vec<ModelElement> {
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    fn rc(&self) -> Rc<DomainInner> {
        self.weak_self.upgrade().expect("domain is alive while borrowed")
    }

    /// Replay one event through the regular mutation path. Used by undo and
    /// redo: the active session records the replayed events, while its mode
    /// suppresses cascades and undo capture.
    pub(crate) fn apply_event(&self, event: &ModelEvent) -> Result<()> {
        match event {
            ModelEvent::AddEntity { id, schema_id, version, .. } => {
                self.create_entity(schema_id.as_str(), Some(id.local()), Some(*version))?;
                Ok(())
            }
            ModelEvent::AddRelationship {
                id, schema_id, start_id, end_id, end_schema_id, version, ..
            } => {
                self.create_relationship(
                    schema_id.as_str(),
                    start_id,
                    end_id,
                    Some(end_schema_id),
                    Some(id.local()),
                    Some(*version),
                )?;
                Ok(())
            }
            ModelEvent::RemoveEntity { id, version, .. }
            | ModelEvent::RemoveRelationship { id, version, .. } => self.remove(id, Some(*version)),
            ModelEvent::ChangePropertyValue { id, property_name, value, version, .. } => {
                match value {
                    Some(value) => {
                        let (_, prop, _, _) = self.resolve_property(id, property_name)?;
                        self.set_property_value(
                            id,
                            property_name,
                            prop.deserialize(value),
                            Some(*version),
                        )?;
                        Ok(())
                    }
                    None => self.remove_property(id, property_name, Some(*version)),
                }
            }
            ModelEvent::RemoveProperty { id, property_name, version, .. } => {
                self.remove_property(id, property_name, Some(*version))
            }
        }
    }

    /// Restore the pre-state described by one reverse event, bypassing the
    /// session machinery. Used by rollback, where the closing session must
    /// not record new events.
    pub(crate) fn apply_raw(&self, event: &ModelEvent) {
        match event {
            ModelEvent::AddEntity { id, schema_id, version, .. } => {
                if let Err(err) = self.graph.borrow_mut().add_node(id, schema_id, *version) {
                    warn!(%err, "rollback re-add failed");
                }
            }
            ModelEvent::AddRelationship {
                id,
                schema_id,
                start_id,
                start_schema_id,
                end_id,
                end_schema_id,
                version,
                ..
            } => {
                if let Err(err) = self.graph.borrow_mut().add_relationship(
                    id,
                    schema_id,
                    start_id,
                    start_schema_id,
                    end_id,
                    end_schema_id,
                    *version,
                ) {
                    warn!(%err, "rollback re-link failed");
                }
            }
            ModelEvent::RemoveEntity { id, version, correlation_id, .. }
            | ModelEvent::RemoveRelationship { id, version, correlation_id, .. } => {
                if self.graph.borrow().has_node(id) {
                    let result = self.graph.borrow_mut().remove_node(
                        id,
                        *version,
                        *correlation_id,
                        true,
                        &|_| false,
                    );
                    match result {
                        Ok(events) => self.dispose_removed(&events),
                        Err(err) => warn!(%err, "rollback removal failed"),
                    }
                }
            }
            ModelEvent::ChangePropertyValue { id, property_name, value, version, .. } => match value
            {
                Some(value) => {
                    let (value, value_schema) = match self.resolve_property(id, property_name) {
                        Ok((_, prop, _, _)) => (prop.deserialize(value), prop.value_schema().clone()),
                        Err(_) => (value.clone(), ElementId::new("$", "any")),
                    };
                    self.graph.borrow_mut().set_property_node(
                        id,
                        property_name,
                        &value_schema,
                        value,
                        *version,
                    );
                }
                None => {
                    self.graph.borrow_mut().remove_property_node(id, property_name);
                }
            },
            ModelEvent::RemoveProperty { id, property_name, .. } => {
                self.graph.borrow_mut().remove_property_node(id, property_name);
            }
        }
    }

    /// Run the given constraint kind over one touched element; returns true
    /// when an error-severity check failed.
    pub(crate) fn check_element(
        &self,
        id: &ElementId,
        kind: ConstraintKind,
        diagnostics: &mut Vec<crate::schema::DiagnosticMessage>,
    ) -> bool {
        let element = match self.get(id) {
            Some(el) => el,
            None => return false,
        };
        let schema = match element.schema() {
            Ok(s) => s,
            Err(_) => return false,
        };

        let mut failed = false;
        for constraint in schema.constraints() {
            if constraint.kind() != kind {
                continue;
            }
            let ctx = ConstraintContext { element: &element, property_name: None };
            if !constraint.evaluate(&ctx) {
                diagnostics.push(constraint.diagnostic(id.clone(), None));
                failed |= constraint.as_error() && kind == ConstraintKind::Check;
            }
        }
        for prop in schema.properties(true) {
            for constraint in prop.constraints() {
                if constraint.kind() != kind {
                    continue;
                }
                let ctx = ConstraintContext { element: &element, property_name: Some(prop.name()) };
                if !constraint.evaluate(&ctx) {
                    diagnostics.push(constraint.diagnostic(id.clone(), Some(prop.name())));
                    failed |= constraint.as_error() && kind == ConstraintKind::Check;
                }
            }
        }
        failed
    }

    pub(crate) fn notify_adapters(&self, info: &crate::session::SessionInfo) {
        if self.disposed.get() {
            return;
        }
        let adapters: Vec<_> = self.adapters.borrow().clone();
        for adapter in adapters {
            adapter.on_session_completed(info);
        }
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        for adapter in self.adapters.borrow_mut().drain(..) {
            adapter.dispose();
        }
        if let (Some(cookie), Ok(store)) = (self.adapter_cookie.take(), self.store()) {
            store.unsubscribe(cookie);
        }
        for (_, el) in self.cache.borrow_mut().drain() {
            el.dispose();
        }
        debug!(domain = %self.name, "domain disposed");
    }
}

/// Facade over one hypergraph: creates and removes elements, reads and
/// writes property values, and emits an event for every change.
#[derive(Clone)]
pub struct Domain {
    pub(crate) inner: Rc<DomainInner>,
}

impl Domain {
    /// Lowercase-normalized domain name
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Highest sequence number observed or minted so far
    pub fn sequence(&self) -> u64 {
        self.inner.sequence()
    }

    /// Create an entity with a minted id
    pub fn create_entity(&self, schema: &str) -> Result<ModelElement> {
        self.inner.create_entity(schema, None, None)
    }

    /// Create an entity with an explicit local id and/or version
    pub fn create_entity_with(
        &self,
        schema: &str,
        id: Option<&str>,
        version: Option<u64>,
    ) -> Result<ModelElement> {
        self.inner.create_entity(schema, id, version)
    }

    /// Create a relationship between a start element of this domain and any
    /// end element (possibly of another domain)
    pub fn create_relationship(
        &self,
        schema: &str,
        start: &ElementId,
        end: &ElementId,
    ) -> Result<ModelElement> {
        self.inner.create_relationship(schema, start, end, None, None, None)
    }

    pub fn create_relationship_with(
        &self,
        schema: &str,
        start: &ElementId,
        end: &ElementId,
        id: Option<&str>,
        version: Option<u64>,
    ) -> Result<ModelElement> {
        self.inner.create_relationship(schema, start, end, None, id, version)
    }

    /// Remove an element with cascading deletion
    pub fn remove(&self, id: &ElementId) -> Result<()> {
        self.inner.remove(id, None)
    }

    pub fn remove_with(&self, id: &ElementId, version: Option<u64>) -> Result<()> {
        self.inner.remove(id, version)
    }

    /// Materialize an element by id
    pub fn get(&self, id: &ElementId) -> Option<ModelElement> {
        self.inner.get(id)
    }

    pub fn element_exists(&self, id: &ElementId) -> bool {
        self.inner.element_exists(id)
    }

    /// Lazy cursor over the domain's entities, optionally filtered by exact
    /// schema id
    pub fn find(&self, schema: Option<&str>) -> Result<Box<dyn Cursor<Item = ModelElement>>> {
        self.inner.find(schema)
    }

    /// Lazy cursor over the raw graph nodes, filtered by kind mask and, when
    /// given, exact schema id
    pub fn get_nodes(
        &self,
        kind: NodeKind,
        schema: Option<&str>,
    ) -> Result<Box<dyn Cursor<Item = GraphNode>>> {
        let schema_id = match schema {
            Some(name) => {
                let store = self.inner.store()?;
                let schemas = store.schemas.borrow();
                Some(schemas.get_schema_element(name)?.id().clone())
            }
            None => None,
        };
        Ok(Box::new(NodesCursor::new(Rc::clone(&self.inner.graph), kind, schema_id)))
    }

    /// Lazy cursor over relationships, filtered by schema (subtypes
    /// included) and terminal elements
    pub fn find_relationships(
        &self,
        schema: Option<&str>,
        start: Option<&ElementId>,
        end: Option<&ElementId>,
    ) -> Result<Box<dyn Cursor<Item = ModelElement>>> {
        self.inner.find_relationships(schema, start, end)
    }

    /// Query the domain with a filter configuration
    pub fn query(&self, config: FilterConfig) -> Result<Query> {
        let schema_id = match config.schema_name() {
            Some(name) => {
                let store = self.inner.store()?;
                let schemas = store.schemas.borrow();
                Some(schemas.get_schema_element(name)?.id().clone())
            }
            None => None,
        };
        let me = Rc::clone(&self.inner);
        let source = NodesCursor::new(Rc::clone(&self.inner.graph), NodeKind::NODE_OR_EDGE, schema_id)
            .map(move |node: &GraphNode| me.materialize(node));
        Ok(Query::new(self.clone(), Box::new(source), config))
    }

    pub fn get_property_value(&self, owner: &ElementId, property: &str) -> Result<PropertyValue> {
        self.inner.get_property_value(owner, property)
    }

    pub fn set_property_value(
        &self,
        owner: &ElementId,
        property: &str,
        value: Value,
    ) -> Result<PropertyValue> {
        self.inner.set_property_value(owner, property, value, None)
    }

    pub fn set_property_value_with(
        &self,
        owner: &ElementId,
        property: &str,
        value: Value,
        version: Option<u64>,
    ) -> Result<PropertyValue> {
        self.inner.set_property_value(owner, property, value, version)
    }

    /// Drop a property slot; reading the property afterwards materializes
    /// the schema default again
    pub fn remove_property(&self, owner: &ElementId, property: &str) -> Result<()> {
        self.inner.remove_property(owner, property, None)
    }

    /// Load an envelope or `$id`/`$ref` object document into this domain
    pub fn load_from_json(&self, value: &Value) -> Result<Vec<ModelElement>> {
        json::load(self, value)
    }

    /// Dump every live element of this domain into the envelope form
    pub fn to_json(&self) -> Result<Value> {
        json::export(self)
    }

    /// Attach a synchronization adapter; it observes every completed session
    /// that touched this domain
    pub fn add_adapter(&self, adapter: impl DomainAdapter + 'static) -> Result<()> {
        self.inner.adapters.borrow_mut().push(Rc::new(adapter));
        if self.inner.adapter_cookie.get().is_none() {
            let store = self.inner.store()?;
            let weak = self.inner.weak_self.clone();
            let name = self.inner.name.clone();
            let cookie = store.subscribe(Rc::new(move |info: &crate::session::SessionInfo| {
                if let Some(domain) = weak.upgrade() {
                    if info.events.iter().any(|e| e.domain() == name) {
                        domain.notify_adapters(info);
                    }
                }
            }));
            self.inner.adapter_cookie.set(Some(cookie));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("name", &self.inner.name)
            .field("sequence", &self.inner.seq.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
