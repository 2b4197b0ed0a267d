//! Live collection views
//!
//! A [`ModelElementCollection`] materializes the many side of a relationship
//! for one terminal element and keeps itself current by subscribing to
//! session-completed events: it inspects only relationship additions and
//! removals with a matching schema and terminal, applying an optional filter
//! predicate.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::domain::{Domain, DomainInner, ModelElement};
use crate::errors::{HyperstoreError, Result};
use crate::events::ModelEvent;
use crate::queries::{ArrayCursor, Cursor};
use crate::session::SessionInfo;
use crate::store::StoreInner;
use crate::value_objects::ElementId;

type ItemFilter = Rc<dyn Fn(&ModelElement) -> bool>;

struct CollectionInner {
    domain: Weak<DomainInner>,
    store: Weak<StoreInner>,
    /// Relationship schema id backing the view
    schema: ElementId,
    /// Terminal element the view is bound to
    source: ElementId,
    /// When set, the source is the relationship end and items are starts
    opposite: bool,
    filter: Option<ItemFilter>,
    items: RefCell<Vec<ElementId>>,
    cookie: Cell<Option<u32>>,
}

impl CollectionInner {
    fn accepts(&self, item: &ModelElement) -> bool {
        match &self.filter {
            Some(f) => f(item),
            None => true,
        }
    }

    fn resolve(&self, id: &ElementId) -> Option<ModelElement> {
        let domain = self.domain.upgrade()?;
        if id.domain() == domain.name() {
            domain.get(id)
        } else {
            let store = self.store.upgrade()?;
            store.domain_inner(id.domain()).and_then(|d| d.get(id))
        }
    }

    fn schema_matches(&self, schema_id: &ElementId) -> bool {
        let store = match self.store.upgrade() {
            Some(s) => s,
            None => return false,
        };
        let schemas = store.schemas.borrow();
        schemas
            .try_get_schema_info(schema_id.as_str())
            .map(|el| el.is_a(&self.schema))
            .unwrap_or(false)
    }

    fn on_session_completed(&self, info: &SessionInfo) {
        if info.aborted {
            return;
        }
        for event in info.events.iter() {
            match event {
                ModelEvent::AddRelationship { schema_id, start_id, end_id, .. } => {
                    let (terminal, item) =
                        if self.opposite { (end_id, start_id) } else { (start_id, end_id) };
                    if *terminal != self.source || !self.schema_matches(schema_id) {
                        continue;
                    }
                    if let Some(element) = self.resolve(item) {
                        if !self.accepts(&element) {
                            continue;
                        }
                    }
                    let mut items = self.items.borrow_mut();
                    if !items.contains(item) {
                        trace!(item = %item, "live collection add");
                        items.push(item.clone());
                    }
                }
                ModelEvent::RemoveRelationship { schema_id, start_id, end_id, .. } => {
                    let (terminal, item) =
                        if self.opposite { (end_id, start_id) } else { (start_id, end_id) };
                    if *terminal != self.source || !self.schema_matches(schema_id) {
                        continue;
                    }
                    trace!(item = %item, "live collection remove");
                    self.items.borrow_mut().retain(|i| i != item);
                }
                _ => {}
            }
        }
    }
}

/// Self-updating view over the elements reachable through one relationship
/// end.
///
/// Dropping the collection unsubscribes it from the session stream.
pub struct ModelElementCollection {
    inner: Rc<CollectionInner>,
}

impl ModelElementCollection {
    /// Bind a view to `source` through `relationship_schema`. With
    /// `opposite` unset the items are the relationship ends reachable from
    /// `source`; with it set, the starts that reach `source`.
    pub fn new(
        domain: &Domain,
        relationship_schema: &str,
        source: &ModelElement,
        opposite: bool,
        filter: Option<Box<dyn Fn(&ModelElement) -> bool>>,
    ) -> Result<Self> {
        let store = domain.inner.store()?;
        let schema = {
            let schemas = store.schemas.borrow();
            schemas.get_schema_relationship(relationship_schema)?.id().clone()
        };

        let inner = Rc::new(CollectionInner {
            domain: Rc::downgrade(&domain.inner),
            store: Rc::downgrade(&store),
            schema,
            source: source.id().clone(),
            opposite,
            filter: filter.map(|f| Rc::from(f) as ItemFilter),
            items: RefCell::new(Vec::new()),
            cookie: Cell::new(None),
        });

        // initial population from the current graph
        let (start, end) = if opposite { (None, Some(source.id())) } else { (Some(source.id()), None) };
        let mut rels = domain.find_relationships(Some(relationship_schema), start, end)?;
        {
            let mut items = inner.items.borrow_mut();
            while rels.has_next() {
                let rel = match rels.next() {
                    Some(r) => r,
                    None => break,
                };
                let item = if opposite { rel.start_id() } else { rel.end_id() };
                if let Some(item) = item {
                    if let Some(element) = inner.resolve(item) {
                        if !inner.accepts(&element) {
                            continue;
                        }
                    }
                    if !items.contains(item) {
                        items.push(item.clone());
                    }
                }
            }
        }

        let weak = Rc::downgrade(&inner);
        let cookie = store.subscribe(Rc::new(move |info: &SessionInfo| {
            if let Some(inner) = weak.upgrade() {
                inner.on_session_completed(info);
            }
        }));
        inner.cookie.set(Some(cookie));
        Ok(Self { inner })
    }

    pub fn count(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Ids currently in the view
    pub fn item_ids(&self) -> Vec<ElementId> {
        self.inner.items.borrow().clone()
    }

    /// Materialized items, skipping any that can no longer be resolved
    pub fn items(&self) -> Vec<ModelElement> {
        self.inner.items.borrow().iter().filter_map(|id| self.inner.resolve(id)).collect()
    }

    /// Cursor over the materialized items
    pub fn cursor(&self) -> ArrayCursor<ModelElement> {
        ArrayCursor::new(self.items())
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.inner.items.borrow().contains(id)
    }

    /// Link a new item through the backing relationship
    pub fn add(&self, item: &ElementId) -> Result<ModelElement> {
        let domain = self
            .inner
            .domain
            .upgrade()
            .ok_or_else(|| HyperstoreError::DisposedElement(self.inner.source.clone()))?;
        let store = self.inner.store.upgrade().ok_or_else(|| {
            HyperstoreError::InvalidElement("the owning store has been dropped".into())
        })?;
        let (start, end) = if self.inner.opposite {
            (item.clone(), self.inner.source.clone())
        } else {
            (self.inner.source.clone(), item.clone())
        };
        // the relationship lives in the start element's domain
        let owner = if start.domain() == domain.name() {
            domain
        } else {
            store.domain_inner(start.domain()).ok_or_else(|| {
                HyperstoreError::InvalidElement(format!("unknown domain '{}'", start.domain()))
            })?
        };
        owner.create_relationship(self.inner.schema.as_str(), &start, &end, None, None, None)
    }

    /// Unlink an item by removing the backing relationship
    pub fn remove(&self, item: &ElementId) -> Result<()> {
        let domain = self
            .inner
            .domain
            .upgrade()
            .ok_or_else(|| HyperstoreError::DisposedElement(self.inner.source.clone()))?;
        let (start, end) = if self.inner.opposite {
            (Some(item), Some(&self.inner.source))
        } else {
            (Some(&self.inner.source), Some(item))
        };
        let mut rels =
            domain.find_relationships(Some(self.inner.schema.as_str()), start, end)?;
        while rels.has_next() {
            if let Some(rel) = rels.next() {
                domain.remove(rel.id(), None)?;
            }
        }
        Ok(())
    }

    /// Unsubscribe from the session stream
    pub fn dispose(&self) {
        if let (Some(cookie), Some(store)) = (self.inner.cookie.take(), self.inner.store.upgrade())
        {
            store.unsubscribe(cookie);
        }
    }
}

impl Drop for ModelElementCollection {
    fn drop(&mut self) {
        self.dispose();
    }
}
