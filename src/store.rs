//! Store: the root aggregate
//!
//! A store owns the schema registry, the domains, the ambient session slot
//! and the session-completed subscriber registry. Everything lives in
//! memory and on one thread; subscribers are plain callbacks invoked after
//! a mutation completes, never during one.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::domain::{Domain, DomainInner};
use crate::errors::{HyperstoreError, Result};
use crate::events::ModelEvent;
use crate::schema::{
    ConstraintKind, DiagnosticSeverity, SchemaElement, SchemaEntityBuilder, SchemaRegistry,
    SchemaRelationshipBuilder, SchemaValueObjectBuilder,
};
use crate::session::{Session, SessionConfig, SessionInfo, SessionMode, SessionState};
use crate::value_objects::ElementId;

type Subscriber = Rc<dyn Fn(&SessionInfo)>;

pub(crate) struct StoreInner {
    pub(crate) schemas: RefCell<SchemaRegistry>,
    domains: RefCell<IndexMap<String, Rc<DomainInner>>>,
    session: RefCell<Option<SessionState>>,
    subscribers: RefCell<Vec<(u32, Subscriber)>>,
    next_cookie: Cell<u32>,
    next_session_id: Cell<u64>,
    last_tick: Cell<u64>,
    weak_self: Weak<StoreInner>,
}

impl StoreInner {
    fn rc(&self) -> Rc<StoreInner> {
        self.weak_self.upgrade().expect("store is alive while borrowed")
    }

    /// Wall-clock-derived version tick, strictly increasing per process
    pub(crate) fn tick(&self) -> u64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let tick = now.max(self.last_tick.get() + 1);
        self.last_tick.set(tick);
        tick
    }

    pub(crate) fn current_session_id(&self) -> u64 {
        self.session.borrow().as_ref().map(|s| s.id).unwrap_or(0)
    }

    pub(crate) fn current_mode(&self) -> SessionMode {
        self.session.borrow().as_ref().map(|s| s.mode).unwrap_or(SessionMode::NORMAL)
    }

    pub(crate) fn push_event(&self, event: ModelEvent) -> Result<()> {
        let mut slot = self.session.borrow_mut();
        match slot.as_mut() {
            Some(state) => {
                state.events.push(event);
                Ok(())
            }
            None => Err(HyperstoreError::InvalidArgument(
                "a session is required to mutate the store".into(),
            )),
        }
    }

    pub(crate) fn push_diagnostic(&self, diagnostic: crate::schema::DiagnosticMessage) {
        if let Some(state) = self.session.borrow_mut().as_mut() {
            state.diagnostics.push(diagnostic);
        }
    }

    fn mark_aborted(&self) {
        if let Some(state) = self.session.borrow_mut().as_mut() {
            state.aborted = true;
        }
    }

    /// Open the ambient session or deepen the current one
    pub(crate) fn begin(&self, config: SessionConfig) -> Session {
        let id = {
            let mut slot = self.session.borrow_mut();
            match slot.as_mut() {
                Some(state) => {
                    state.depth += 1;
                    state.mode = state.mode | config.mode;
                    state.id
                }
                None => {
                    let id = self.next_session_id.get() + 1;
                    self.next_session_id.set(id);
                    debug!(session = id, mode = %config.mode, "session opened");
                    *slot = Some(SessionState::new(id, config.mode));
                    id
                }
            }
        };
        Session::new(self.rc(), id)
    }

    /// Close one nesting level; the outermost close commits or rolls back
    pub(crate) fn close_session(&self, accepted: bool) -> Result<()> {
        let outermost = {
            let mut slot = self.session.borrow_mut();
            let state = match slot.as_mut() {
                Some(s) => s,
                None => return Ok(()),
            };
            if !accepted {
                state.aborted = true;
            }
            state.depth = state.depth.saturating_sub(1);
            // a close reached while subscribers are being notified must not
            // re-enter finalization
            state.depth == 0 && !state.closing
        };
        if outermost {
            self.finalize()
        } else {
            Ok(())
        }
    }

    /// Commit or roll back the closing session: Check constraints, then
    /// Validate constraints, then publish to subscribers, then clear the
    /// ambient slot. The slot holds the closing session until the last
    /// subscriber returned.
    fn finalize(&self) -> Result<()> {
        let (session_id, mode, events, mut aborted) = {
            let mut slot = self.session.borrow_mut();
            let state = match slot.as_mut() {
                Some(s) => s,
                None => return Ok(()),
            };
            state.closing = true;
            (state.id, state.mode, std::mem::take(&mut state.events), state.aborted)
        };

        let mut commit_error = None;
        if !aborted {
            let touched = touched_elements(&events);
            let mut diagnostics = Vec::new();
            let mut failed = false;
            for (domain_name, id) in &touched {
                if let Some(domain) = self.domain_inner(domain_name) {
                    failed |= domain.check_element(id, ConstraintKind::Check, &mut diagnostics);
                }
            }
            if failed {
                aborted = true;
                let message = diagnostics
                    .iter()
                    .find(|d| d.severity == DiagnosticSeverity::Error)
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "check constraint failed".into());
                commit_error = Some(HyperstoreError::ConstraintViolation(message));
            } else {
                for (domain_name, id) in &touched {
                    if let Some(domain) = self.domain_inner(domain_name) {
                        domain.check_element(id, ConstraintKind::Validate, &mut diagnostics);
                    }
                }
            }
            if let Some(state) = self.session.borrow_mut().as_mut() {
                state.aborted = aborted;
                state.diagnostics.extend(diagnostics);
            }
        }

        if aborted {
            info!(session = session_id, events = events.len(), "session rolling back");
            for event in events.iter().rev() {
                if let Some(reverse) = event.reverse(session_id) {
                    if let Some(domain) = self.domain_inner(reverse.domain()) {
                        domain.apply_raw(&reverse);
                    }
                }
            }
        }

        let diagnostics = self
            .session
            .borrow()
            .as_ref()
            .map(|s| s.diagnostics.clone())
            .unwrap_or_default();
        let info = SessionInfo {
            session_id,
            mode,
            aborted,
            events: Rc::new(events),
            diagnostics: Rc::new(diagnostics),
        };
        info!(
            session = info.session_id,
            events = info.events.len(),
            aborted = info.aborted,
            "session completed"
        );
        self.publish(&info);

        *self.session.borrow_mut() = None;

        match commit_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn publish(&self, info: &SessionInfo) {
        // snapshot so subscribers may subscribe or unsubscribe while notified
        let subscribers: Vec<Subscriber> =
            self.subscribers.borrow().iter().map(|(_, f)| Rc::clone(f)).collect();
        for subscriber in subscribers {
            subscriber(info);
        }
    }

    /// Run `f` inside the active session, or inside a fresh one-shot session
    /// when none is active. An error marks the session aborted.
    pub(crate) fn run_in_session<R>(
        &self,
        config: SessionConfig,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        if self.session.borrow().is_some() {
            if let Some(state) = self.session.borrow_mut().as_mut() {
                state.mode = state.mode | config.mode;
            }
            let result = f();
            if result.is_err() {
                self.mark_aborted();
            }
            return result;
        }

        let mut session = self.begin(config);
        match f() {
            Ok(value) => {
                session.accept_changes();
                session.close()?;
                Ok(value)
            }
            // dropping the unaccepted guard rolls the one-shot session back
            Err(err) => Err(err),
        }
    }

    pub(crate) fn subscribe(&self, subscriber: Subscriber) -> u32 {
        let cookie = self.next_cookie.get() + 1;
        self.next_cookie.set(cookie);
        self.subscribers.borrow_mut().push((cookie, subscriber));
        cookie
    }

    pub(crate) fn unsubscribe(&self, cookie: u32) {
        self.subscribers.borrow_mut().retain(|(c, _)| *c != cookie);
    }

    pub(crate) fn domain_inner(&self, name: &str) -> Option<Rc<DomainInner>> {
        self.domains.borrow().get(&name.to_ascii_lowercase()).cloned()
    }
}

/// Elements affected by the session, in first-touch order
fn touched_elements(events: &[ModelEvent]) -> Vec<(String, ElementId)> {
    let mut touched: Vec<(String, ElementId)> = Vec::new();
    for event in events {
        match event {
            ModelEvent::AddEntity { .. }
            | ModelEvent::AddRelationship { .. }
            | ModelEvent::ChangePropertyValue { .. } => {
                let key = (event.domain().to_string(), event.id().clone());
                if !touched.contains(&key) {
                    touched.push(key);
                }
            }
            _ => {}
        }
    }
    touched
}

/// Root aggregate owning schemas, domains, the ambient session and the
/// session-completed subscribers
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        let inner = Rc::new_cyclic(|weak_self| StoreInner {
            schemas: RefCell::new(SchemaRegistry::new()),
            domains: RefCell::new(IndexMap::new()),
            session: RefCell::new(None),
            subscribers: RefCell::new(Vec::new()),
            next_cookie: Cell::new(0),
            next_session_id: Cell::new(0),
            last_tick: Cell::new(0),
            weak_self: weak_self.clone(),
        });
        Self { inner }
    }

    /// Register an entity schema
    pub fn define_entity(&self, builder: SchemaEntityBuilder) -> Result<Rc<SchemaElement>> {
        self.inner.schemas.borrow_mut().define_entity(builder)
    }

    /// Register a relationship schema
    pub fn define_relationship(
        &self,
        builder: SchemaRelationshipBuilder,
    ) -> Result<Rc<SchemaElement>> {
        self.inner.schemas.borrow_mut().define_relationship(builder)
    }

    /// Register a value-object schema
    pub fn define_value_object(
        &self,
        builder: SchemaValueObjectBuilder,
    ) -> Result<Rc<SchemaElement>> {
        self.inner.schemas.borrow_mut().define_value_object(builder)
    }

    /// Resolve a schema by full id or unambiguous simple name
    pub fn schema(&self, name: &str) -> Result<Rc<SchemaElement>> {
        self.inner.schemas.borrow().get_schema_info(name)
    }

    pub fn schema_entity(&self, name: &str) -> Result<Rc<SchemaElement>> {
        self.inner.schemas.borrow().get_schema_entity(name)
    }

    pub fn schema_relationship(&self, name: &str) -> Result<Rc<SchemaElement>> {
        self.inner.schemas.borrow().get_schema_relationship(name)
    }

    /// Relationship schemas matching the given start/end schemas
    pub fn schema_relationships(
        &self,
        start: Option<&ElementId>,
        end: Option<&ElementId>,
    ) -> Vec<Rc<SchemaElement>> {
        self.inner.schemas.borrow().get_schema_relationships(start, end)
    }

    /// Create and attach a domain; names are lowercase-normalized
    pub fn create_domain(&self, name: &str) -> Result<Domain> {
        let key = name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(HyperstoreError::InvalidArgument("domain name is required".into()));
        }
        let mut domains = self.inner.domains.borrow_mut();
        if domains.contains_key(&key) {
            return Err(HyperstoreError::InvalidArgument(format!(
                "domain '{key}' already exists"
            )));
        }
        let inner = DomainInner::create(key.clone(), Rc::downgrade(&self.inner));
        domains.insert(key.clone(), Rc::clone(&inner));
        debug!(domain = %key, "domain created");
        Ok(Domain { inner })
    }

    pub fn domain(&self, name: &str) -> Option<Domain> {
        self.inner.domain_inner(name).map(|inner| Domain { inner })
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.inner.domains.borrow().values().cloned().map(|inner| Domain { inner }).collect()
    }

    /// Detach and dispose a domain; its elements become unusable
    pub fn unload_domain(&self, name: &str) {
        let removed = self.inner.domains.borrow_mut().shift_remove(&name.to_ascii_lowercase());
        if let Some(domain) = removed {
            domain.dispose();
        }
    }

    /// Open the ambient session, or deepen it when one is already active
    pub fn begin_session(&self) -> Session {
        self.inner.begin(SessionConfig::default())
    }

    pub fn begin_session_with(&self, config: SessionConfig) -> Session {
        self.inner.begin(config)
    }

    /// Run `f` inside the ambient session, opening a one-shot session when
    /// none is active
    pub fn with_session<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.inner.run_in_session(SessionConfig::default(), f)
    }

    /// Subscribe to completed sessions; returns an unsubscribe cookie
    pub fn subscribe_session_completed(&self, f: impl Fn(&SessionInfo) + 'static) -> u32 {
        self.inner.subscribe(Rc::new(f))
    }

    pub fn unsubscribe_session_completed(&self, cookie: u32) {
        self.inner.unsubscribe(cookie);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_strictly_increasing() {
        let store = Store::new();
        let a = store.inner.tick();
        let b = store.inner.tick();
        let c = store.inner.tick();
        assert!(a < b && b < c);
    }

    #[test]
    fn domain_names_are_normalized() {
        let store = Store::new();
        store.create_domain("Lib").unwrap();
        assert!(store.domain("LIB").is_some());
        assert!(store.create_domain("lib").is_err());
    }

    #[test]
    fn nested_sessions_commit_with_the_outermost_close() {
        let store = Store::new();
        let completions = Rc::new(Cell::new(0));
        let seen = Rc::clone(&completions);
        store.subscribe_session_completed(move |_| seen.set(seen.get() + 1));

        let mut outer = store.begin_session();
        let mut inner = store.begin_session();
        assert_eq!(outer.id(), inner.id());
        inner.accept_changes();
        inner.close().unwrap();
        assert_eq!(completions.get(), 0);
        outer.accept_changes();
        outer.close().unwrap();
        assert_eq!(completions.get(), 1);
    }

    #[test]
    fn unsubscribe_removes_by_cookie() {
        let store = Store::new();
        let count = Rc::new(Cell::new(0));
        let seen = Rc::clone(&count);
        let cookie = store.subscribe_session_completed(move |_| seen.set(seen.get() + 1));

        let mut s = store.begin_session();
        s.accept_changes();
        s.close().unwrap();
        assert_eq!(count.get(), 1);

        store.unsubscribe_session_completed(cookie);
        let mut s = store.begin_session();
        s.accept_changes();
        s.close().unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn session_ids_are_monotonic() {
        let store = Store::new();
        let mut a = store.begin_session();
        let first = a.id();
        a.accept_changes();
        a.close().unwrap();
        let mut b = store.begin_session();
        assert!(b.id() > first);
        b.accept_changes();
        b.close().unwrap();
    }
}
