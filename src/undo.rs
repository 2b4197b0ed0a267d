//! Undo/redo over the session event stream
//!
//! The undo manager records the events of every completed session that
//! touched one of its registered domains. `undo` replays reverse events
//! inside a session in undo mode (so cascades stay quiet and the replay is
//! not re-captured) and accumulates the replayed events into a redo frame;
//! `redo` is symmetric. A save-point is the session id of the top undo
//! frame and can be the target of a later multi-frame undo.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::domain::Domain;
use crate::errors::{HyperstoreError, Result};
use crate::events::ModelEvent;
use crate::session::{SessionConfig, SessionMode};
use crate::store::{Store, StoreInner};

type EventFilter = Rc<dyn Fn(&ModelEvent) -> bool>;

struct RegisteredDomain {
    name: String,
    filter: Option<EventFilter>,
}

struct Frame {
    session_id: u64,
    events: Vec<ModelEvent>,
}

#[derive(Default)]
struct UndoState {
    domains: Vec<RegisteredDomain>,
    undos: Vec<Frame>,
    redos: Vec<Frame>,
}

impl UndoState {
    fn accepts(&self, event: &ModelEvent) -> bool {
        self.domains.iter().any(|d| {
            d.name == event.domain() && d.filter.as_ref().map_or(true, |f| f(event))
        })
    }
}

/// Records forward events per session and replays their inverses
pub struct UndoManager {
    store: Weak<StoreInner>,
    state: Rc<RefCell<UndoState>>,
    cookie: Cell<Option<u32>>,
}

impl UndoManager {
    pub fn new(store: &Store) -> Self {
        let state = Rc::new(RefCell::new(UndoState::default()));
        let weak_state = Rc::downgrade(&state);
        let cookie = store.inner.subscribe(Rc::new(move |info: &crate::session::SessionInfo| {
            let state = match weak_state.upgrade() {
                Some(s) => s,
                None => return,
            };
            // replays and loads are not re-captured
            if info.aborted || info.mode.is_undo_or_redo() || info.mode.is_loading() {
                return;
            }
            let mut state = state.borrow_mut();
            let kept: Vec<ModelEvent> =
                info.events.iter().filter(|e| state.accepts(e)).cloned().collect();
            if kept.is_empty() {
                return;
            }
            debug!(session = info.session_id, events = kept.len(), "undo frame recorded");
            match state.undos.last_mut() {
                // a reopened session merges into its existing frame
                Some(top) if top.session_id == info.session_id => top.events.extend(kept),
                _ => state.undos.push(Frame { session_id: info.session_id, events: kept }),
            }
            state.redos.clear();
        }));
        Self { store: Rc::downgrade(&store.inner), state, cookie: Cell::new(Some(cookie)) }
    }

    /// Start recording sessions that touch the given domain
    pub fn register_domain(&self, domain: &Domain) {
        self.state
            .borrow_mut()
            .domains
            .push(RegisteredDomain { name: domain.name().to_string(), filter: None });
    }

    /// Like [`UndoManager::register_domain`], keeping only events accepted
    /// by the filter
    pub fn register_domain_with_filter(
        &self,
        domain: &Domain,
        filter: impl Fn(&ModelEvent) -> bool + 'static,
    ) {
        self.state.borrow_mut().domains.push(RegisteredDomain {
            name: domain.name().to_string(),
            filter: Some(Rc::new(filter)),
        });
    }

    pub fn can_undo(&self) -> bool {
        !self.state.borrow().undos.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.state.borrow().redos.is_empty()
    }

    /// Session id of the top undo frame, usable as an undo target
    pub fn save_point(&self) -> Option<u64> {
        self.state.borrow().undos.last().map(|f| f.session_id)
    }

    /// Undo the most recent recorded session
    pub fn undo(&self) -> Result<()> {
        self.perform(true, None)
    }

    /// Undo every frame above the save-point; an unknown save-point drains
    /// the stack
    pub fn undo_to(&self, save_point: Option<u64>) -> Result<()> {
        self.perform(true, save_point)
    }

    /// Replay the most recently undone session
    pub fn redo(&self) -> Result<()> {
        self.perform(false, None)
    }

    pub fn redo_to(&self, save_point: Option<u64>) -> Result<()> {
        self.perform(false, save_point)
    }

    fn perform(&self, undo: bool, save_point: Option<u64>) -> Result<()> {
        let store = self.store.upgrade().ok_or_else(|| {
            HyperstoreError::InvalidElement("the owning store has been dropped".into())
        })?;
        {
            let state = self.state.borrow();
            let stack = if undo { &state.undos } else { &state.redos };
            if stack.is_empty() {
                return Ok(());
            }
        }

        let mode = if undo { SessionMode::UNDO } else { SessionMode::REDO };
        let mut session = store.begin(SessionConfig::with_mode(mode));
        let session_id = session.id();
        let mut replayed: Vec<ModelEvent> = Vec::new();
        let mut original_session = None;

        loop {
            let frame = {
                let mut state = self.state.borrow_mut();
                let stack = if undo { &mut state.undos } else { &mut state.redos };
                stack.pop()
            };
            let frame = match frame {
                Some(f) => f,
                None => break,
            };
            original_session.get_or_insert(frame.session_id);

            for event in frame.events.iter().rev() {
                if let Some(reverse) = event.reverse(session_id) {
                    if let Some(domain) = store.domain_inner(reverse.domain()) {
                        domain.apply_event(&reverse)?;
                    }
                    if reverse.reverse(session_id).is_some() {
                        replayed.push(reverse);
                    }
                }
            }

            let stop = match save_point {
                None => true,
                Some(sp) => {
                    let state = self.state.borrow();
                    let stack = if undo { &state.undos } else { &state.redos };
                    stack.is_empty() || stack.last().map(|f| f.session_id) == Some(sp)
                }
            };
            if stop {
                break;
            }
        }

        if let Some(original) = original_session {
            if !replayed.is_empty() {
                let mut state = self.state.borrow_mut();
                let target = if undo { &mut state.redos } else { &mut state.undos };
                target.push(Frame { session_id: original, events: replayed });
            }
        }

        debug!(session = session_id, undo, "replay session closing");
        session.accept_changes();
        session.close()
    }

    /// Stop recording
    pub fn dispose(&self) {
        if let (Some(cookie), Some(store)) = (self.cookie.take(), self.store.upgrade()) {
            store.unsubscribe(cookie);
        }
    }
}

impl Drop for UndoManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
