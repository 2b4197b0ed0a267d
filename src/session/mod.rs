//! Transactional sessions
//!
//! A session is the unit of work: mutations run inside it, every change is
//! recorded as an event, and on the outermost close the session either
//! commits (constraints validated, events published to subscribers) or rolls
//! back by replaying inverse events. Nested begins share the same event list
//! and commit with the outermost close; a level that never accepts aborts
//! the whole session.

use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::Result;
use crate::events::ModelEvent;
use crate::schema::DiagnosticMessage;
use crate::store::StoreInner;

/// Bitmask of session modes.
///
/// `UNDO`/`REDO`/`ROLLBACK` suppress cascade enumeration (the replayed event
/// stream already carries individual removals); `LOADING` keeps the changes
/// out of undo recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMode(u8);

impl SessionMode {
    pub const NORMAL: SessionMode = SessionMode(0);
    pub const UNDO: SessionMode = SessionMode(1);
    pub const REDO: SessionMode = SessionMode(2);
    pub const ROLLBACK: SessionMode = SessionMode(4);
    pub const LOADING: SessionMode = SessionMode(8);

    /// True when the two masks share at least one mode bit
    pub fn contains(self, other: SessionMode) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_undo_or_redo(self) -> bool {
        self.contains(SessionMode::UNDO) || self.contains(SessionMode::REDO)
    }

    pub fn is_loading(self) -> bool {
        self.contains(SessionMode::LOADING)
    }
}

impl BitOr for SessionMode {
    type Output = SessionMode;

    fn bitor(self, rhs: SessionMode) -> SessionMode {
        SessionMode(self.0 | rhs.0)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("normal");
        }
        let mut parts = Vec::new();
        if self.contains(SessionMode::UNDO) {
            parts.push("undo");
        }
        if self.contains(SessionMode::REDO) {
            parts.push("redo");
        }
        if self.contains(SessionMode::ROLLBACK) {
            parts.push("rollback");
        }
        if self.contains(SessionMode::LOADING) {
            parts.push("loading");
        }
        f.write_str(&parts.join("+"))
    }
}

/// Options for [`crate::Store::begin_session_with`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub mode: SessionMode,
}

impl SessionConfig {
    pub fn with_mode(mode: SessionMode) -> Self {
        Self { mode }
    }
}

/// Mutable state of the ambient session, owned by the store
pub(crate) struct SessionState {
    pub id: u64,
    pub depth: u32,
    pub mode: SessionMode,
    pub events: Vec<ModelEvent>,
    pub aborted: bool,
    /// Set while the outermost close runs constraints and notifies
    /// subscribers; closes reached in that window do not re-finalize
    pub closing: bool,
    pub diagnostics: Vec<DiagnosticMessage>,
}

impl SessionState {
    pub(crate) fn new(id: u64, mode: SessionMode) -> Self {
        Self {
            id,
            depth: 1,
            mode,
            events: Vec::new(),
            aborted: false,
            closing: false,
            diagnostics: Vec::new(),
        }
    }
}

/// Immutable snapshot handed to session-completed subscribers
#[derive(Clone)]
pub struct SessionInfo {
    pub session_id: u64,
    pub mode: SessionMode,
    pub aborted: bool,
    pub events: Rc<Vec<ModelEvent>>,
    pub diagnostics: Rc<Vec<DiagnosticMessage>>,
}

impl fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInfo")
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .field("aborted", &self.aborted)
            .field("events", &self.events.len())
            .field("diagnostics", &self.diagnostics.len())
            .finish()
    }
}

/// Scoped handle on the ambient session.
///
/// Dropping the handle closes its nesting level; a level closed without
/// [`Session::accept_changes`] aborts the whole session, and the outermost
/// close then rolls every recorded event back.
pub struct Session {
    store: Rc<StoreInner>,
    id: u64,
    accepted: bool,
    closed: bool,
}

impl Session {
    pub(crate) fn new(store: Rc<StoreInner>, id: u64) -> Self {
        Self { store, id, accepted: false, closed: false }
    }

    /// Id of the ambient session this handle participates in
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark this nesting level as committed
    pub fn accept_changes(&mut self) {
        self.accepted = true;
    }

    /// Close this nesting level; the outermost close commits or rolls back
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.store.close_session(self.accepted)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(err) = self.store.close_session(self.accepted) {
                error!(session = self.id, %err, "session close failed on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bits_compose() {
        let mode = SessionMode::UNDO | SessionMode::LOADING;
        assert!(mode.contains(SessionMode::UNDO));
        assert!(mode.is_loading());
        assert!(mode.is_undo_or_redo());
        assert!(!mode.contains(SessionMode::ROLLBACK));
        assert!(!SessionMode::NORMAL.contains(SessionMode::NORMAL));
    }

    #[test]
    fn mode_displays_its_bits() {
        assert_eq!(SessionMode::NORMAL.to_string(), "normal");
        assert_eq!((SessionMode::REDO | SessionMode::LOADING).to_string(), "redo+loading");
    }
}
