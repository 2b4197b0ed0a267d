//! Infrastructure layer
//!
//! Bridges between the domain layer and external systems: synchronization
//! adapters observing the session stream, and the JSON translator used for
//! load and save.

pub mod json;

use tracing::info;

use crate::session::SessionInfo;

/// External synchronization adapter bound to a domain.
///
/// Adapters are owned and disposed by their domain and observe every
/// completed session that touched it. `SessionInfo::session_id` doubles as
/// the correlation id carried by each event, so an adapter echoing changes
/// back can suppress its own re-dispatch.
pub trait DomainAdapter {
    /// A session touching the adapter's domain completed
    fn on_session_completed(&self, info: &SessionInfo);

    /// The owning domain is being disposed
    fn dispose(&self) {}
}

/// Reference adapter that logs every observed event
pub struct TraceAdapter {
    domain: String,
}

impl TraceAdapter {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }
}

impl DomainAdapter for TraceAdapter {
    fn on_session_completed(&self, info: &SessionInfo) {
        for event in info.events.iter().filter(|e| e.domain() == self.domain) {
            info!(
                session = info.session_id,
                event = event.event_name(),
                element = %event.id(),
                aborted = info.aborted,
                "session event"
            );
        }
    }
}
