//! Process-wide session registry.
//!
//! Maps tab identifiers to live session handles. The registry exists to fan
//! global events out to every session (settings changes, close-all); page
//! traffic never routes through it.
//!
//! Mutation happens only at session lifecycle edges: [`TabSession::spawn`]
//! registers, teardown removes.
//!
//! [`TabSession::spawn`]: crate::session::TabSession::spawn

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::identifiers::TabId;
use crate::session::SessionHandle;

// ============================================================================
// SessionRegistry
// ============================================================================

/// Thread-safe tab → session map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<TabId, SessionHandle>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for `tab_id`, replacing any previous one.
    pub fn register(&self, tab_id: TabId, session: SessionHandle) {
        let previous = self.sessions.write().insert(tab_id, session);
        if previous.is_some() {
            debug!(tab = %tab_id, "session replaced in registry");
        }
    }

    /// Returns the session for `tab_id`, if any.
    #[must_use]
    pub fn get(&self, tab_id: TabId) -> Option<SessionHandle> {
        self.sessions.read().get(&tab_id).cloned()
    }

    /// Runs `f` for every registered session.
    pub fn for_each(&self, mut f: impl FnMut(&SessionHandle)) {
        for session in self.sessions.read().values() {
            f(session);
        }
    }

    /// Removes the session for `tab_id`.
    pub fn remove(&self, tab_id: TabId) {
        if self.sessions.write().remove(&tab_id).is_some() {
            debug!(tab = %tab_id, "session removed from registry");
        }
    }

    /// Number of live sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no sessions are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Fans a settings change out to every live session.
    ///
    /// Sessions that already closed are skipped; their teardown removes
    /// them from the map.
    pub fn broadcast_settings_changed(&self) {
        self.for_each(|session| {
            let _ = session.settings_changed();
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
