//! Unread counters
//!
//! Counters live on each [`Session`](crate::session::Session); these
//! methods are the only ones that change them besides a reload. The total is
//! summed on every call.

use crate::session::registry::SessionRegistry;

impl SessionRegistry {
    /// Count one arrival in a session the user is not looking at
    ///
    /// Does nothing for the current session or an unknown id. Returns
    /// whether the counter moved.
    pub fn increment_unread_count(&mut self, session_id: &str) -> bool {
        if self.current_session_id.as_deref() == Some(session_id) {
            return false;
        }
        match self.get_mut(session_id) {
            Some(session) => {
                session.unread_count = session.unread_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Unread arrivals in one session; 0 for unknown ids
    pub fn unread_count(&self, session_id: &str) -> u32 {
        self.get(session_id).map_or(0, |s| s.unread_count)
    }

    /// Unread arrivals across all sessions
    pub fn total_unread_count(&self) -> u32 {
        self.sessions
            .iter()
            .fold(0u32, |total, s| total.saturating_add(s.unread_count))
    }

    /// Reset a session's counter; returns whether the session is known
    pub fn clear_unread(&mut self, session_id: &str) -> bool {
        match self.get_mut(session_id) {
            Some(session) => {
                session.unread_count = 0;
                true
            }
            None => false,
        }
    }
}
