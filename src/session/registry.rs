//! Session list and lifecycle

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::Backend;
use crate::error::{Result, SheikhError};
use crate::session::types::{PendingChange, Session, SessionStatus};

/// Owner of all session metadata and the current selection
///
/// Sessions are kept newest first. The current selection may name a session
/// the registry does not know (see [`SessionRegistry::select_session`]);
/// every operation that removes sessions repairs it.
pub struct SessionRegistry {
    backend: Arc<dyn Backend>,
    pub(crate) sessions: Vec<Session>,
    pub(crate) current_session_id: Option<String>,
    default_title: String,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions)
            .field("current_session_id", &self.current_session_id)
            .finish()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    ///
    /// `default_title` names sessions created without a title.
    pub fn new(backend: Arc<dyn Backend>, default_title: impl Into<String>) -> Self {
        Self {
            backend,
            sessions: Vec::new(),
            current_session_id: None,
            default_title: default_title.into(),
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub(crate) fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    /// The selected session, if it exists
    pub fn current_session(&self) -> Option<&Session> {
        self.current_session_id().and_then(|id| self.get(id))
    }

    fn existing_mut(&mut self, session_id: &str) -> Result<&mut Session> {
        self.get_mut(session_id)
            .ok_or_else(|| SheikhError::SessionNotFound(session_id.to_string()).into())
    }

    /// Point the selection at the head of the list if it dangles
    fn repair_selection(&mut self) {
        let dangling = match self.current_session_id.as_deref() {
            Some(id) => self.get(id).is_none(),
            None => true,
        };
        if dangling {
            self.current_session_id = self.sessions.first().map(|s| s.id.clone());
        }
    }

    /// Create a session on the backend, prepend it and select it
    ///
    /// An empty or absent title falls back to the default title. Nothing
    /// changes locally if the backend call fails.
    pub async fn create_session(&mut self, title: Option<&str>) -> Result<Session> {
        let id = self.backend.create_session().await?;
        let title = match title.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => self.default_title.clone(),
        };

        let session = Session::new(id.clone(), title);
        self.sessions.retain(|s| s.id != id);
        self.sessions.insert(0, session.clone());
        self.current_session_id = Some(id);
        tracing::info!("Created session {}", session.id);
        Ok(session)
    }

    /// Replace the local list with the backend's
    ///
    /// The selection is kept if it still exists, otherwise it moves to the
    /// head of the new list. A stop confirmed locally survives a reload that
    /// still reports the session as active. Returns the number of sessions.
    pub async fn load_sessions(&mut self) -> Result<usize> {
        let summaries = self.backend.list_sessions().await?;

        let mut sessions: Vec<Session> = summaries.into_iter().map(Session::from).collect();
        for session in &mut sessions {
            if session.title.is_empty() {
                session.title = self.default_title.clone();
            }
            if self.get(&session.id).map_or(false, Session::is_stopped) {
                session.status = SessionStatus::Stopped;
            }
        }
        self.sessions = sessions;

        self.repair_selection();
        if let Some(id) = self.current_session_id.clone() {
            self.clear_unread(&id);
        }

        tracing::debug!("Loaded {} sessions", self.sessions.len());
        Ok(self.sessions.len())
    }

    /// Select a session and reset its unread counter
    ///
    /// An unknown id is accepted; the selection then names no session until
    /// the next reload or delete repairs it. Returns whether the id is known.
    pub fn select_session(&mut self, session_id: &str) -> bool {
        self.current_session_id = Some(session_id.to_string());
        let known = self.clear_unread(session_id);
        if !known {
            tracing::debug!("Selected unknown session {}", session_id);
        }
        known
    }

    /// Delete a session on the backend, then locally
    pub async fn delete_session(&mut self, session_id: &str) -> Result<()> {
        self.backend.delete_session(session_id).await?;

        self.sessions.retain(|s| s.id != session_id);
        if self.current_session_id.as_deref() == Some(session_id) {
            self.current_session_id = self.sessions.first().map(|s| s.id.clone());
        }
        tracing::info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Stop a session
    ///
    /// The status flips to stopped immediately and is rolled back if the
    /// backend rejects the request. Stopping a stopped session sends
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SheikhError::SessionNotFound`] for an unknown id, or the
    /// backend error after rolling back.
    pub async fn stop_session(&mut self, session_id: &str) -> Result<()> {
        let session = self.existing_mut(session_id)?;
        if session.is_stopped() {
            return Ok(());
        }
        session.pending = Some(PendingChange::Stop {
            previous_status: session.status,
        });
        session.status = SessionStatus::Stopped;

        let confirmed = self.backend.stop_session(session_id).await;
        self.settle(session_id, confirmed)?;
        tracing::info!("Stopped session {}", session_id);
        Ok(())
    }

    /// Rename a session
    ///
    /// The new title shows immediately and is rolled back if the backend
    /// rejects it.
    pub async fn rename_session(&mut self, session_id: &str, title: &str) -> Result<()> {
        let session = self.existing_mut(session_id)?;
        if session.title == title {
            return Ok(());
        }
        let previous_title = std::mem::replace(&mut session.title, title.to_string());
        session.pending = Some(PendingChange::Rename { previous_title });

        let confirmed = self.backend.rename_session(session_id, title).await;
        self.settle(session_id, confirmed)?;
        tracing::info!("Renamed session {}", session_id);
        Ok(())
    }

    /// Resolve a pending change: keep it on success, restore on failure
    fn settle(&mut self, session_id: &str, confirmed: Result<()>) -> Result<()> {
        let Some(session) = self.get_mut(session_id) else {
            return confirmed;
        };
        let pending = session.pending.take();
        if let Err(e) = confirmed {
            match pending {
                Some(PendingChange::Rename { previous_title }) => session.title = previous_title,
                Some(PendingChange::Stop { previous_status }) => session.status = previous_status,
                None => {}
            }
            tracing::warn!("Rolled back change to session {}: {}", session_id, e);
            return Err(e);
        }
        Ok(())
    }

    /// Update a session's latest-message preview and time
    ///
    /// Returns `false` when the session is unknown.
    pub fn record_activity(&mut self, session_id: &str, preview: &str, at: DateTime<Utc>) -> bool {
        match self.get_mut(session_id) {
            Some(session) => {
                session.latest_message_preview = preview.to_string();
                session.latest_message_at = Some(at);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FakeBackend, RecordedCall, SessionSummary};

    fn registry() -> (FakeBackend, SessionRegistry) {
        let fake = FakeBackend::new();
        let registry = SessionRegistry::new(Arc::new(fake.clone()), "New Conversation");
        (fake, registry)
    }

    fn summary(id: &str, status: &str, unread: u32) -> SessionSummary {
        SessionSummary {
            status: status.to_string(),
            unread_message_count: unread,
            ..SessionSummary::new(id, format!("Title {}", id))
        }
    }

    #[tokio::test]
    async fn test_create_on_empty_registry() {
        let (_, mut registry) = registry();
        let session = registry.create_session(None).await.unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.current_session_id(), Some(session.id.as_str()));
        assert_eq!(session.title, "New Conversation");
        assert_eq!(session.unread_count, 0);
    }

    #[tokio::test]
    async fn test_create_prepends_and_selects() {
        let (_, mut registry) = registry();
        let first = registry.create_session(Some("First")).await.unwrap();
        let second = registry.create_session(Some("  Second ")).await.unwrap();

        let ids: Vec<&str> = registry.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
        assert_eq!(second.title, "Second");
        assert_eq!(registry.current_session_id(), Some(second.id.as_str()));
    }

    #[tokio::test]
    async fn test_create_failure_leaves_state() {
        let (fake, mut registry) = registry();
        fake.fail_next(SheikhError::Network("offline".into()));
        assert!(registry.create_session(None).await.is_err());
        assert!(registry.is_empty());
        assert!(registry.current_session_id().is_none());
    }

    #[tokio::test]
    async fn test_load_selects_head_when_nothing_selected() {
        let (fake, mut registry) = registry();
        fake.add_session(summary("old", "active", 0));
        fake.add_session(summary("new", "active", 4));

        assert_eq!(registry.load_sessions().await.unwrap(), 2);
        assert_eq!(registry.current_session_id(), Some("new"));
        assert_eq!(registry.get("new").unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_load_keeps_existing_selection() {
        let (fake, mut registry) = registry();
        fake.add_session(summary("a", "active", 0));
        fake.add_session(summary("b", "active", 0));
        registry.load_sessions().await.unwrap();
        registry.select_session("a");

        fake.add_session(summary("c", "active", 0));
        registry.load_sessions().await.unwrap();
        assert_eq!(registry.current_session_id(), Some("a"));
    }

    #[tokio::test]
    async fn test_load_repairs_vanished_selection() {
        let (fake, mut registry) = registry();
        fake.add_session(summary("a", "active", 0));
        fake.add_session(summary("b", "active", 0));
        registry.load_sessions().await.unwrap();
        registry.select_session("a");

        fake.delete_session("a").await.unwrap();
        registry.load_sessions().await.unwrap();
        assert_eq!(registry.current_session_id(), Some("b"));
    }

    #[tokio::test]
    async fn test_load_keeps_local_stop() {
        let (fake, mut registry) = registry();
        fake.add_session(summary("a", "active", 0));
        registry.load_sessions().await.unwrap();
        registry.stop_session("a").await.unwrap();

        // A backend that forgot the stop must not reactivate the session
        fake.add_session(summary("a", "active", 0));
        registry.load_sessions().await.unwrap();
        assert!(registry.get("a").unwrap().is_stopped());
    }

    #[tokio::test]
    async fn test_select_unknown_id_is_tolerated() {
        let (_, mut registry) = registry();
        assert!(!registry.select_session("ghost"));
        assert_eq!(registry.current_session_id(), Some("ghost"));
        assert!(registry.current_session().is_none());
    }

    #[tokio::test]
    async fn test_delete_current_moves_to_new_head() {
        let (_, mut registry) = registry();
        let a = registry.create_session(None).await.unwrap();
        let b = registry.create_session(None).await.unwrap();
        let c = registry.create_session(None).await.unwrap();

        registry.delete_session(&c.id).await.unwrap();
        assert_eq!(registry.current_session_id(), Some(b.id.as_str()));

        registry.select_session(&a.id);
        registry.delete_session(&b.id).await.unwrap();
        assert_eq!(registry.current_session_id(), Some(a.id.as_str()));

        registry.delete_session(&a.id).await.unwrap();
        assert!(registry.current_session_id().is_none());
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_session() {
        let (fake, mut registry) = registry();
        let a = registry.create_session(None).await.unwrap();
        fake.fail_next(SheikhError::Server {
            code: 500,
            message: "boom".into(),
        });
        assert!(registry.delete_session(&a.id).await.is_err());
        assert!(registry.get(&a.id).is_some());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (fake, mut registry) = registry();
        let a = registry.create_session(None).await.unwrap();
        fake.clear_calls();

        registry.stop_session(&a.id).await.unwrap();
        registry.stop_session(&a.id).await.unwrap();

        assert!(registry.get(&a.id).unwrap().is_stopped());
        assert_eq!(fake.calls(), vec![RecordedCall::StopSession(a.id.clone())]);
    }

    #[tokio::test]
    async fn test_stop_rolls_back_on_rejection() {
        let (fake, mut registry) = registry();
        let a = registry.create_session(None).await.unwrap();
        fake.fail_next(SheikhError::Server {
            code: 409,
            message: "busy".into(),
        });

        let err = registry.stop_session(&a.id).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SheikhError>(),
            Some(SheikhError::Server { code: 409, .. })
        ));
        let session = registry.get(&a.id).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.pending.is_none());
    }

    #[tokio::test]
    async fn test_rename_confirmed_and_rolled_back() {
        let (fake, mut registry) = registry();
        let a = registry.create_session(Some("Before")).await.unwrap();

        registry.rename_session(&a.id, "After").await.unwrap();
        assert_eq!(registry.get(&a.id).unwrap().title, "After");
        assert_eq!(fake.session(&a.id).unwrap().title, "After");

        fake.fail_next(SheikhError::Network("offline".into()));
        assert!(registry.rename_session(&a.id, "Lost").await.is_err());
        let session = registry.get(&a.id).unwrap();
        assert_eq!(session.title, "After");
        assert!(session.pending.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_mutations_fail_without_requests() {
        let (fake, mut registry) = registry();
        let err = registry.stop_session("ghost").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SheikhError>(),
            Some(SheikhError::SessionNotFound(_))
        ));
        assert!(registry.rename_session("ghost", "x").await.is_err());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_record_activity() {
        let (_, mut registry) = registry();
        let a = registry.create_session(None).await.unwrap();
        let now = Utc::now();
        assert!(registry.record_activity(&a.id, "hello", now));
        let session = registry.get(&a.id).unwrap();
        assert_eq!(session.latest_message_preview, "hello");
        assert_eq!(session.latest_message_at, Some(now));
        assert!(!registry.record_activity("ghost", "x", now));
    }
}
