//! Session metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::{unix_seconds, SessionSummary};

/// Lifecycle state of a session
///
/// `Stopped` is terminal: once confirmed, a session never becomes active
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

impl SessionStatus {
    /// Classify a backend status string
    pub fn from_wire(status: &str) -> Self {
        match status {
            "stopped" | "cancelled" | "completed" | "failed" => SessionStatus::Stopped,
            "active" | "" => SessionStatus::Active,
            other => {
                tracing::debug!("Treating unknown session status '{}' as active", other);
                SessionStatus::Active
            }
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A local change awaiting backend confirmation, with what to restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    Rename { previous_title: String },
    Stop { previous_status: SessionStatus },
}

/// A conversation as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub latest_message_preview: String,
    pub latest_message_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub unread_count: u32,
    /// Set while a rename or stop is tentative
    pub pending: Option<PendingChange>,
}

impl Session {
    /// A fresh, empty, active session
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            latest_message_preview: String::new(),
            latest_message_at: None,
            status: SessionStatus::Active,
            unread_count: 0,
            pending: None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.status == SessionStatus::Stopped
    }
}

impl From<SessionSummary> for Session {
    fn from(summary: SessionSummary) -> Self {
        let latest_message_at = match summary.latest_message_at {
            0 => None,
            secs => unix_seconds(secs),
        };
        Self {
            id: summary.session_id,
            title: summary.title,
            latest_message_preview: summary.latest_message,
            latest_message_at,
            status: SessionStatus::from_wire(&summary.status),
            unread_count: summary.unread_message_count,
            pending: None,
        }
    }
}
