//! Message type held by the timeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Per-message bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// `true` while a push connection is still filling the content
    pub streaming: bool,
    /// Id of the backend event this message corresponds to
    pub event_id: Option<String>,
    /// Reason the reply failed, set alongside the failure text
    pub error: Option<String>,
}

impl MessageMetadata {
    /// Metadata for an assistant placeholder awaiting its stream
    pub fn streaming() -> Self {
        Self {
            streaming: true,
            ..Default::default()
        }
    }
}

/// One entry of a session's timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    /// Grows while streaming, fixed afterwards
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: MessageMetadata,
}

impl Message {
    /// Whether the message is still being filled by a stream
    pub fn is_streaming(&self) -> bool {
        self.metadata.streaming
    }

    /// Whether the reply failed and carries the failure text
    pub fn is_failed(&self) -> bool {
        self.metadata.error.is_some()
    }
}

/// Generate a message id
///
/// ULIDs sort by creation time and carry 80 random bits; the timeline still
/// checks for collisions within a session before using one.
pub fn new_message_id() -> String {
    Ulid::new().to_string()
}
