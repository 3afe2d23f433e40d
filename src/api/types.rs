//! Wire types for the Sheikh REST API
//!
//! Every REST response is wrapped in an [`ApiEnvelope`]: `code == 0` means
//! success and `data` carries the payload, any other code is an
//! application-level failure described by `msg`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SheikhError;

/// Response envelope shared by all REST endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// `0` on success, otherwise an application error code
    pub code: i64,
    /// Human-readable status message
    #[serde(default)]
    pub msg: String,
    /// Payload; `null` for endpoints that return nothing
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Convert the envelope into its payload, mapping non-zero codes to
    /// [`SheikhError::Server`]
    pub fn into_result(self) -> Result<Option<T>, SheikhError> {
        if self.code != 0 {
            return Err(SheikhError::Server {
                code: self.code,
                message: self.msg,
            });
        }
        Ok(self.data)
    }

    /// Like [`ApiEnvelope::into_result`] but treats a missing payload as a
    /// parse failure
    pub fn into_data(self, operation: &str) -> Result<T, SheikhError> {
        self.into_result()?
            .ok_or_else(|| SheikhError::Parse(format!("{} response carried no data", operation)))
    }
}

/// Payload of `PUT /api/v1/sessions`
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedSession {
    /// Server-assigned session id
    pub session_id: String,
}

/// Payload of `GET /api/v1/sessions`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionList {
    /// Sessions in server order
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
}

/// One entry of the session list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub latest_message: String,
    /// Unix seconds, `0` when the session has no messages
    #[serde(default)]
    pub latest_message_at: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub unread_message_count: u32,
}

impl SessionSummary {
    /// Summary for a freshly created, empty, active session
    pub fn new(session_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            title: title.into(),
            latest_message: String::new(),
            latest_message_at: 0,
            status: "active".to_string(),
            unread_message_count: 0,
        }
    }
}

/// Payload of `GET /api/v1/sessions/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDetail {
    pub session_id: String,
    #[serde(default)]
    pub title: String,
    /// Event log in server order
    #[serde(default)]
    pub events: Vec<HistoryEvent>,
}

/// Kind of an entry in a session's event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The backend received a user message
    MessageReceived,
    /// The backend sent an assistant message
    MessageSent,
    /// Anything else the backend records (session_created, tool_invoked, ...)
    Other(String),
}

impl EventKind {
    /// Classify a wire `event_type`
    pub fn from_wire(event_type: &str) -> Self {
        match event_type {
            "message_received" => EventKind::MessageReceived,
            "message_sent" => EventKind::MessageSent,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// One entry of a session's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    #[serde(default)]
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// RFC 3339 string, naive ISO-8601 string or unix seconds
    #[serde(default)]
    pub timestamp: serde_json::Value,
}

impl HistoryEvent {
    /// Build an event carrying `{"content": ...}` stamped with the current time
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            data: serde_json::json!({ "content": content.into() }),
            timestamp: serde_json::Value::String(Utc::now().to_rfc3339()),
        }
    }

    /// Classified event type
    pub fn kind(&self) -> EventKind {
        EventKind::from_wire(&self.event_type)
    }

    /// Message text carried by the event
    ///
    /// Reads `data.content`, then `data.message`, then falls back to an
    /// empty string.
    pub fn content(&self) -> String {
        ["content", "message"]
            .iter()
            .find_map(|key| self.data.get(*key).and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string()
    }

    /// Parsed event time, `None` when the event carries none
    pub fn parsed_timestamp(&self) -> Result<Option<DateTime<Utc>>, SheikhError> {
        parse_wire_timestamp(&self.timestamp)
    }
}

/// Body of `POST /api/v1/sessions/{id}/chat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Unix seconds
    pub timestamp: i64,
    pub event_id: String,
}

impl ChatRequest {
    /// Request stamped with the current time
    pub fn new(message: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now().timestamp(),
            event_id: event_id.into(),
        }
    }
}

/// Payload of the non-streaming chat call
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// Body of `PATCH /api/v1/sessions/{id}`
#[derive(Debug, Clone, Serialize)]
pub struct RenameRequest<'a> {
    pub title: &'a str,
}

/// Convert unix seconds into a UTC timestamp
pub fn unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Parse the timestamp shapes the backend emits
///
/// `null` and `""` yield `None`. Numbers are unix seconds. Strings are RFC
/// 3339, or naive ISO-8601 read as UTC (Python's `isoformat()` output).
pub fn parse_wire_timestamp(
    value: &serde_json::Value,
) -> Result<Option<DateTime<Utc>>, SheikhError> {
    use serde_json::Value;

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let parsed = if let Some(secs) = n.as_i64() {
                unix_seconds(secs)
            } else {
                n.as_f64().and_then(|f| {
                    let secs = f.trunc() as i64;
                    let nanos = (f.fract() * 1_000_000_000.0) as u32;
                    Utc.timestamp_opt(secs, nanos).single()
                })
            };
            parsed
                .map(Some)
                .ok_or_else(|| SheikhError::Parse(format!("timestamp out of range: {}", n)))
        }
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(dt.with_timezone(&Utc)));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| Some(Utc.from_utc_datetime(&naive)))
                .map_err(|e| SheikhError::Parse(format!("invalid timestamp '{}': {}", s, e)))
        }
        other => Err(SheikhError::Parse(format!(
            "unsupported timestamp value: {}",
            other
        ))),
    }
}
