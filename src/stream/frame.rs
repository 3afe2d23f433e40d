//! Frames carried by a streaming chat reply

use serde_json::Value;

use crate::api::sse::SseEvent;
use crate::error::SheikhError;

/// A decoded frame of a streaming reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Incremental text; frames without a `content` field carry `None`
    Chunk { content: Option<String> },
    /// The reply is complete
    Done,
    /// The backend gave up on the reply
    Error { reason: Option<String> },
}

/// Frame kinds known on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameKind {
    Message,
    Done,
    Error,
    Ping,
    Unknown(String),
}

impl FrameKind {
    fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "message" | "chunk" => FrameKind::Message,
            "done" => FrameKind::Done,
            "error" => FrameKind::Error,
            "ping" => FrameKind::Ping,
            _ => FrameKind::Unknown(name.to_string()),
        }
    }
}

impl StreamFrame {
    /// Text chunk frame
    pub fn chunk(content: impl Into<String>) -> Self {
        StreamFrame::Chunk {
            content: Some(content.into()),
        }
    }

    /// Error frame with a reason
    pub fn error(reason: impl Into<String>) -> Self {
        StreamFrame::Error {
            reason: Some(reason.into()),
        }
    }

    /// Whether this frame ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done | StreamFrame::Error { .. })
    }

    /// Decode a server-sent event into a frame
    ///
    /// The SSE `event:` name picks the kind; when it is absent the payload's
    /// `type` field is consulted. Keep-alive pings decode to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`SheikhError::Parse`] when the payload is not a JSON object
    /// or the kind is not one this client understands. Such frames are
    /// dropped by the caller; the stream itself stays open.
    pub fn from_sse(event: &SseEvent) -> Result<Option<StreamFrame>, SheikhError> {
        let payload = if event.data.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<Value>(&event.data) {
                Ok(Value::Object(map)) => Some(Value::Object(map)),
                Ok(_) => {
                    return Err(SheikhError::Parse(format!(
                        "frame payload is not a JSON object: {}",
                        event.data
                    )))
                }
                Err(e) => {
                    return Err(SheikhError::Parse(format!(
                        "frame payload is not valid JSON: {}",
                        e
                    )))
                }
            }
        };

        let kind = match event.event.as_deref() {
            Some(name) if !name.trim().is_empty() => FrameKind::from_name(name),
            _ => payload
                .as_ref()
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
                .map(FrameKind::from_name)
                .unwrap_or(FrameKind::Message),
        };

        match kind {
            FrameKind::Ping => Ok(None),
            FrameKind::Message => Ok(Some(StreamFrame::Chunk {
                content: payload
                    .as_ref()
                    .and_then(|p| p.get("content"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })),
            FrameKind::Done => Ok(Some(StreamFrame::Done)),
            FrameKind::Error => Ok(Some(StreamFrame::Error {
                reason: payload.as_ref().and_then(error_reason),
            })),
            FrameKind::Unknown(name) => Err(SheikhError::Parse(format!(
                "unknown frame kind '{}'",
                name
            ))),
        }
    }
}

/// Pull a human-readable reason out of an error payload
///
/// The backend emits either `{"error": "..."}` or a whole failed envelope
/// `{"code": 500, "msg": "...", "data": null}`.
fn error_reason(payload: &Value) -> Option<String> {
    ["error", "msg", "message"].iter().find_map(|key| {
        payload.get(*key).and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(inner) => inner
                .get("msg")
                .or_else(|| inner.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
    })
}
