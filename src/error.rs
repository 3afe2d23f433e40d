//! Error types for the Sheikh chat engine
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for chat engine operations
///
/// REST failures surface as [`SheikhError::Network`] or
/// [`SheikhError::Server`]. Push-stream failures are split into
/// [`SheikhError::Parse`] (one bad frame, the stream continues) and
/// [`SheikhError::StreamTransport`] (the connection is gone).
#[derive(Error, Debug)]
pub enum SheikhError {
    /// The request could not be dispatched or completed
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-zero envelope code or a non-2xx status
    #[error("Server error (code {code}): {message}")]
    Server {
        /// Envelope `code` or HTTP status
        code: i64,
        /// Envelope `msg` or response body
        message: String,
    },

    /// A payload could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// The push connection failed or ended without a terminal frame
    #[error("Stream transport error: {0}")]
    StreamTransport(String),

    /// A stream is already open for the session
    #[error("A response is already streaming for session {0}")]
    StreamInProgress(String),

    /// No session with the given id is known locally
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session was stopped and accepts no further messages
    #[error("Session is stopped: {0}")]
    SessionStopped(String),

    /// No message with the given id exists in the session
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The message is still streaming and cannot be rewritten
    #[error("Message is still streaming: {0}")]
    MessageStreaming(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for chat engine operations
///
/// Uses `anyhow::Error` so call sites can attach context; callers that need
/// to branch on the failure kind use `downcast_ref::<SheikhError>()`.
pub type Result<T> = anyhow::Result<T>;
