//! Backend access for the chat engine
//!
//! This module contains the [`Backend`] abstraction every component talks
//! to, the wire types it exchanges, the reqwest-based [`HttpBackend`], the
//! SSE decoder used for streaming replies. With the `test-util` feature
//! it also exports an in-process `FakeBackend` for tests.

#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod http;
pub mod sse;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{Result, SheikhError};
use crate::stream::StreamFrame;

#[cfg(any(test, feature = "test-util"))]
pub use fake::{FakeBackend, RecordedCall};
pub use http::HttpBackend;
pub use types::{
    ApiEnvelope, ChatReply, ChatRequest, EventKind, HistoryEvent, SessionDetail, SessionSummary,
};

/// Ordered frames of one push connection
///
/// Items are typed so the consumer can tell a malformed frame
/// ([`SheikhError::Parse`]) from a dead connection
/// ([`SheikhError::StreamTransport`]). Dropping the stream closes the
/// connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<StreamFrame, SheikhError>> + Send>>;

/// Operations the chat engine needs from the conversation backend
///
/// REST methods fail with [`SheikhError::Network`] when the request could
/// not be completed and [`SheikhError::Server`] when the backend rejected
/// it. Nothing is retried.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Allocate a new session and return its id
    async fn create_session(&self) -> Result<String>;

    /// Fetch every session the backend knows about
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Fetch one session with its event log
    async fn get_session(&self, session_id: &str) -> Result<SessionDetail>;

    /// Delete a session
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Stop a session
    async fn stop_session(&self, session_id: &str) -> Result<()>;

    /// Confirm a title change
    async fn rename_session(&self, session_id: &str, title: &str) -> Result<()>;

    /// Send a message and wait for the whole reply
    async fn chat(&self, session_id: &str, request: &ChatRequest) -> Result<ChatReply>;

    /// Send a message and open a push connection carrying the reply
    ///
    /// # Errors
    ///
    /// Returns an error if the connection could not be established; errors
    /// after that point arrive as stream items.
    async fn open_chat_stream(&self, session_id: &str, request: &ChatRequest)
        -> Result<FrameStream>;
}
