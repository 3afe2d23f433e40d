//! Application-level chat service
//!
//! [`ChatContext`] is created once per application and owns the backend
//! handle, the [`SessionRegistry`], the [`MessageTimeline`] and the
//! [`StreamIngestor`]. Operations that touch more than one of them (sending,
//! deleting, stopping) go through here so previews, unread counters and
//! in-flight streams stay consistent.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sheikh_chat::api::FakeBackend;
//! use sheikh_chat::config::StreamingConfig;
//! use sheikh_chat::ChatContext;
//!
//! # tokio_test::block_on(async {
//! let mut chat = ChatContext::new(Arc::new(FakeBackend::new()), &StreamingConfig::default());
//! let session = chat.create_session(None).await.unwrap();
//! let reply = chat.send_streaming_message(&session.id, "hello").await.unwrap();
//! assert!(reply.content.contains("hello"));
//! assert_eq!(chat.messages(&session.id).len(), 2);
//! # });
//! ```

use std::sync::Arc;

use crate::api::{Backend, ChatRequest, HttpBackend};
use crate::config::{Config, StreamingConfig};
use crate::error::{Result, SheikhError};
use crate::session::{Session, SessionRegistry};
use crate::stream::{StreamConsumer, StreamEvent, StreamIngestor, StreamProgress};
use crate::timeline::{Message, MessageTimeline, Role};

/// Per-application chat state
pub struct ChatContext {
    backend: Arc<dyn Backend>,
    registry: SessionRegistry,
    timeline: MessageTimeline,
    ingestor: StreamIngestor,
}

impl std::fmt::Debug for ChatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatContext")
            .field("registry", &self.registry)
            .field("timeline", &self.timeline)
            .field("ingestor", &self.ingestor)
            .finish()
    }
}

impl ChatContext {
    /// Build a context around an existing backend
    pub fn new(backend: Arc<dyn Backend>, config: &StreamingConfig) -> Self {
        Self {
            registry: SessionRegistry::new(backend.clone(), config.default_title.clone()),
            timeline: MessageTimeline::new(backend.clone()),
            ingestor: StreamIngestor::new(backend.clone(), config),
            backend,
        }
    }

    /// Build a context talking HTTP to the configured backend
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = HttpBackend::new(&config.server)?;
        Ok(Self::new(Arc::new(backend), &config.streaming))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn timeline(&self) -> &MessageTimeline {
        &self.timeline
    }

    pub fn ingestor(&self) -> &StreamIngestor {
        &self.ingestor
    }

    /// Messages of a session in order
    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.timeline.messages(session_id)
    }

    pub async fn create_session(&mut self, title: Option<&str>) -> Result<Session> {
        self.registry.create_session(title).await
    }

    pub async fn load_sessions(&mut self) -> Result<usize> {
        self.registry.load_sessions().await
    }

    pub fn select_session(&mut self, session_id: &str) -> bool {
        self.registry.select_session(session_id)
    }

    /// Select a session and load its history
    ///
    /// While a reply is streaming into the session its local timeline is
    /// newer than the backend's, so the reload is skipped. Returns the
    /// number of messages held for the session.
    pub async fn open_session(&mut self, session_id: &str) -> Result<usize> {
        self.registry.select_session(session_id);
        self.ingestor.reap_released(&mut self.timeline);
        if self.ingestor.is_streaming(session_id) {
            tracing::debug!("Session {} is streaming, keeping local timeline", session_id);
            return Ok(self.timeline.messages(session_id).len());
        }
        self.timeline.load_session_messages(session_id).await
    }

    /// Delete a session, its stream and its timeline
    pub async fn delete_session(&mut self, session_id: &str) -> Result<()> {
        self.registry.delete_session(session_id).await?;
        self.ingestor.abort(&mut self.timeline, session_id);
        self.timeline.clear_session(session_id);
        Ok(())
    }

    /// Stop a session and cut off any reply still streaming into it
    pub async fn stop_session(&mut self, session_id: &str) -> Result<()> {
        self.registry.stop_session(session_id).await?;
        self.ingestor.abort(&mut self.timeline, session_id);
        Ok(())
    }

    pub async fn rename_session(&mut self, session_id: &str, title: &str) -> Result<()> {
        self.registry.rename_session(session_id, title).await
    }

    fn ensure_accepts_messages(&self, session_id: &str) -> Result<()> {
        if self.registry.get(session_id).map_or(false, Session::is_stopped) {
            return Err(SheikhError::SessionStopped(session_id.to_string()).into());
        }
        if self.ingestor.is_streaming(session_id) {
            return Err(SheikhError::StreamInProgress(session_id.to_string()).into());
        }
        Ok(())
    }

    /// Bookkeeping for an assistant message that has landed
    ///
    /// An empty reply leaves the preview alone.
    fn assistant_landed(&mut self, session_id: &str, message: &Message, count_unread: bool) {
        if !message.content.is_empty() {
            self.registry
                .record_activity(session_id, &message.content, message.timestamp);
        }
        if count_unread && self.registry.current_session_id() != Some(session_id) {
            self.registry.increment_unread_count(session_id);
        }
    }

    /// Send a message and wait for the whole reply
    ///
    /// The user message is appended before the request and stays if the
    /// request fails.
    pub async fn send_message(&mut self, session_id: &str, content: &str) -> Result<Message> {
        self.ensure_accepts_messages(session_id)?;

        let user = self
            .timeline
            .add_message(session_id, Role::User, content, None)?;
        self.registry
            .record_activity(session_id, &user.content, user.timestamp);

        let request = ChatRequest::new(content, user.id);
        let reply = self.backend.chat(session_id, &request).await?;

        let assistant = self
            .timeline
            .add_message(session_id, Role::Assistant, reply.response, None)?;
        self.assistant_landed(session_id, &assistant, true);
        Ok(assistant)
    }

    /// Append the user message and placeholder and open the reply stream
    ///
    /// Poll the returned consumer and pass each event to
    /// [`ChatContext::apply_stream_event`].
    pub async fn begin_streaming_message(
        &mut self,
        session_id: &str,
        content: &str,
    ) -> Result<StreamConsumer> {
        self.ensure_accepts_messages(session_id)?;
        let consumer = self
            .ingestor
            .begin(&mut self.timeline, session_id, content)
            .await?;
        self.registry
            .record_activity(session_id, content, chrono::Utc::now());
        Ok(consumer)
    }

    /// Apply one stream event and update previews and unread counters
    pub fn apply_stream_event(
        &mut self,
        consumer: &mut StreamConsumer,
        event: StreamEvent,
    ) -> StreamProgress {
        let progress = self.ingestor.apply(&mut self.timeline, consumer, event);
        if progress.is_terminal() {
            let session_id = consumer.session_id().to_string();
            if let Some(message) = self
                .timeline
                .get(&session_id, consumer.message_id())
                .cloned()
            {
                let arrived = progress != StreamProgress::Cancelled;
                self.assistant_landed(&session_id, &message, arrived);
            }
        }
        progress
    }

    /// Send a message and stream the reply to completion
    ///
    /// Returns the finalized assistant message; a failed stream is not an
    /// error here and shows up as the failure text.
    pub async fn send_streaming_message(
        &mut self,
        session_id: &str,
        content: &str,
    ) -> Result<Message> {
        let mut consumer = self.begin_streaming_message(session_id, content).await?;
        while let Some(event) = consumer.next_event().await {
            if self.apply_stream_event(&mut consumer, event).is_terminal() {
                break;
            }
        }
        self.timeline
            .get(session_id, consumer.message_id())
            .cloned()
            .ok_or_else(|| SheikhError::MessageNotFound(consumer.message_id().to_string()).into())
    }

    /// Stop the session's stream
    ///
    /// A live consumer reports [`StreamEvent::Cancelled`] on its next read.
    /// A stream whose consumer was dropped is finalized here. Returns
    /// `false` when nothing was streaming.
    pub fn cancel_stream(&mut self, session_id: &str) -> bool {
        if self.ingestor.is_released(session_id) {
            return self.ingestor.abort(&mut self.timeline, session_id);
        }
        self.ingestor.cancel(session_id)
    }

    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.ingestor.is_streaming(session_id)
    }

    pub fn total_unread_count(&self) -> u32 {
        self.registry.total_unread_count()
    }
}
