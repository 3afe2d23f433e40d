//! Per-session ordered message log

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::api::{Backend, EventKind};
use crate::error::{Result, SheikhError};
use crate::timeline::message::{new_message_id, Message, MessageMetadata, Role};

/// Ordered message sequences keyed by session id
///
/// Messages keep insertion order; nothing here sorts or reorders. Streaming
/// content is only touched through the crate-internal `append_content`,
/// `complete_streaming` and `fail_streaming`, which the stream ingestor
/// drives.
pub struct MessageTimeline {
    backend: Arc<dyn Backend>,
    sessions: HashMap<String, Vec<Message>>,
}

impl std::fmt::Debug for MessageTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTimeline")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl MessageTimeline {
    /// Create an empty timeline backed by `backend`
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            sessions: HashMap::new(),
        }
    }

    /// Messages of a session in order; empty when the session has none
    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.sessions
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Look up a message by id
    pub fn get(&self, session_id: &str, message_id: &str) -> Option<&Message> {
        self.sessions
            .get(session_id)?
            .iter()
            .find(|m| m.id == message_id)
    }

    /// The session's streaming message, if one is in flight
    pub fn streaming_message(&self, session_id: &str) -> Option<&Message> {
        self.sessions
            .get(session_id)?
            .iter()
            .find(|m| m.metadata.streaming)
    }

    /// Append a message to a session, creating the sequence if needed
    ///
    /// The id is generated here and is unique within the session. An absent
    /// `event_id` defaults to the message id.
    ///
    /// # Errors
    ///
    /// Returns [`SheikhError::StreamInProgress`] when `metadata` marks the
    /// message as streaming and the session already has a streaming message.
    pub fn add_message(
        &mut self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
        metadata: Option<MessageMetadata>,
    ) -> Result<Message> {
        let mut metadata = metadata.unwrap_or_default();
        let sequence = self.sessions.entry(session_id.to_string()).or_default();

        if metadata.streaming && sequence.iter().any(|m| m.metadata.streaming) {
            return Err(SheikhError::StreamInProgress(session_id.to_string()).into());
        }

        let mut id = new_message_id();
        while sequence.iter().any(|m| m.id == id) {
            id = new_message_id();
        }
        if metadata.event_id.is_none() {
            metadata.event_id = Some(id.clone());
        }

        let message = Message {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        };
        tracing::debug!(
            "Added {} message {} to session {}",
            message.role,
            message.id,
            session_id
        );
        sequence.push(message.clone());
        Ok(message)
    }

    /// Replace a session's messages with its server-side event log
    ///
    /// The log is fetched and converted in full before anything local
    /// changes, so a failed or malformed load leaves the previous sequence
    /// intact. Events other than received/sent messages are skipped.
    ///
    /// Returns the number of messages now held for the session.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or [`SheikhError::Parse`] for an event
    /// with an unreadable timestamp.
    pub async fn load_session_messages(&mut self, session_id: &str) -> Result<usize> {
        let detail = self.backend.get_session(session_id).await?;

        let mut loaded: Vec<Message> = Vec::with_capacity(detail.events.len());
        for event in &detail.events {
            let role = match event.kind() {
                EventKind::MessageReceived => Role::User,
                EventKind::MessageSent => Role::Assistant,
                EventKind::Other(kind) => {
                    tracing::debug!("Skipping {} event in session {}", kind, session_id);
                    continue;
                }
            };

            let timestamp = event.parsed_timestamp()?.unwrap_or_else(Utc::now);

            let mut id = event.event_id.clone();
            while id.is_empty() || loaded.iter().any(|m| m.id == id) {
                id = new_message_id();
            }

            loaded.push(Message {
                id,
                session_id: session_id.to_string(),
                role,
                content: event.content(),
                timestamp,
                metadata: MessageMetadata {
                    streaming: false,
                    event_id: (!event.event_id.is_empty()).then(|| event.event_id.clone()),
                    error: None,
                },
            });
        }

        let count = loaded.len();
        self.sessions.insert(session_id.to_string(), loaded);
        tracing::debug!("Loaded {} messages for session {}", count, session_id);
        Ok(count)
    }

    /// Replace the content of a finished message
    ///
    /// # Errors
    ///
    /// Returns [`SheikhError::MessageNotFound`] for an unknown id and
    /// [`SheikhError::MessageStreaming`] while the message is streaming.
    pub fn update_message(
        &mut self,
        session_id: &str,
        message_id: &str,
        content: impl Into<String>,
    ) -> Result<Message> {
        let message = self.find_mut(session_id, message_id)?;
        if message.metadata.streaming {
            return Err(SheikhError::MessageStreaming(message_id.to_string()).into());
        }
        message.content = content.into();
        Ok(message.clone())
    }

    /// Remove a message, returning it
    pub fn delete_message(&mut self, session_id: &str, message_id: &str) -> Result<Message> {
        let sequence = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SheikhError::MessageNotFound(message_id.to_string()))?;
        let index = sequence
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| SheikhError::MessageNotFound(message_id.to_string()))?;
        Ok(sequence.remove(index))
    }

    /// Drop a session's whole sequence
    pub fn clear_session(&mut self, session_id: &str) -> Option<Vec<Message>> {
        self.sessions.remove(session_id)
    }

    fn find_mut(&mut self, session_id: &str, message_id: &str) -> Result<&mut Message> {
        self.sessions
            .get_mut(session_id)
            .and_then(|seq| seq.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| SheikhError::MessageNotFound(message_id.to_string()).into())
    }

    fn streaming_mut(&mut self, session_id: &str, message_id: &str) -> Result<&mut Message> {
        let message = self.find_mut(session_id, message_id)?;
        if !message.metadata.streaming {
            return Err(SheikhError::MessageNotFound(format!(
                "{} is not streaming",
                message_id
            ))
            .into());
        }
        Ok(message)
    }

    /// Append streamed text to a streaming message
    pub(crate) fn append_content(
        &mut self,
        session_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        self.streaming_mut(session_id, message_id)?
            .content
            .push_str(text);
        Ok(())
    }

    /// Finish a streaming message, keeping what has accumulated
    pub(crate) fn complete_streaming(&mut self, session_id: &str, message_id: &str) -> Result<()> {
        self.streaming_mut(session_id, message_id)?.metadata.streaming = false;
        Ok(())
    }

    /// Finish a streaming message as failed
    ///
    /// The accumulated content is discarded in favour of `failure_text`.
    pub(crate) fn fail_streaming(
        &mut self,
        session_id: &str,
        message_id: &str,
        failure_text: &str,
        reason: &str,
    ) -> Result<()> {
        let message = self.streaming_mut(session_id, message_id)?;
        message.content = failure_text.to_string();
        message.metadata.streaming = false;
        message.metadata.error = Some(reason.to_string());
        Ok(())
    }
}
