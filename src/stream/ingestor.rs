//! Streaming reply ingestion
//!
//! [`StreamIngestor`] opens at most one push connection per session and
//! applies its events to the [`MessageTimeline`]:
//!
//! 1. the user message is appended,
//! 2. an empty assistant placeholder marked as streaming is appended,
//! 3. the connection is opened,
//! 4. chunks are appended to the placeholder in arrival order,
//! 5. `done` (or a cancellation) keeps the accumulated text,
//! 6. an `error` frame or a transport failure replaces it with the
//!    configured failure text.
//!
//! Opening and applying are separate steps so several sessions can stream
//! at once: [`StreamIngestor::begin`] hands back a [`StreamConsumer`] that
//! the caller polls, feeding each event to [`StreamIngestor::apply`].
//!
//! A consumer dropped before its terminal event leaves a released stream
//! behind. Released streams no longer count as streaming and are finalized
//! like a cancellation by [`StreamIngestor::reap_released`], which
//! [`StreamIngestor::begin`] runs first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{Backend, ChatRequest};
use crate::config::StreamingConfig;
use crate::error::{Result, SheikhError};
use crate::stream::consumer::{StreamConsumer, StreamEvent};
use crate::stream::frame::StreamFrame;
use crate::timeline::{Message, MessageMetadata, MessageTimeline, Role};

/// Effect of one applied event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProgress {
    /// Text was appended to the placeholder
    Appended,
    /// Nothing changed (content-less chunk, dropped frame, stale consumer)
    Ignored,
    /// The reply finished with its accumulated text
    Completed,
    /// The reply was replaced with the failure text
    Failed,
    /// The reply was cut short and keeps what had arrived
    Cancelled,
}

impl StreamProgress {
    /// Whether the stream is over
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamProgress::Completed | StreamProgress::Failed | StreamProgress::Cancelled
        )
    }
}

#[derive(Debug)]
struct ActiveStream {
    message_id: String,
    cancel: CancellationToken,
    /// Cancelled when the consumer is dropped
    release: CancellationToken,
}

impl ActiveStream {
    fn is_released(&self) -> bool {
        self.release.is_cancelled()
    }
}

/// Drives streaming replies into the timeline
pub struct StreamIngestor {
    backend: Arc<dyn Backend>,
    active: HashMap<String, ActiveStream>,
    failure_message: String,
    idle_timeout: Option<Duration>,
}

impl std::fmt::Debug for StreamIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamIngestor")
            .field("active", &self.active)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl StreamIngestor {
    /// Create an ingestor
    pub fn new(backend: Arc<dyn Backend>, config: &StreamingConfig) -> Self {
        Self {
            backend,
            active: HashMap::new(),
            failure_message: config.failure_message.clone(),
            idle_timeout: config.idle_timeout(),
        }
    }

    /// Whether a reply is streaming into `session_id`
    ///
    /// A stream whose consumer was dropped does not count.
    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.active
            .get(session_id)
            .map_or(false, |active| !active.is_released())
    }

    /// Whether the session's stream lost its consumer and awaits finalizing
    pub fn is_released(&self, session_id: &str) -> bool {
        self.active
            .get(session_id)
            .map_or(false, ActiveStream::is_released)
    }

    /// Id of the placeholder currently streaming in `session_id`
    pub fn active_message_id(&self, session_id: &str) -> Option<&str> {
        self.active.get(session_id).map(|a| a.message_id.as_str())
    }

    /// Text written into replies that fail
    pub fn failure_message(&self) -> &str {
        &self.failure_message
    }

    /// Ask the session's consumer to stop
    ///
    /// The consumer reports [`StreamEvent::Cancelled`] on its next read.
    /// Returns `false` when nothing is streaming or the consumer is gone;
    /// use [`StreamIngestor::abort`] to finalize a released stream.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active.get(session_id) {
            Some(active) if !active.is_released() => {
                tracing::info!("Cancelling stream for session {}", session_id);
                active.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Finalize every stream whose consumer was dropped
    ///
    /// Each placeholder keeps the text that had arrived, as with a
    /// cancellation. Returns the ids of the sessions reaped.
    pub fn reap_released(&mut self, timeline: &mut MessageTimeline) -> Vec<String> {
        let released: Vec<String> = self
            .active
            .iter()
            .filter(|(_, active)| active.is_released())
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in &released {
            tracing::debug!("Consumer for session {} was dropped", session_id);
            self.abort(timeline, session_id);
        }
        released
    }

    /// Cancel and forget the session's stream right away
    ///
    /// The placeholder, if still present, keeps its accumulated text. The
    /// consumer becomes stale and any further events it yields are ignored.
    pub fn abort(&mut self, timeline: &mut MessageTimeline, session_id: &str) -> bool {
        let Some(active) = self.active.remove(session_id) else {
            return false;
        };
        active.cancel.cancel();
        if let Err(e) = timeline.complete_streaming(session_id, &active.message_id) {
            tracing::debug!("Aborted stream had no placeholder left: {}", e);
        }
        tracing::info!("Aborted stream for session {}", session_id);
        true
    }

    /// Append the user message and placeholder, then open the connection
    ///
    /// A connection that cannot be opened still yields a consumer; its only
    /// event is a failure, so the placeholder is finalized through the
    /// normal path.
    ///
    /// # Errors
    ///
    /// Returns [`SheikhError::StreamInProgress`] if the session is already
    /// streaming. Nothing is appended in that case.
    pub async fn begin(
        &mut self,
        timeline: &mut MessageTimeline,
        session_id: &str,
        content: &str,
    ) -> Result<StreamConsumer> {
        self.reap_released(timeline);
        if self.is_streaming(session_id) || timeline.streaming_message(session_id).is_some() {
            return Err(SheikhError::StreamInProgress(session_id.to_string()).into());
        }

        let user = timeline.add_message(session_id, Role::User, content, None)?;
        let placeholder = timeline.add_message(
            session_id,
            Role::Assistant,
            "",
            Some(MessageMetadata::streaming()),
        )?;

        let cancel = CancellationToken::new();
        let release = CancellationToken::new();
        self.active.insert(
            session_id.to_string(),
            ActiveStream {
                message_id: placeholder.id.clone(),
                cancel: cancel.clone(),
                release: release.clone(),
            },
        );

        let request = ChatRequest::new(content, user.id);
        match self.backend.open_chat_stream(session_id, &request).await {
            Ok(frames) => {
                tracing::info!(
                    "Opened stream for session {} (message {})",
                    session_id,
                    placeholder.id
                );
                Ok(StreamConsumer::new(
                    session_id,
                    placeholder.id,
                    frames,
                    cancel,
                    self.idle_timeout,
                )
                .with_release(release))
            }
            Err(e) => {
                tracing::warn!("Failed to open stream for session {}: {}", session_id, e);
                Ok(
                    StreamConsumer::failed(session_id, placeholder.id, cancel, e.to_string())
                        .with_release(release),
                )
            }
        }
    }

    /// Apply one consumer event to the timeline
    pub fn apply(
        &mut self,
        timeline: &mut MessageTimeline,
        consumer: &mut StreamConsumer,
        event: StreamEvent,
    ) -> StreamProgress {
        let session_id = consumer.session_id().to_string();
        let message_id = consumer.message_id().to_string();

        if self.active_message_id(&session_id) != Some(message_id.as_str()) {
            tracing::debug!(
                "Ignoring event for stale stream {} in session {}",
                message_id,
                session_id
            );
            consumer.close();
            return StreamProgress::Ignored;
        }

        let progress = match event {
            StreamEvent::Frame(StreamFrame::Chunk {
                content: Some(text),
            }) => match timeline.append_content(&session_id, &message_id, &text) {
                Ok(()) => StreamProgress::Appended,
                Err(e) => {
                    tracing::warn!("Stream placeholder vanished: {}", e);
                    StreamProgress::Failed
                }
            },
            StreamEvent::Frame(StreamFrame::Chunk { content: None }) => StreamProgress::Ignored,
            StreamEvent::Malformed(reason) => {
                tracing::warn!("Dropped malformed frame in session {}: {}", session_id, reason);
                StreamProgress::Ignored
            }
            StreamEvent::Frame(StreamFrame::Done) => {
                self.finalize(timeline, &session_id, &message_id, None);
                StreamProgress::Completed
            }
            StreamEvent::Cancelled => {
                self.finalize(timeline, &session_id, &message_id, None);
                StreamProgress::Cancelled
            }
            StreamEvent::Frame(StreamFrame::Error { reason }) => {
                let reason = reason.unwrap_or_else(|| "backend reported an error".to_string());
                self.finalize(timeline, &session_id, &message_id, Some(&reason));
                StreamProgress::Failed
            }
            StreamEvent::Failed(reason) => {
                self.finalize(timeline, &session_id, &message_id, Some(&reason));
                StreamProgress::Failed
            }
        };

        if progress.is_terminal() {
            self.active.remove(&session_id);
            consumer.close();
            tracing::info!(
                "Stream for session {} finished: {:?}",
                session_id,
                progress
            );
        }
        progress
    }

    fn finalize(
        &self,
        timeline: &mut MessageTimeline,
        session_id: &str,
        message_id: &str,
        failure: Option<&str>,
    ) {
        let result = match failure {
            Some(reason) => {
                tracing::warn!("Stream for session {} failed: {}", session_id, reason);
                timeline.fail_streaming(session_id, message_id, &self.failure_message, reason)
            }
            None => timeline.complete_streaming(session_id, message_id),
        };
        if let Err(e) = result {
            tracing::debug!("Nothing to finalize for message {}: {}", message_id, e);
        }
    }

    /// Pull and apply events until the stream is over
    pub async fn drive(
        &mut self,
        timeline: &mut MessageTimeline,
        consumer: &mut StreamConsumer,
    ) -> StreamProgress {
        let mut last = StreamProgress::Ignored;
        while let Some(event) = consumer.next_event().await {
            last = self.apply(timeline, consumer, event);
            if last.is_terminal() {
                break;
            }
        }
        last
    }

    /// Send a message and stream the reply to completion
    ///
    /// Returns the finalized assistant message. Transport failures do not
    /// surface as errors; they show up as the failure text in the message.
    pub async fn send_streaming_message(
        &mut self,
        timeline: &mut MessageTimeline,
        session_id: &str,
        content: &str,
    ) -> Result<Message> {
        let mut consumer = self.begin(timeline, session_id, content).await?;
        self.drive(timeline, &mut consumer).await;
        timeline
            .get(session_id, consumer.message_id())
            .cloned()
            .ok_or_else(|| SheikhError::MessageNotFound(consumer.message_id().to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FakeBackend, RecordedCall};
    use crate::config::DEFAULT_FAILURE_MESSAGE;

    fn setup() -> (FakeBackend, MessageTimeline, StreamIngestor) {
        let fake = FakeBackend::new();
        let backend: Arc<dyn Backend> = Arc::new(fake.clone());
        let timeline = MessageTimeline::new(backend.clone());
        let ingestor = StreamIngestor::new(backend, &StreamingConfig::default());
        (fake, timeline, ingestor)
    }

    #[tokio::test]
    async fn test_chunks_accumulate_until_done() {
        let (fake, mut timeline, mut ingestor) = setup();
        fake.script_stream(vec![
            Ok(StreamFrame::chunk("Hel")),
            Ok(StreamFrame::chunk("lo")),
            Ok(StreamFrame::Done),
        ]);

        let reply = ingestor
            .send_streaming_message(&mut timeline, "s1", "hi")
            .await
            .unwrap();

        assert_eq!(reply.content, "Hello");
        assert!(!reply.is_streaming());
        assert!(!ingestor.is_streaming("s1"));

        let messages = timeline.messages("s1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].id, reply.id);
    }

    #[tokio::test]
    async fn test_request_carries_user_message_id() {
        let (fake, mut timeline, mut ingestor) = setup();
        fake.script_stream(vec![Ok(StreamFrame::Done)]);
        ingestor
            .send_streaming_message(&mut timeline, "s1", "hi")
            .await
            .unwrap();

        let user_id = timeline.messages("s1")[0].id.clone();
        let calls = fake.calls();
        assert!(matches!(
            &calls[0],
            RecordedCall::OpenStream { session_id, request }
                if session_id == "s1" && request.event_id == user_id && request.message == "hi"
        ));
    }

    #[tokio::test]
    async fn test_error_frame_replaces_partial_content() {
        let (fake, mut timeline, mut ingestor) = setup();
        fake.script_stream(vec![
            Ok(StreamFrame::chunk("partial answer")),
            Ok(StreamFrame::error("model overloaded")),
        ]);

        let reply = ingestor
            .send_streaming_message(&mut timeline, "s1", "hi")
            .await
            .unwrap();

        assert_eq!(reply.content, DEFAULT_FAILURE_MESSAGE);
        assert_eq!(reply.metadata.error.as_deref(), Some("model overloaded"));
        assert!(!reply.is_streaming());
    }

    #[tokio::test]
    async fn test_refused_connection_fails_placeholder() {
        let (fake, mut timeline, mut ingestor) = setup();
        fake.refuse_next_stream("connection refused");

        let reply = ingestor
            .send_streaming_message(&mut timeline, "s1", "hi")
            .await
            .unwrap();

        assert_eq!(reply.content, DEFAULT_FAILURE_MESSAGE);
        assert_eq!(timeline.messages("s1").len(), 2);
        assert!(!ingestor.is_streaming("s1"));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (fake, mut timeline, mut ingestor) = setup();
        fake.script_stream(vec![
            Ok(StreamFrame::chunk("a")),
            Err(SheikhError::Parse("garbage".into())),
            Ok(StreamFrame::Chunk { content: None }),
            Ok(StreamFrame::chunk("b")),
            Ok(StreamFrame::Done),
        ]);

        let reply = ingestor
            .send_streaming_message(&mut timeline, "s1", "hi")
            .await
            .unwrap();
        assert_eq!(reply.content, "ab");
    }

    #[tokio::test]
    async fn test_second_begin_rejected_without_side_effects() {
        let (fake, mut timeline, mut ingestor) = setup();
        let _tx = fake.live_stream();
        let _consumer = ingestor.begin(&mut timeline, "s1", "one").await.unwrap();

        let err = ingestor
            .begin(&mut timeline, "s1", "two")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SheikhError>(),
            Some(SheikhError::StreamInProgress(_))
        ));
        assert_eq!(timeline.messages("s1").len(), 2);
    }

    #[tokio::test]
    async fn test_user_message_precedes_placeholder_before_open() {
        let (fake, mut timeline, mut ingestor) = setup();
        let tx = fake.live_stream();
        let mut consumer = ingestor.begin(&mut timeline, "s1", "hi").await.unwrap();

        let messages = timeline.messages("s1");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].is_streaming());
        assert_eq!(messages[1].content, "");

        tx.send(Ok(StreamFrame::chunk("x"))).unwrap();
        let event = consumer.next_event().await.unwrap();
        assert_eq!(
            ingestor.apply(&mut timeline, &mut consumer, event),
            StreamProgress::Appended
        );
        assert_eq!(timeline.messages("s1")[1].content, "x");
    }

    #[tokio::test]
    async fn test_dropped_connection_is_failure() {
        let (fake, mut timeline, mut ingestor) = setup();
        let tx = fake.live_stream();
        let mut consumer = ingestor.begin(&mut timeline, "s1", "hi").await.unwrap();
        tx.send(Ok(StreamFrame::chunk("half"))).unwrap();
        drop(tx);

        let progress = ingestor.drive(&mut timeline, &mut consumer).await;
        assert_eq!(progress, StreamProgress::Failed);
        assert_eq!(timeline.messages("s1")[1].content, DEFAULT_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_cancel_keeps_accumulated_text() {
        let (fake, mut timeline, mut ingestor) = setup();
        let tx = fake.live_stream();
        let mut consumer = ingestor.begin(&mut timeline, "s1", "hi").await.unwrap();
        tx.send(Ok(StreamFrame::chunk("so far"))).unwrap();

        let event = consumer.next_event().await.unwrap();
        ingestor.apply(&mut timeline, &mut consumer, event);
        assert!(ingestor.cancel("s1"));

        let progress = ingestor.drive(&mut timeline, &mut consumer).await;
        assert_eq!(progress, StreamProgress::Cancelled);
        let reply = &timeline.messages("s1")[1];
        assert_eq!(reply.content, "so far");
        assert!(!reply.is_streaming());
        assert!(!ingestor.cancel("s1"));
    }

    #[tokio::test]
    async fn test_abort_makes_consumer_stale() {
        let (fake, mut timeline, mut ingestor) = setup();
        let tx = fake.live_stream();
        let mut consumer = ingestor.begin(&mut timeline, "s1", "hi").await.unwrap();

        assert!(ingestor.abort(&mut timeline, "s1"));
        assert!(!ingestor.is_streaming("s1"));
        assert!(timeline.streaming_message("s1").is_none());

        let _ = tx.send(Ok(StreamFrame::chunk("late")));
        while let Some(event) = consumer.next_event().await {
            assert_eq!(
                ingestor.apply(&mut timeline, &mut consumer, event),
                StreamProgress::Ignored
            );
        }
        assert_eq!(timeline.messages("s1")[1].content, "");
    }

    #[tokio::test]
    async fn test_dropped_consumer_frees_session() {
        let (fake, mut timeline, mut ingestor) = setup();
        let tx = fake.live_stream();
        let mut consumer = ingestor.begin(&mut timeline, "s1", "hi").await.unwrap();
        tx.send(Ok(StreamFrame::chunk("partial"))).unwrap();
        let event = consumer.next_event().await.unwrap();
        ingestor.apply(&mut timeline, &mut consumer, event);

        drop(consumer);
        assert!(!ingestor.is_streaming("s1"));
        assert!(ingestor.is_released("s1"));
        assert!(!ingestor.cancel("s1"));

        fake.script_stream(vec![Ok(StreamFrame::chunk("again")), Ok(StreamFrame::Done)]);
        let reply = ingestor
            .send_streaming_message(&mut timeline, "s1", "retry")
            .await
            .unwrap();
        assert_eq!(reply.content, "again");

        let messages = timeline.messages("s1");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "partial");
        assert!(!messages[1].is_streaming());
        assert!(!ingestor.is_released("s1"));
    }

    #[tokio::test]
    async fn test_reap_released_only_touches_dropped_consumers() {
        let (fake, mut timeline, mut ingestor) = setup();
        let _tx_a = fake.live_stream();
        let _tx_b = fake.live_stream();
        let dropped = ingestor.begin(&mut timeline, "a", "one").await.unwrap();
        let _kept = ingestor.begin(&mut timeline, "b", "two").await.unwrap();
        drop(dropped);

        assert_eq!(ingestor.reap_released(&mut timeline), vec!["a".to_string()]);
        assert!(timeline.streaming_message("a").is_none());
        assert!(ingestor.is_streaming("b"));
        assert!(timeline.streaming_message("b").is_some());
    }

    #[tokio::test]
    async fn test_independent_sessions_stream_concurrently() {
        let (fake, mut timeline, mut ingestor) = setup();
        let tx_a = fake.live_stream();
        let tx_b = fake.live_stream();
        let mut a = ingestor.begin(&mut timeline, "a", "to a").await.unwrap();
        let mut b = ingestor.begin(&mut timeline, "b", "to b").await.unwrap();

        tx_b.send(Ok(StreamFrame::chunk("B1"))).unwrap();
        tx_a.send(Ok(StreamFrame::chunk("A1"))).unwrap();
        tx_b.send(Ok(StreamFrame::Done)).unwrap();
        tx_a.send(Ok(StreamFrame::chunk("A2"))).unwrap();
        tx_a.send(Ok(StreamFrame::Done)).unwrap();

        assert_eq!(
            ingestor.drive(&mut timeline, &mut b).await,
            StreamProgress::Completed
        );
        assert!(ingestor.is_streaming("a"));
        assert_eq!(
            ingestor.drive(&mut timeline, &mut a).await,
            StreamProgress::Completed
        );
        assert_eq!(timeline.messages("a")[1].content, "A1A2");
        assert_eq!(timeline.messages("b")[1].content, "B1");
    }
}
