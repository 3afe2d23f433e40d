//! Single-owner consumer of a push connection
//!
//! A [`StreamConsumer`] owns the frame stream of one streaming reply and
//! turns it into a finite, ordered sequence of [`StreamEvent`]s. Frames are
//! pulled lazily, one per [`StreamConsumer::next_event`] call, so nothing is
//! buffered or reordered between the wire and the timeline.
//!
//! The sequence ends after the first terminal event: a `done` or `error`
//! frame, a transport failure, an idle timeout or a cancellation. The
//! connection is released at that point, and [`StreamConsumer::close`] may
//! be called any number of times.
//!
//! Dropping a consumer before its terminal event signals the ingestor that
//! started it, which then finalizes the placeholder on its next call.

use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::api::FrameStream;
use crate::error::SheikhError;
use crate::stream::frame::StreamFrame;

/// Something that happened on a push connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A decoded frame
    Frame(StreamFrame),
    /// A frame that could not be decoded; the connection stays open
    Malformed(String),
    /// The connection failed or ended early
    Failed(String),
    /// The consumer was cancelled or closed before the reply finished
    Cancelled,
}

impl StreamEvent {
    /// Whether this event ends the sequence
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Frame(frame) => frame.is_terminal(),
            StreamEvent::Malformed(_) => false,
            StreamEvent::Failed(_) | StreamEvent::Cancelled => true,
        }
    }
}

enum Pulled {
    Item(Result<StreamFrame, SheikhError>),
    Ended,
    TimedOut(Duration),
    Cancelled,
}

/// Owner of one streaming reply's connection
pub struct StreamConsumer {
    session_id: String,
    message_id: String,
    frames: Option<FrameStream>,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
    /// Event to deliver before touching the connection
    pending: Option<StreamEvent>,
    finished: bool,
    /// Cancels the owner's release token when the consumer is dropped
    _release: Option<DropGuard>,
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("open", &self.frames.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}

impl StreamConsumer {
    /// Wrap an open frame stream
    pub(crate) fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        frames: FrameStream,
        cancel: CancellationToken,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            frames: Some(frames),
            cancel,
            idle_timeout,
            pending: None,
            finished: false,
            _release: None,
        }
    }

    /// A consumer whose connection never opened
    ///
    /// Its only event is [`StreamEvent::Failed`] carrying `reason`.
    pub(crate) fn failed(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        cancel: CancellationToken,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            frames: None,
            cancel,
            idle_timeout: None,
            pending: Some(StreamEvent::Failed(reason.into())),
            finished: false,
            _release: None,
        }
    }

    /// Cancel `release` when this consumer is dropped
    pub(crate) fn with_release(mut self, release: CancellationToken) -> Self {
        self._release = Some(release.drop_guard());
        self
    }

    /// Session the reply belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Id of the assistant message being filled
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether the connection is still held
    pub fn is_open(&self) -> bool {
        self.frames.is_some()
    }

    /// Whether the terminal event has been delivered
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Token that cancels this consumer from elsewhere
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Release the connection
    ///
    /// If the reply had not finished, the next event is
    /// [`StreamEvent::Cancelled`]. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.frames.take().is_some() {
            tracing::debug!(
                "Closed stream for session {} (message {})",
                self.session_id,
                self.message_id
            );
            if !self.finished && self.pending.is_none() {
                self.pending = Some(StreamEvent::Cancelled);
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.frames = None;
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the terminal event has been delivered.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.pending.take() {
            if event.is_terminal() {
                self.finish();
            }
            return Some(event);
        }
        if self.finished {
            return None;
        }

        let idle_timeout = self.idle_timeout;
        let frames = self.frames.as_mut()?;

        let pulled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Pulled::Cancelled,
            pulled = pull(frames, idle_timeout) => pulled,
        };

        let event = match pulled {
            Pulled::Item(Ok(frame)) => StreamEvent::Frame(frame),
            Pulled::Item(Err(SheikhError::Parse(reason))) => StreamEvent::Malformed(reason),
            Pulled::Item(Err(e)) => StreamEvent::Failed(e.to_string()),
            Pulled::Ended => {
                StreamEvent::Failed("connection closed before the reply completed".to_string())
            }
            Pulled::TimedOut(after) => StreamEvent::Failed(format!(
                "no frame received for {} seconds",
                after.as_secs()
            )),
            Pulled::Cancelled => StreamEvent::Cancelled,
        };

        if event.is_terminal() {
            self.finish();
        }
        Some(event)
    }
}

async fn pull(frames: &mut FrameStream, idle_timeout: Option<Duration>) -> Pulled {
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
            Ok(next) => next,
            Err(_) => return Pulled::TimedOut(limit),
        },
        None => frames.next().await,
    };
    match next {
        Some(item) => Pulled::Item(item),
        None => Pulled::Ended,
    }
}
