//! In-process fake backend for unit and integration tests
//!
//! [`FakeBackend`] keeps sessions and their event logs in memory and records
//! every call it receives, so tests can assert on both the resulting state
//! and the exact requests the engine issued.
//!
//! Streaming replies are scripted per call:
//!
//! - [`FakeBackend::script_stream`] queues a fixed list of frames (or frame
//!   errors) that is delivered in order and then ends.
//! - [`FakeBackend::live_stream`] queues a channel-backed stream; the test
//!   keeps the sender and pushes frames while the engine is consuming.
//!   Dropping the sender closes the connection.
//! - [`FakeBackend::refuse_next_stream`] makes the next open attempt fail.
//!
//! When nothing is scripted, an open yields a short echo reply followed by
//! `done`.
//!
//! # Example
//!
//! ```
//! use sheikh_chat::api::{Backend, FakeBackend, RecordedCall};
//!
//! # tokio_test::block_on(async {
//! let backend = FakeBackend::new();
//! let id = backend.create_session().await.unwrap();
//! assert_eq!(backend.list_sessions().await.unwrap()[0].session_id, id);
//! assert_eq!(backend.calls()[0], RecordedCall::CreateSession);
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::api::types::{ChatReply, ChatRequest, HistoryEvent, SessionDetail, SessionSummary};
use crate::api::{Backend, FrameStream};
use crate::error::{Result, SheikhError};
use crate::stream::StreamFrame;

/// Sender half of a live scripted stream
pub type LiveStreamSender = mpsc::UnboundedSender<std::result::Result<StreamFrame, SheikhError>>;

/// A request observed by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    CreateSession,
    ListSessions,
    GetSession(String),
    DeleteSession(String),
    StopSession(String),
    RenameSession { session_id: String, title: String },
    Chat { session_id: String, request: ChatRequest },
    OpenStream { session_id: String, request: ChatRequest },
}

enum ScriptedStream {
    Frames(Vec<std::result::Result<StreamFrame, SheikhError>>),
    Live(mpsc::UnboundedReceiver<std::result::Result<StreamFrame, SheikhError>>),
    Refused(String),
}

#[derive(Default)]
struct FakeState {
    /// Newest first, like the real list endpoint
    sessions: Vec<SessionSummary>,
    histories: HashMap<String, Vec<HistoryEvent>>,
    streams: VecDeque<ScriptedStream>,
    replies: VecDeque<String>,
    fail_next: Option<SheikhError>,
    calls: Vec<RecordedCall>,
    next_id: u64,
}

/// In-memory [`Backend`] for tests
///
/// Cloning yields another handle onto the same state.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl std::fmt::Debug for FakeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeBackend")
            .field("sessions", &state.sessions.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

fn not_found() -> anyhow::Error {
    SheikhError::Server {
        code: 404,
        message: "Session not found".to_string(),
    }
    .into()
}

impl FakeBackend {
    /// Create an empty fake
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a call and consume a pending injected failure, if any
    fn enter(&self, call: RecordedCall) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.fail_next.take() {
            Some(err) => Err(err.into()),
            None => Ok(state),
        }
    }

    /// Seed a session; it becomes the head of the list
    pub fn add_session(&self, summary: SessionSummary) {
        let mut state = self.lock();
        state.histories.entry(summary.session_id.clone()).or_default();
        state.sessions.retain(|s| s.session_id != summary.session_id);
        state.sessions.insert(0, summary);
    }

    /// Replace a session's event log
    pub fn set_history(&self, session_id: &str, events: Vec<HistoryEvent>) {
        self.lock().histories.insert(session_id.to_string(), events);
    }

    /// Current server-side summary of a session
    pub fn session(&self, session_id: &str) -> Option<SessionSummary> {
        self.lock()
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    /// Queue a fixed stream for the next open
    pub fn script_stream(&self, frames: Vec<std::result::Result<StreamFrame, SheikhError>>) {
        self.lock().streams.push_back(ScriptedStream::Frames(frames));
    }

    /// Queue a live stream for the next open and return its sender
    pub fn live_stream(&self) -> LiveStreamSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().streams.push_back(ScriptedStream::Live(rx));
        tx
    }

    /// Make the next open fail with a transport error
    pub fn refuse_next_stream(&self, reason: impl Into<String>) {
        self.lock()
            .streams
            .push_back(ScriptedStream::Refused(reason.into()));
    }

    /// Queue the text of the next non-streaming reply
    pub fn script_reply(&self, response: impl Into<String>) {
        self.lock().replies.push_back(response.into());
    }

    /// Fail the next call of any kind with `error`
    pub fn fail_next(&self, error: SheikhError) {
        self.lock().fail_next = Some(error);
    }

    /// Every call received so far, oldest first
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

/// Append a user/assistant exchange to the in-memory log and summary
fn record_exchange(state: &mut FakeState, session_id: &str, request: &ChatRequest, reply: &str) {
    let history = state.histories.entry(session_id.to_string()).or_default();
    history.push(HistoryEvent::new(
        request.event_id.clone(),
        "message_received",
        request.message.clone(),
    ));
    history.push(HistoryEvent::new(
        format!("{}-reply", request.event_id),
        "message_sent",
        reply,
    ));
    if let Some(summary) = state.sessions.iter_mut().find(|s| s.session_id == session_id) {
        summary.latest_message = reply.to_string();
        summary.latest_message_at = Utc::now().timestamp();
    }
}

fn echo_reply(message: &str) -> String {
    format!(
        "I understand you said: '{}'. How can I help you further?",
        message
    )
}

#[async_trait]
impl Backend for FakeBackend {
    async fn create_session(&self) -> Result<String> {
        let mut state = self.enter(RecordedCall::CreateSession)?;
        state.next_id += 1;
        let id = format!("session-{}", state.next_id);
        state.histories.insert(id.clone(), Vec::new());
        state
            .sessions
            .insert(0, SessionSummary::new(id.clone(), "New Conversation"));
        Ok(id)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let state = self.enter(RecordedCall::ListSessions)?;
        Ok(state.sessions.clone())
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionDetail> {
        let state = self.enter(RecordedCall::GetSession(session_id.to_string()))?;
        let summary = state
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .ok_or_else(not_found)?;
        Ok(SessionDetail {
            session_id: session_id.to_string(),
            title: summary.title.clone(),
            events: state.histories.get(session_id).cloned().unwrap_or_default(),
        })
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.enter(RecordedCall::DeleteSession(session_id.to_string()))?;
        let before = state.sessions.len();
        state.sessions.retain(|s| s.session_id != session_id);
        if state.sessions.len() == before {
            return Err(not_found());
        }
        state.histories.remove(session_id);
        Ok(())
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        let mut state = self.enter(RecordedCall::StopSession(session_id.to_string()))?;
        let summary = state
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or_else(not_found)?;
        summary.status = "stopped".to_string();
        Ok(())
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let mut state = self.enter(RecordedCall::RenameSession {
            session_id: session_id.to_string(),
            title: title.to_string(),
        })?;
        let summary = state
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or_else(not_found)?;
        summary.title = title.to_string();
        Ok(())
    }

    async fn chat(&self, session_id: &str, request: &ChatRequest) -> Result<ChatReply> {
        let mut state = self.enter(RecordedCall::Chat {
            session_id: session_id.to_string(),
            request: request.clone(),
        })?;
        if !state.sessions.iter().any(|s| s.session_id == session_id) {
            return Err(not_found());
        }
        let response = state
            .replies
            .pop_front()
            .unwrap_or_else(|| echo_reply(&request.message));
        record_exchange(&mut state, session_id, request, &response);
        Ok(ChatReply {
            response,
            message_id: Some(format!("{}-reply", request.event_id)),
        })
    }

    async fn open_chat_stream(
        &self,
        session_id: &str,
        request: &ChatRequest,
    ) -> Result<FrameStream> {
        let mut state = self.enter(RecordedCall::OpenStream {
            session_id: session_id.to_string(),
            request: request.clone(),
        })?;

        match state.streams.pop_front() {
            Some(ScriptedStream::Frames(frames)) => Ok(Box::pin(futures::stream::iter(frames))),
            Some(ScriptedStream::Live(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(ScriptedStream::Refused(reason)) => {
                Err(SheikhError::StreamTransport(reason).into())
            }
            None => {
                let reply = echo_reply(&request.message);
                record_exchange(&mut state, session_id, request, &reply);
                let frames = vec![Ok(StreamFrame::chunk(reply)), Ok(StreamFrame::Done)];
                Ok(Box::pin(futures::stream::iter(frames)))
            }
        }
    }
}
