//! Server-sent events decoding
//!
//! [`sse_events`] turns the raw body of a `text/event-stream` response into
//! a lazy stream of [`SseEvent`]s. Nothing is spawned: bytes are pulled from
//! the connection only when the consumer asks for the next event, so frames
//! are observed strictly in arrival order.
//!
//! Field processing:
//!
//! - `data:` -- appended to the event payload; multiple lines are joined
//!   with `\n`.
//! - `event:` -- the event name (`message`, `done`, `error`, `ping`, ...).
//! - `id:` -- kept on the event for diagnostics.
//! - `retry:` and `:` comment lines -- ignored.
//!
//! An event block larger than [`MAX_EVENT_BYTES`] ends the stream with a
//! transport error.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::SheikhError;

/// Largest event block buffered while waiting for its terminating blank line
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
    /// Value of the `id:` field, if any
    pub id: Option<String>,
}

struct SseState<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a blank line
    scanned: usize,
    ready: VecDeque<Result<SseEvent, SheikhError>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Move every complete event block out of `buffer` into `ready`
    fn drain_complete_blocks(&mut self) {
        loop {
            // Step back one byte so a "\n\n" split across chunks is found
            let start = self.scanned.saturating_sub(1);
            let Some(offset) = find_blank_line(&self.buffer[start..]) else {
                self.scanned = self.buffer.len();
                break;
            };
            let pos = start + offset;
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            self.scanned = 0;
            if let Some(event) = parse_event_block(&String::from_utf8_lossy(&block[..pos])) {
                self.ready.push_back(Ok(event));
            }
        }

        if self.buffer.len() > MAX_EVENT_BYTES {
            tracing::warn!(
                "SSE event exceeds {} bytes without a terminating blank line",
                MAX_EVENT_BYTES
            );
            self.fail(format!(
                "event exceeds {} bytes without a terminating blank line",
                MAX_EVENT_BYTES
            ));
        }
    }

    /// End the stream after the events already decoded
    fn fail(&mut self, reason: String) {
        self.finished = true;
        self.buffer.clear();
        self.scanned = 0;
        self.ready.push_back(Err(SheikhError::StreamTransport(reason)));
    }

    /// Dispatch a trailing block left when the body ends without a blank line
    fn flush_remaining(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let block = std::mem::take(&mut self.buffer);
        if let Some(event) = parse_event_block(&String::from_utf8_lossy(&block)) {
            self.ready.push_back(Ok(event));
        }
    }
}

/// Decode an SSE body into events
///
/// A body error ends the stream with a single
/// [`SheikhError::StreamTransport`] item. Chunk boundaries may fall anywhere,
/// including inside a multi-byte UTF-8 sequence; bytes are buffered until a
/// full event block is available.
///
/// # Arguments
///
/// * `body` - The raw HTTP response body as a stream of byte chunks
pub fn sse_events<S, E>(body: S) -> impl Stream<Item = Result<SseEvent, SheikhError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        buffer: Vec::new(),
        scanned: 0,
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state
                        .buffer
                        .extend(chunk.iter().copied().filter(|b| *b != b'\r'));
                    state.drain_complete_blocks();
                }
                Some(Err(e)) => {
                    state.fail(format!("connection error while reading stream: {}", e));
                }
                None => {
                    state.finished = true;
                    state.flush_remaining();
                }
            }
        }
    })
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Parse a single event block (the text between two blank lines)
///
/// Returns `None` for blocks that carry neither data nor an event name
/// (comments, bare `retry:` lines).
fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = None;
    let mut id = None;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.trim().to_string()),
            "id" => id = Some(value.trim().to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&'static [u8]>) -> Vec<Result<SseEvent, SheikhError>> {
        let body = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<Bytes, std::io::Error>(Bytes::from_static(c))),
        );
        sse_events(body).collect().await
    }

    #[tokio::test]
    async fn test_single_event_with_name() {
        let events = collect(vec![&b"event: message\ndata: {\"content\":\"Hi\"}\n\n"[..]]).await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.event.as_deref(), Some("message"));
        assert_eq!(event.data, r#"{"content":"Hi"}"#);
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let events = collect(vec![
            &b"event: mess"[..],
            &b"age\ndata: {\"content\":"[..],
            &b"\"a\"}\n"[..],
            &b"\nevent: done\ndata: {}\n\n"[..],
        ])
        .await;
        let events: Vec<SseEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, r#"{"content":"a"}"#);
        assert_eq!(events[1].event.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_utf8_sequence_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let events = collect(vec![&b"data: caf\xC3"[..], &b"\xA9\n\n"[..]]).await;
        assert_eq!(events[0].as_ref().unwrap().data, "café");
    }

    #[tokio::test]
    async fn test_crlf_and_multiline_data() {
        let events = collect(vec![&b"id: 7\r\ndata: line one\r\ndata: line two\r\n\r\n"[..]]).await;
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.data, "line one\nline two");
        assert_eq!(event.id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_comments_and_retry_are_skipped() {
        let events = collect(vec![&b": keep-alive\n\nretry: 1000\n\ndata: real\n\n"[..]]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "real");
    }

    #[tokio::test]
    async fn test_trailing_block_without_blank_line_is_flushed() {
        let events = collect(vec![&b"data: first\n\nevent: done\ndata: {}"[..]]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].as_ref().unwrap().event.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_blank_line_split_across_many_chunks() {
        let events = collect(vec![
            &b"data: one"[..],
            &b"\n"[..],
            &b"\n"[..],
            &b"data: two\n"[..],
            &b"\n"[..],
        ]).await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_oversized_event_ends_stream() {
        let mut chunks: Vec<std::result::Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"data: small\n\n"))];
        let mut huge = b"data: ".to_vec();
        huge.extend(std::iter::repeat(b'x').take(MAX_EVENT_BYTES));
        chunks.push(Ok(Bytes::from(huge)));
        chunks.push(Ok(Bytes::from_static(b"\n\ndata: never\n\n")));

        let events: Vec<_> = sse_events(futures::stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().data, "small");
        assert!(matches!(
            &events[1],
            Err(SheikhError::StreamTransport(msg)) if msg.contains("exceeds")
        ));
    }

    #[tokio::test]
    async fn test_body_error_yields_transport_error_and_ends() {
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: ok\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"data: never\n\n")),
        ]);
        let events: Vec<_> = sse_events(body).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().data, "ok");
        assert!(matches!(events[1], Err(SheikhError::StreamTransport(_))));
    }
}
