//! Server-sent-event decoding for streaming endpoints.
//!
//! A single framing core feeds both consumption modes: [`EventStream`] yields
//! parsed JSON chunks (the canonical mode) and [`RawEventStream`] yields the
//! joined `data:` payload strings. The `[DONE]` sentinel ends the stream in
//! both modes without emitting a further item.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::{stream, StreamExt};

use crate::errors::{Error, ErrorContext, Result};

/// Payload that terminates a stream without being emitted.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `"message"` when the server sent none.
    pub event: String,
    /// Joined `data:` payload (multiple lines joined with `\n`).
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

#[derive(Default)]
struct EventAccumulator {
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl EventAccumulator {
    fn feed(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.trim().parse().ok(),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data_lines.is_empty() && self.id.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self
                .event
                .take()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data_lines).join("\n"),
            id: self.id.take(),
            retry: self.retry.take(),
        };
        Some(event)
    }
}

struct DecodeState {
    body: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buffer: String,
    acc: EventAccumulator,
    pending: VecDeque<SseEvent>,
    done: bool,
}

/// Consume complete lines from `buffer`, dispatching frames on blank lines.
/// Returns true once the `[DONE]` sentinel was seen.
fn drain_lines(
    buffer: &mut String,
    acc: &mut EventAccumulator,
    pending: &mut VecDeque<SseEvent>,
) -> bool {
    while let Some(idx) = buffer.find('\n') {
        let mut line: String = buffer.drain(..=idx).collect();
        line.pop();
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if let Some(event) = acc.dispatch() {
                if event.data == DONE_SENTINEL {
                    return true;
                }
                pending.push_back(event);
            }
        } else {
            acc.feed(line);
        }
    }
    false
}

/// Dispatch whatever is buffered once the body ends without a final blank line.
fn flush(
    buffer: &mut String,
    acc: &mut EventAccumulator,
    pending: &mut VecDeque<SseEvent>,
) -> bool {
    let rest = std::mem::take(buffer);
    let rest = rest.trim_end_matches('\r');
    if !rest.is_empty() {
        acc.feed(rest);
    }
    if let Some(event) = acc.dispatch() {
        if event.data == DONE_SENTINEL {
            return true;
        }
        pending.push_back(event);
    }
    false
}

fn frames(response: reqwest::Response) -> impl Stream<Item = Result<SseEvent>> + Send {
    let state = DecodeState {
        body: Box::pin(response.bytes_stream()),
        buffer: String::new(),
        acc: EventAccumulator::default(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    if drain_lines(&mut state.buffer, &mut state.acc, &mut state.pending) {
                        state.done = true;
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    let mut context = ErrorContext::new();
                    if err.is_timeout() {
                        context.insert("reason", "deadline");
                    }
                    return Some((
                        Err(Error::connection(
                            format!("stream interrupted: {err}"),
                            context,
                            Some(err),
                        )),
                        state,
                    ));
                }
                None => {
                    state.done = true;
                    if flush(&mut state.buffer, &mut state.acc, &mut state.pending) {
                        state.pending.clear();
                    }
                }
            }
        }
    })
}

/// Lazy sequence of parsed JSON chunks from a `text/event-stream` body.
///
/// Dropping the stream drops the underlying response body, which closes the
/// connection without reading further bytes. Single consumer.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>,
}

impl EventStream {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        Self {
            inner: Box::pin(frames(response)),
        }
    }

    /// Adapter for consumers that want the payload text instead of JSON.
    pub fn into_raw(self) -> RawEventStream {
        RawEventStream { inner: self.inner }
    }
}

impl Stream for EventStream {
    type Item = Result<serde_json::Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(
                serde_json::from_str(&event.data).map_err(|e| {
                    Error::decode("SSE payload was not valid JSON", &event.data, Some(e))
                }),
            )),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Stream of joined `data:` payload strings, one per event.
pub struct RawEventStream {
    inner: Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>,
}

impl Stream for RawEventStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(Ok(event.data))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
