//! Relays a provider's streaming completion to the caller as SSE frames.
//!
//! Provider bytes arrive in arbitrary TCP-sized pieces, so lines are buffered
//! until complete. Each `data:` payload is parsed into a [`ProviderFrame`];
//! fragments that fail to parse are skipped. The caller always sees
//! `data: {"content": ...}` frames followed by a single `data: [DONE]`.

use std::mem;

use async_stream::stream;
use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{Instrument, Span};

use crate::services::llm::ByteStream;

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    Done,
}

/// Splits a byte stream into SSE lines, keeping a trailing partial line
/// until the rest of it arrives. Lines are decoded only once complete, so a
/// character split across network chunks is reassembled first.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            lines.extend(parse_line(&String::from_utf8_lossy(&line)));
        }
        lines
    }

    /// Parses whatever is left once the upstream has ended.
    pub fn flush(&mut self) -> Vec<SseLine> {
        let remaining = mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&remaining)).into_iter().collect()
    }
}

// Non-data fields (event:, id:, retry:, comments) are ignored.
fn parse_line(line: &str) -> Option<SseLine> {
    let data = line.trim().strip_prefix("data:")?.trim();
    match data {
        "" => None,
        DONE_SENTINEL => Some(SseLine::Done),
        payload => Some(SseLine::Data(payload.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One `data:` payload from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFrame {
    Delta(String),
    /// Well-formed but carries no text (role headers, finish reasons).
    Empty,
    Unparsable,
}

impl ProviderFrame {
    pub fn parse(payload: &str) -> Self {
        let Ok(chunk) = serde_json::from_str::<CompletionChunk>(payload) else {
            return Self::Unparsable;
        };

        match chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
        {
            Some(content) if !content.is_empty() => Self::Delta(content),
            _ => Self::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
}

impl StreamEvent {
    /// Text placed after `data: ` in the outgoing frame.
    pub fn payload(&self) -> String {
        match self {
            Self::Content(content) => json!({ "content": content }).to_string(),
            Self::Done => DONE_SENTINEL.to_string(),
        }
    }

    pub fn into_event(self) -> Event {
        Event::default().data(self.payload())
    }
}

/// Turns the provider body into caller events. A provider `[DONE]` or a clean
/// end of body yields exactly one [`StreamEvent::Done`]. A read error ends the
/// relay without it, since the answer is incomplete.
///
/// The body is polled after the handler has returned, so reads and events
/// run inside `span` to stay attributed to the request.
///
/// Dropping the returned stream drops the upstream body, so a disconnected
/// client stops the provider read.
pub fn relay(upstream: ByteStream, span: Span) -> impl Stream<Item = StreamEvent> + Send {
    stream! {
        let mut upstream = upstream;
        let mut lines = SseLineBuffer::new();
        let mut interrupted = false;

        loop {
            let (batch, mut finished) = match upstream.next().instrument(span.clone()).await {
                Some(Ok(bytes)) => (lines.feed(&bytes), false),
                Some(Err(e)) => {
                    span.in_scope(|| tracing::warn!(error = %e, "completion stream interrupted"));
                    interrupted = true;
                    (Vec::new(), true)
                }
                None => (lines.flush(), true),
            };

            for line in batch {
                match line {
                    SseLine::Done => {
                        finished = true;
                        break;
                    }
                    SseLine::Data(payload) => match ProviderFrame::parse(&payload) {
                        ProviderFrame::Delta(content) => {
                            yield StreamEvent::Content(content);
                        }
                        ProviderFrame::Empty => {}
                        ProviderFrame::Unparsable => span.in_scope(|| {
                            tracing::debug!(payload = %payload, "skipping unparsable completion fragment")
                        }),
                    },
                }
            }

            if finished {
                break;
            }
        }

        if !interrupted {
            yield StreamEvent::Done;
        }
    }
}
