// ABOUTME: Line-buffering SSE parser for streaming chat completion responses
// ABOUTME: Handles partial lines across TCP boundaries and multiple events per chunk
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # SSE Stream Parser
//!
//! A line-buffering parser for Server-Sent Events (SSE) used by generation
//! backends. Solves two correctness issues:
//!
//! 1. **Multiple events per TCP chunk**: When network buffers batch several SSE
//!    events into a single `bytes_stream()` chunk, all events are emitted.
//!
//! 2. **Partial JSON across TCP boundaries**: When a JSON payload is split
//!    across two TCP chunks, the line buffer accumulates partial data until a
//!    complete line arrives.
//!
//! The backend supplies a `parse_data` closure that converts raw JSON strings
//! into `StreamChunk` values. The SSE framing (line buffering, `data:` prefix
//! stripping, `[DONE]` detection) is handled once here.

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{future, Stream, StreamExt};

use super::{ChatStream, StreamChunk};
use crate::errors::AppError;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the JSON string (prefix stripped)
    Data(String),
    /// The `[DONE]` termination signal (OpenAI convention)
    Done,
}

/// Line-buffering SSE parser that handles partial lines across TCP chunk boundaries
///
/// SSE streams are newline-delimited. TCP does not guarantee alignment between
/// network chunks and SSE event boundaries. This parser buffers incomplete lines
/// and emits complete events only when a full line (terminated by `\n`) is available.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    /// Accumulated bytes not yet terminated by a newline
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed raw bytes from a TCP chunk into the buffer, returning any complete SSE events
    ///
    /// Bytes are appended to the internal buffer. Complete lines (terminated by `\n`)
    /// are extracted, parsed as SSE events, and returned. Any trailing partial line
    /// remains in the buffer for the next `feed()` call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(bytes);
        self.buffer.push_str(&text);

        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim_end_matches('\r').to_owned();
            self.buffer = self.buffer[newline_pos + 1..].to_owned();

            let trimmed = line.trim();

            // Empty lines are SSE event separators
            if trimmed.is_empty() {
                continue;
            }

            if trimmed == "data: [DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            if let Some(data) = trimmed.strip_prefix("data: ") {
                if !data.trim().is_empty() {
                    events.push(SseEvent::Data(data.to_owned()));
                }
            }
            // Ignore non-data SSE fields (event:, id:, retry:, comments starting with :)
        }

        events
    }

    /// Flush any remaining buffered content as a final event
    ///
    /// Called when the byte stream ends. If there is a partial line in the buffer
    /// (no trailing newline), attempt to parse it as an SSE event.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        let trimmed = remaining.trim();

        if trimmed.is_empty() {
            return Vec::new();
        }

        if trimmed == "data: [DONE]" {
            return vec![SseEvent::Done];
        }

        if let Some(data) = trimmed.strip_prefix("data: ") {
            if !data.trim().is_empty() {
                return vec![SseEvent::Data(data.to_owned())];
            }
        }

        Vec::new()
    }
}

/// Create a properly-buffered SSE stream from a raw byte stream
///
/// Wraps a `reqwest` byte stream with SSE line buffering. The `parse_data`
/// closure converts backend-specific JSON strings into `StreamChunk` values.
/// Returning `None` from `parse_data` skips events that produce no output
/// (empty deltas, metadata-only chunks).
pub fn create_sse_stream<S, F>(
    byte_stream: S,
    parse_data: F,
    provider_name: &'static str,
) -> ChatStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        stream_ended: false,
    };

    // unfold keeps the parser state alive across async iterations. Each
    // iteration either drains a pending event or reads the next TCP chunk.
    let stream = unfold(
        (
            Box::pin(byte_stream)
                as Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
            state,
            parse_data,
            provider_name,
        ),
        |(mut byte_stream, mut state, parse_data, provider_name)| async move {
            loop {
                // Drain pending events first (multiple SSE events per TCP chunk)
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, (byte_stream, state, parse_data, provider_name)));
                }

                if state.stream_ended {
                    return None;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        for event in state.parser.feed(&bytes) {
                            push_event(&mut state.pending, event, &parse_data);
                        }
                        // Loop to drain pending events
                    }
                    Some(Err(e)) => {
                        state.stream_ended = true;
                        return Some((
                            Err(AppError::external_service(
                                provider_name,
                                format!("Stream read error: {e}"),
                            )),
                            (byte_stream, state, parse_data, provider_name),
                        ));
                    }
                    None => {
                        // Byte stream ended, flush remaining buffer
                        state.stream_ended = true;
                        for event in state.parser.flush() {
                            push_event(&mut state.pending, event, &parse_data);
                        }
                        if let Some(item) = state.pending.pop_front() {
                            return Some((item, (byte_stream, state, parse_data, provider_name)));
                        }
                        return None;
                    }
                }
            }
        },
    );

    // Filter out empty deltas (unless it's the final chunk)
    let filtered = stream.filter(|result| {
        future::ready(
            result
                .as_ref()
                .map_or(true, |chunk| !chunk.delta.is_empty() || chunk.is_final),
        )
    });

    Box::pin(filtered)
}

fn push_event<F>(
    pending: &mut VecDeque<Result<StreamChunk, AppError>>,
    event: SseEvent,
    parse_data: &F,
) where
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>>,
{
    match event {
        SseEvent::Data(json_str) => {
            if let Some(result) = parse_data(&json_str) {
                pending.push_back(result);
            }
        }
        SseEvent::Done => {
            pending.push_back(Ok(StreamChunk {
                delta: String::new(),
                is_final: true,
                finish_reason: Some("stop".to_owned()),
            }));
        }
    }
}

/// Internal state for the SSE stream unfold
struct SseStreamState {
    parser: SseLineBuffer,
    pending: VecDeque<Result<StreamChunk, AppError>>,
    stream_ended: bool,
}
