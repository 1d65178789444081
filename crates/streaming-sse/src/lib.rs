//! # Server-Sent Events (SSE) frame decoding
//!
//! This module provides:
//! - `SseFrame`: one `data:` line paired with the event type active when it arrived
//! - `SseDecoder`: incremental, chunk-boundary safe line decoder
//! - `FrameNormalizer`: seam that turns a parsed frame payload into a canonical event
//! - `frames_to_events`: byte stream → canonical event stream pipeline

use crate::insight_types::StreamEvent;
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;

/// A single `data:` line and the SSE fields in effect when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event type from the most recent `event:` line of the current record.
    pub event: Option<String>,
    /// Payload of the `data:` line.
    pub data: Bytes,
    /// Last `id:` seen on the stream, if any.
    pub id: Option<String>,
}

impl SseFrame {
    /// Create a frame with just data
    pub fn data(data: impl Into<Bytes>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
        }
    }

    /// Set the event type
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }
}

/// Incremental SSE decoder.
///
/// Unlike a record-oriented decoder, every `data:` line is emitted as soon as
/// the line is complete. `event:` sets the type for subsequent data lines
/// until a blank line ends the record.
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line
    buffer: Vec<u8>,
    current_event: Option<String>,
    last_event_id: Option<String>,
    retry_ms: Option<u64>,
    /// A `\r` ended the previous chunk; a leading `\n` belongs to it
    pending_cr: bool,
    frames: VecDeque<SseFrame>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            current_event: None,
            last_event_id: None,
            retry_ms: None,
            pending_cr: false,
            frames: VecDeque::new(),
        }
    }

    /// Push a chunk and drain the frames completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> impl Iterator<Item = SseFrame> + '_ {
        let mut rest = chunk;
        if self.pending_cr {
            self.pending_cr = false;
            if let Some((b'\n', tail)) = rest.split_first() {
                rest = tail;
            }
        }
        while let Some(pos) = rest.iter().position(|b| *b == b'\n' || *b == b'\r') {
            self.buffer.extend_from_slice(&rest[..pos]);
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line);
            if rest[pos] == b'\r' {
                match rest.get(pos + 1) {
                    Some(b'\n') => rest = &rest[pos + 2..],
                    Some(_) => rest = &rest[pos + 1..],
                    None => {
                        self.pending_cr = true;
                        rest = &[];
                    }
                }
            } else {
                rest = &rest[pos + 1..];
            }
        }
        self.buffer.extend_from_slice(rest);
        self.frames.drain(..)
    }

    /// Flush a final line that was not newline-terminated. Call once at EOF.
    pub fn finish(&mut self) -> impl Iterator<Item = SseFrame> + '_ {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line);
        }
        self.current_event = None;
        self.pending_cr = false;
        self.frames.drain(..)
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Last `id:` value seen, for reconnect-aware callers.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnection delay advertised through `retry:`.
    pub fn retry_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    fn process_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        if line.is_empty() {
            self.current_event = None;
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.find(':') {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (&*line, ""),
        };
        match field {
            "event" => {
                let name = value.trim();
                self.current_event = (!name.is_empty()).then(|| name.to_string());
            }
            "data" => self.frames.push_back(SseFrame {
                event: self.current_event.clone(),
                data: Bytes::copy_from_slice(value.as_bytes()),
                id: self.last_event_id.clone(),
            }),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.retry_ms = Some(ms);
                }
            }
            _ => {}
        }
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns one parsed frame payload into at most one canonical event.
///
/// Returning `None` drops the frame; it is never an error.
pub trait FrameNormalizer {
    fn normalize(&mut self, event: Option<&str>, payload: &Value) -> Option<StreamEvent>;
}

pub mod pipeline;
pub use pipeline::{frames_to_events, parse_frame};

#[cfg(test)]
#[path = "../tests/decoder_tests.rs"]
mod decoder_tests;

#[cfg(test)]
#[path = "../tests/pipeline_tests.rs"]
mod pipeline_tests;
