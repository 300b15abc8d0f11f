use crate::constants::{MAX_DATA_LINE_BYTES, MAX_STREAM_LINES};
use crate::str_utils::first_n_chars_lossy;
use serde_json::Value;

/// One structured event decoded from a provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental reasoning/thinking text.
    Reasoning(String),
    /// Incremental answer text.
    Content(String),
    /// Stream end: `data: [DONE]` or transport EOF.
    Done,
    /// Provider-reported error object on a data line.
    Upstream(String),
}

/// Incremental SSE decoder.
///
/// Fed raw byte chunks as they arrive off the wire; yields decoded events.
/// A chunk boundary can fall mid-line or mid-UTF-8-sequence, so bytes are
/// buffered until a full line is available. Malformed `data:` payloads are
/// dropped, never fatal.
pub struct SseParser {
    buf: Vec<u8>,
    line_count: usize,
    finished: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            line_count: 0,
            finished: false,
        }
    }

    /// Feed one chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buf.extend_from_slice(chunk);

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]);
            self.handle_line(line.trim_end_matches('\r'), &mut events);
            if self.finished {
                break;
            }
        }
        events
    }

    /// Signal that the transport is done. Flushes a buffered trailing line
    /// and guarantees a final `Done`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest);
            self.handle_line(line.trim_end_matches('\r'), &mut events);
        }
        if !self.finished {
            self.finished = true;
            events.push(StreamEvent::Done);
        }
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        self.line_count += 1;
        if self.line_count > MAX_STREAM_LINES {
            tracing::error!("Stream exceeded max line limit ({})", MAX_STREAM_LINES);
            events.push(StreamEvent::Upstream(
                "stream exceeded max line limit".to_string(),
            ));
            self.finished = true;
            events.push(StreamEvent::Done);
            return;
        }

        let data = match line.strip_prefix("data: ") {
            Some(d) => d,
            // Blank keep-alives, `event:`/`id:` fields and comments carry no payload.
            None => return,
        };

        if data == "[DONE]" {
            tracing::debug!("Stream end marker [DONE] received");
            self.finished = true;
            events.push(StreamEvent::Done);
            return;
        }

        if data.len() > MAX_DATA_LINE_BYTES {
            tracing::warn!("Dropping oversized data line: {} bytes", data.len());
            return;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => {
                // Truncated/partial JSON fragments are expected mid-stream.
                tracing::debug!("Skipping unparseable data line: {}", first_n_chars_lossy(data, 200));
                return;
            }
        };

        if let Some(message) = extract_upstream_error(&value) {
            events.push(StreamEvent::Upstream(message));
            return;
        }

        if let Some(reasoning) = extract_reasoning_delta(&value) {
            events.push(StreamEvent::Reasoning(reasoning));
        }
        if let Some(content) = extract_content_delta(&value) {
            events.push(StreamEvent::Content(content));
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// --- FIELD EXTRACTION CHAINS ---
///
/// Providers nest deltas differently. Each chain is an ordered list of
/// paths tried in sequence; the first non-empty string wins. Kept as data
/// so the fallback order stays auditable in one place.

const REASONING_DELTA_PATHS: &[&[&str]] = &[
    &["choices", "0", "delta", "reasoning"],
    &["choices", "0", "delta", "reasoning_content"],
    &["choices", "0", "delta", "thinking"],
    &["reasoning"],
    &["thinking"],
];

const CONTENT_DELTA_PATHS: &[&[&str]] = &[
    &["choices", "0", "delta", "content"],
    &["delta", "content"],
    &["content"],
    &["text"],
];

/// Non-streaming responses put the answer under `message` instead of `delta`.
const MESSAGE_CONTENT_PATHS: &[&[&str]] = &[
    &["choices", "0", "message", "content"],
    &["message", "content"],
    &["content"],
    &["text"],
];

const MESSAGE_REASONING_PATHS: &[&[&str]] = &[
    &["choices", "0", "message", "reasoning"],
    &["choices", "0", "message", "reasoning_content"],
    &["message", "reasoning"],
];

pub fn extract_reasoning_delta(value: &Value) -> Option<String> {
    first_string_at(value, REASONING_DELTA_PATHS)
}

pub fn extract_content_delta(value: &Value) -> Option<String> {
    first_string_at(value, CONTENT_DELTA_PATHS)
}

pub fn extract_message_content(value: &Value) -> Option<String> {
    first_string_at(value, MESSAGE_CONTENT_PATHS)
}

pub fn extract_message_reasoning(value: &Value) -> Option<String> {
    first_string_at(value, MESSAGE_REASONING_PATHS)
}

pub fn extract_upstream_error(value: &Value) -> Option<String> {
    let err = value.get("error")?;
    let message = err
        .get("message")
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| err.to_string());
    Some(message)
}

fn first_string_at(value: &Value, paths: &[&[&str]]) -> Option<String> {
    for path in paths {
        if let Some(s) = string_at(value, path) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cursor = value;
    for segment in path {
        cursor = match segment.parse::<usize>() {
            Ok(index) => cursor.get(index)?,
            Err(_) => cursor.get(segment)?,
        };
    }
    cursor.as_str()
}
