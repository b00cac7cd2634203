//! Incremental `text/event-stream` frame parser.
//!
//! Bytes arrive in arbitrary chunks (a chunk may end inside a line or between the
//! `\r` and `\n` of a CRLF pair). The parser keeps the partial line and the frame
//! under construction between calls to [`FrameParser::feed`].
//!
//! Line rules:
//! - terminators are `\n`, `\r\n` or a lone `\r`
//! - a blank line ends the frame
//! - lines starting with `:` are comments
//! - `field: value` drops one space after the colon; a line without a colon is a
//!   field with an empty value
//! - known fields are `event`, `data`, `id` and `retry`; others are ignored

use std::time::Duration;

use thiserror::Error;

use crate::event::StreamEvent;

/// Upper bound for one line. A webhook body travels on a single `data:` line, so
/// this must exceed the largest delivery the upstream host sends.
pub const DEFAULT_MAX_LINE_LEN: usize = 32 * 1024 * 1024;

/// Why a frame was discarded. The stream itself stays usable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame line is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

#[derive(Debug, Default)]
struct FrameBuf {
    kind: Option<String>,
    data: Vec<u8>,
    has_data: bool,
    id: Option<String>,
    has_fields: bool,
    error: Option<FrameError>,
}

/// Stateful frame parser for one connection.
///
/// Call [`reset`](FrameParser::reset) when the connection is replaced; the last
/// event id survives so the next request can resume from it.
#[derive(Debug)]
pub struct FrameParser {
    line: Vec<u8>,
    after_cr: bool,
    discarding_line: bool,
    frame: FrameBuf,
    last_event_id: Option<String>,
    retry: Option<Duration>,
    max_line_len: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            line: Vec::new(),
            after_cr: false,
            discarding_line: false,
            frame: FrameBuf::default(),
            last_event_id: None,
            retry: None,
            max_line_len,
        }
    }

    /// Feeds one chunk of the response body.
    ///
    /// Returns one entry per frame completed by this chunk, in stream order:
    /// `Ok` for a frame to deliver, `Err` for a frame that was discarded.
    /// Blocks made only of comments produce nothing.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, FrameError>> {
        let mut out = Vec::new();
        let mut rest = chunk;
        while !rest.is_empty() {
            if self.after_cr {
                self.after_cr = false;
                if rest[0] == b'\n' {
                    rest = &rest[1..];
                    continue;
                }
            }
            match rest.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    self.push_line_bytes(&rest[..pos]);
                    self.after_cr = rest[pos] == b'\r';
                    if let Some(result) = self.end_line() {
                        out.push(result);
                    }
                    rest = &rest[pos + 1..];
                }
                None => {
                    self.push_line_bytes(rest);
                    break;
                }
            }
        }
        out
    }

    /// Drops any partial line or frame (the connection ended mid-frame).
    pub fn reset(&mut self) {
        self.line.clear();
        self.after_cr = false;
        self.discarding_line = false;
        self.frame = FrameBuf::default();
    }

    /// Id of the last dispatched frame that carried one; sent as `Last-Event-ID`.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnect delay requested by the server via `retry:`, consumed once.
    pub fn take_retry(&mut self) -> Option<Duration> {
        self.retry.take()
    }

    fn push_line_bytes(&mut self, bytes: &[u8]) {
        if self.discarding_line {
            return;
        }
        if self.line.len() + bytes.len() > self.max_line_len {
            self.line.clear();
            self.discarding_line = true;
            self.frame.error.get_or_insert(FrameError::LineTooLong {
                limit: self.max_line_len,
            });
            return;
        }
        self.line.extend_from_slice(bytes);
    }

    fn end_line(&mut self) -> Option<Result<StreamEvent, FrameError>> {
        if self.discarding_line {
            // The oversize line ended; it does not terminate the frame.
            self.discarding_line = false;
            return None;
        }
        if self.line.is_empty() {
            return self.dispatch();
        }
        let line = std::mem::take(&mut self.line);
        self.process_line(&line);
        self.line = line;
        self.line.clear();
        None
    }

    fn process_line(&mut self, line: &[u8]) {
        if line.first() == Some(&b':') {
            return;
        }
        let Ok(text) = std::str::from_utf8(line) else {
            self.frame.error.get_or_insert(FrameError::InvalidUtf8);
            return;
        };
        let (field, value) = match text.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (text, ""),
        };
        match field {
            "event" => self.frame.kind = Some(value.to_string()),
            "data" => {
                if self.frame.has_data {
                    self.frame.data.push(b'\n');
                }
                self.frame.data.extend_from_slice(value.as_bytes());
                self.frame.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.frame.id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(ms));
                    }
                }
                return;
            }
            _ => return,
        }
        self.frame.has_fields = true;
    }

    fn dispatch(&mut self) -> Option<Result<StreamEvent, FrameError>> {
        let frame = std::mem::take(&mut self.frame);
        if let Some(err) = frame.error {
            return Some(Err(err));
        }
        if !frame.has_fields {
            return None;
        }
        if let Some(id) = frame.id {
            self.last_event_id = if id.is_empty() { None } else { Some(id) };
        }
        let mut event = StreamEvent::new(frame.kind.unwrap_or_default(), frame.data);
        if let Some(id) = &self.last_event_id {
            event = event.with_id(id.clone());
        }
        Some(Ok(event))
    }
}
