//! Stream event protocol: the wire shape of a single `text/event-stream` frame.
//!
//! This crate has no HTTP dependency. Callers feed raw response bytes into a
//! [`FrameParser`] and receive one [`StreamEvent`] per complete frame; hookrelay's
//! SSE client owns the connection and hands events to the relay loop.

pub mod event;
pub mod parse;

pub use event::StreamEvent;
pub use parse::{FrameError, FrameParser, DEFAULT_MAX_LINE_LEN};
