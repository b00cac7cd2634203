//! One received stream frame: event type + payload (+ last event id).

/// Event type the wire protocol assumes when a frame carries no `event:` line.
pub const DEFAULT_KIND: &str = "message";

/// A single frame received from the stream.
///
/// Created by [`FrameParser`](crate::FrameParser) once per complete frame and never
/// mutated afterwards; ownership moves to the consumer over a channel.
///
/// Note on naming:
/// - `kind` is the raw `event:` field and stays empty when the frame had none
/// - `id` is the last event id in effect when the frame was dispatched, which
///   may come from an earlier frame
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamEvent {
    kind: String,
    payload: Vec<u8>,
    id: Option<String>,
}

impl StreamEvent {
    pub fn new(kind: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Raw `event:` value; empty when the frame did not set one.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// `event:` value with the protocol default applied.
    pub fn effective_kind(&self) -> &str {
        if self.kind.is_empty() {
            DEFAULT_KIND
        } else {
            &self.kind
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Byte length of the payload. Keepalive frames are near-empty.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
