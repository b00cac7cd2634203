//! # hookrelay
//!
//! Relays webhook deliveries published on a server-sent event stream (a
//! smee.io-style webhook proxy) to a local HTTP endpoint.
//!
//! ## Pipeline
//!
//! ```text
//! proxy ──SSE──▶ SseClient ──mpsc──▶ RelayLoop ──POST──▶ target
//!                (reconnects)        decode → verify → forward
//! ```
//!
//! - [`SseClient`]: long-lived `GET` on the proxy URL, frames parsed with
//!   [`stream_event::FrameParser`], reconnects with [`ReconnectPolicy`] backoff and
//!   resumes with `Last-Event-ID`.
//! - [`EnvelopeDecoder`]: pulls `content-type`, `body`, `x-hub-signature` and the
//!   configured metadata keys out of each event payload.
//! - [`SignatureVerifier`]: HMAC check of the body when a secret is configured.
//! - [`Forwarder`] / [`HttpForwarder`]: re-issues the delivery as a POST.
//! - [`RelayLoop`]: drives the above per event, in order, and counts outcomes.
//!
//! [`run_relay`] wires everything from a [`RelayConfig`].

pub mod config;
pub mod envelope;
pub mod forward;
pub mod relay;
pub mod signature;
pub mod sse;

pub use config::{
    ConfigError, ReconnectPolicy, RelayConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_FORWARD_HEADERS,
    DEFAULT_FORWARD_TIMEOUT,
};
pub use envelope::{lookup_fields, DecodeError, EnvelopeDecoder, WebhookEnvelope};
pub use forward::{ForwardError, ForwardRequest, ForwardResponse, Forwarder, HttpForwarder};
pub use relay::{run_relay, RelayError, RelayLoop, RelayOutcome, RelayStats, KEEPALIVE_MAX_LEN};
pub use signature::{verify, SignatureAlgorithm, SignatureError, SignatureVerifier};
pub use sse::{SseClient, StreamError};
pub use stream_event::StreamEvent;
