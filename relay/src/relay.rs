//! The relay loop: decode, verify, forward, one event at a time.
//!
//! Events are handled strictly in arrival order. A bad event (undecodable,
//! unsigned, badly signed, undeliverable) is logged and dropped; nothing here
//! ever stops the loop except cancellation or the event channel closing.

use std::sync::Arc;

use stream_event::StreamEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::RelayConfig;
use crate::envelope::EnvelopeDecoder;
use crate::forward::{ForwardError, ForwardRequest, Forwarder, HttpForwarder};
use crate::signature::{SignatureError, SignatureVerifier};
use crate::sse::{SseClient, StreamError};

/// Payloads this short (e.g. `{}`) are the proxy's keepalive pings.
pub const KEEPALIVE_MAX_LEN: usize = 2;
/// Target response bodies are cut to this many chars in logs.
const LOGGED_BODY_LEN: usize = 512;

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Keepalive,
    DecodeFailed,
    SignatureRejected,
    /// The target answered; `status` may still be a non-2xx.
    Forwarded { status: u16 },
    ForwardFailed,
}

/// Per-outcome counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub keepalive: u64,
    pub decode_failed: u64,
    pub signature_rejected: u64,
    pub forwarded: u64,
    /// Subset of `forwarded` where the target answered non-2xx.
    pub target_errors: u64,
    pub forward_failed: u64,
}

impl RelayStats {
    fn record(&mut self, outcome: &RelayOutcome) {
        self.received += 1;
        match outcome {
            RelayOutcome::Keepalive => self.keepalive += 1,
            RelayOutcome::DecodeFailed => self.decode_failed += 1,
            RelayOutcome::SignatureRejected => self.signature_rejected += 1,
            RelayOutcome::Forwarded { status } => {
                self.forwarded += 1;
                if !(200..300).contains(status) {
                    self.target_errors += 1;
                }
            }
            RelayOutcome::ForwardFailed => self.forward_failed += 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("event stream: {0}")]
    Stream(#[from] StreamError),
    #[error("forwarder: {0}")]
    Forward(#[from] ForwardError),
}

/// Consumes stream events and forwards the webhook deliveries they carry.
pub struct RelayLoop {
    target: Url,
    decoder: EnvelopeDecoder,
    verifier: Option<SignatureVerifier>,
    forwarder: Arc<dyn Forwarder>,
    cancel: CancellationToken,
    stats: RelayStats,
}

impl RelayLoop {
    pub fn new(config: &RelayConfig, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            target: config.target_url().clone(),
            decoder: EnvelopeDecoder::from_config(config),
            verifier: config.secret().and_then(SignatureVerifier::new),
            forwarder,
            cancel: CancellationToken::new(),
            stats: RelayStats::default(),
        }
    }

    /// Stops [`run`](Self::run) between events when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Handles events until the channel closes or the loop is cancelled.
    /// An event already being forwarded is finished first.
    pub async fn run(mut self, mut events: mpsc::Receiver<StreamEvent>) -> RelayStats {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("relay loop cancelled");
                    break;
                }
                event = events.recv() => event,
            };
            match event {
                Some(event) => {
                    self.handle(event).await;
                }
                None => {
                    info!("event stream ended");
                    break;
                }
            }
        }
        info!(
            received = self.stats.received,
            forwarded = self.stats.forwarded,
            dropped = self.stats.decode_failed
                + self.stats.signature_rejected
                + self.stats.forward_failed,
            "relay loop stopped"
        );
        self.stats
    }

    /// Processes one event and records its outcome.
    pub async fn handle(&mut self, event: StreamEvent) -> RelayOutcome {
        let outcome = self.relay(&event).await;
        self.stats.record(&outcome);
        outcome
    }

    async fn relay(&self, event: &StreamEvent) -> RelayOutcome {
        if event.len() <= KEEPALIVE_MAX_LEN {
            debug!(kind = event.effective_kind(), "keepalive");
            return RelayOutcome::Keepalive;
        }
        debug!(
            kind = event.effective_kind(),
            id = event.id().unwrap_or(""),
            len = event.len(),
            "received event"
        );

        let envelope = match self.decoder.decode(event.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping event: cannot decode webhook envelope");
                return RelayOutcome::DecodeFailed;
            }
        };
        for name in &envelope.missing_meta {
            warn!(header = %name, "envelope has no {} value; header not forwarded", name);
        }

        if let Some(verifier) = &self.verifier {
            let checked = match envelope.signature.as_deref() {
                Some(signature) => verifier.check(&envelope.body, signature),
                None => Err(SignatureError::Missing),
            };
            match checked {
                Ok(()) => debug!("signature verified"),
                Err(e) => {
                    warn!(error = %e, "dropping event: signature check failed");
                    return RelayOutcome::SignatureRejected;
                }
            }
        }

        let request = ForwardRequest::new(&self.target, &envelope);
        let result = self.forwarder.forward(request).await;
        if let Ok(res) = &result {
            debug!(
                status = res.status,
                headers = ?res.headers,
                body = %truncate(&res.body, LOGGED_BODY_LEN),
                "target response"
            );
        }
        match result {
            Ok(res) if res.is_success() => {
                info!(status = res.status, target = %self.target, "forwarded webhook");
                RelayOutcome::Forwarded { status: res.status }
            }
            Ok(res) => {
                warn!(
                    status = res.status,
                    target = %self.target,
                    body = %truncate(&res.body, LOGGED_BODY_LEN),
                    "target rejected webhook"
                );
                RelayOutcome::Forwarded { status: res.status }
            }
            Err(e) => {
                warn!(error = %e, target = %self.target, "dropping event: forward failed");
                RelayOutcome::ForwardFailed
            }
        }
    }
}

/// Runs the whole pipeline for `config` until `cancel` fires.
///
/// Spawns the stream client, drives the relay loop on the current task and
/// waits for the client to wind down before returning the loop's stats.
pub async fn run_relay(
    config: &RelayConfig,
    cancel: CancellationToken,
) -> Result<RelayStats, RelayError> {
    let forwarder = HttpForwarder::from_config(config)?;
    let client = SseClient::from_config(config, cancel.clone())?;
    info!(
        proxy = %config.proxy_url(),
        target = %config.target_url(),
        verify = config.secret().is_some(),
        "starting relay"
    );

    let (events, stream_task) = client.connect(config.channel_capacity());
    let stats = RelayLoop::new(config, Arc::new(forwarder))
        .with_cancellation(cancel.clone())
        .run(events)
        .await;

    cancel.cancel();
    if let Err(e) = stream_task.await {
        warn!(error = %e, "event stream task ended abnormally");
    }
    Ok(stats)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("", 0), "");
    }

    #[test]
    fn stats_count_target_errors_as_forwarded() {
        let mut stats = RelayStats::default();
        stats.record(&RelayOutcome::Keepalive);
        stats.record(&RelayOutcome::Forwarded { status: 200 });
        stats.record(&RelayOutcome::Forwarded { status: 500 });
        stats.record(&RelayOutcome::ForwardFailed);
        assert_eq!(stats.received, 4);
        assert_eq!(stats.keepalive, 1);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.target_errors, 1);
        assert_eq!(stats.forward_failed, 1);
    }
}
