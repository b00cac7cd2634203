//! Long-lived `text/event-stream` client for the webhook proxy.
//!
//! Opens a streaming GET, feeds the body through [`FrameParser`] and sends every
//! complete frame on a bounded channel. Any disconnect (EOF, read error, non-2xx,
//! failed connect) leads to a backoff sleep and a new request; the channel only
//! closes when the client is cancelled or the receiver is dropped.
//!
//! **Interaction**: spawned by [`run_relay`](crate::run_relay) via
//! [`SseClient::connect`]; the receiver goes to [`RelayLoop`](crate::RelayLoop).

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT, CACHE_CONTROL};
use reqwest::{Client, StatusCode};
use stream_event::{FrameParser, StreamEvent, DEFAULT_MAX_LINE_LEN};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ReconnectPolicy, RelayConfig};

const LAST_EVENT_ID: &str = "last-event-id";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("connect: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("stream answered HTTP {0}")]
    Status(StatusCode),
    #[error("read: {0}")]
    Read(#[source] reqwest::Error),
    #[error("stream closed by server")]
    Closed,
}

/// How one connection ended without an error.
enum Session {
    ReceiverDropped,
}

pub struct SseClient {
    client: Client,
    url: Url,
    reconnect: ReconnectPolicy,
    cancel: CancellationToken,
    max_line_len: usize,
}

impl SseClient {
    pub fn new(
        url: Url,
        reconnect: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, StreamError> {
        // No overall request timeout: the response body never ends on its own.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()
            .map_err(StreamError::Client)?;
        Ok(Self {
            client,
            url,
            reconnect,
            cancel,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        })
    }

    pub fn from_config(config: &RelayConfig, cancel: CancellationToken) -> Result<Self, StreamError> {
        Ok(Self::new(config.proxy_url().clone(), config.reconnect(), cancel)?
            .with_max_line_len(config.max_line_len()))
    }

    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Spawns the client and returns the event channel plus the task handle.
    pub fn connect(self, capacity: usize) -> (mpsc::Receiver<StreamEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    /// Runs the connect / read / reconnect cycle until cancelled or `tx` is closed.
    pub async fn run(self, tx: mpsc::Sender<StreamEvent>) {
        let mut parser = FrameParser::with_max_line_len(self.max_line_len);
        let mut failures: u32 = 0;
        let mut base = self.reconnect.initial;
        loop {
            let ended = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("event stream cancelled");
                    return;
                }
                _ = tx.closed() => {
                    debug!("event receiver dropped");
                    return;
                }
                ended = self.stream_once(&mut parser, &tx, &mut failures) => ended,
            };
            match ended {
                Ok(Session::ReceiverDropped) => {
                    debug!("event receiver dropped");
                    return;
                }
                Err(e) => warn!(url = %self.url, error = %e, "event stream disconnected"),
            }

            parser.reset();
            if let Some(hint) = parser.take_retry() {
                base = self.reconnect.base_for_hint(hint);
            }
            let delay = self.reconnect.delay_from(base, failures);
            failures = failures.saturating_add(1);
            info!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "reconnecting to event stream"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("event stream cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream_once(
        &self,
        parser: &mut FrameParser,
        tx: &mpsc::Sender<StreamEvent>,
        failures: &mut u32,
    ) -> Result<Session, StreamError> {
        let mut req = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = parser
            .last_event_id()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            req = req.header(LAST_EVENT_ID, id);
        }
        let res = req.send().await.map_err(StreamError::Connect)?;
        let status = res.status();
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }
        info!(url = %self.url, "connected to event stream");
        *failures = 0;

        let mut body = res.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StreamError::Read)?;
            for frame in parser.feed(&chunk) {
                match frame {
                    Ok(event) => {
                        debug!(kind = event.effective_kind(), len = event.len(), "stream event");
                        if tx.send(event).await.is_err() {
                            return Ok(Session::ReceiverDropped);
                        }
                    }
                    Err(e) => warn!(error = %e, "discarding malformed frame"),
                }
            }
        }
        Err(StreamError::Closed)
    }
}
