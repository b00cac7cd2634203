//! Relay configuration: built once at startup, immutable afterwards.
//!
//! The binary assembles a [`RelayConfig`] from flags and environment; the SSE
//! client and the relay loop only ever borrow it.

use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderName;
use stream_event::DEFAULT_MAX_LINE_LEN;
use thiserror::Error;
use url::Url;

/// Metadata keys copied from the envelope into outbound headers by default.
pub const DEFAULT_FORWARD_HEADERS: [&str; 2] = ["x-github-event", "x-github-delivery"];
/// Outbound request timeout when none is configured.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);
/// Events buffered between the stream reader and the relay loop.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field} url {value:?}: {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported {field} url scheme {scheme:?} (expected http or https)")]
    UnsupportedScheme { field: &'static str, scheme: String },
    #[error("invalid forward header name {0:?}")]
    InvalidHeaderName(String),
}

/// Exponential backoff between reconnect attempts; retries never stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Cap for any single delay.
    pub max: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), using the policy's initial delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_from(self.initial, attempt)
    }

    /// Backoff base for a server-sent `retry:` value, kept within `initial..=max`.
    pub fn base_for_hint(&self, hint: Duration) -> Duration {
        hint.max(self.initial).min(self.max)
    }

    /// Like [`delay`](Self::delay) but grows from `base` (see [`base_for_hint`](Self::base_for_hint)).
    pub fn delay_from(&self, base: Duration, attempt: u32) -> Duration {
        let secs = base.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Everything the relay pipeline needs to run.
#[derive(Clone)]
pub struct RelayConfig {
    proxy_url: Url,
    target_url: Url,
    secret: Option<String>,
    forward_headers: Vec<HeaderName>,
    reconnect: ReconnectPolicy,
    forward_timeout: Duration,
    channel_capacity: usize,
    max_line_len: usize,
}

impl RelayConfig {
    /// Validates both URLs; defaults apply to everything else.
    pub fn new(proxy_url: &str, target_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            proxy_url: parse_http_url("proxy", proxy_url)?,
            target_url: parse_http_url("target", target_url)?,
            secret: None,
            forward_headers: DEFAULT_FORWARD_HEADERS
                .into_iter()
                .map(HeaderName::from_static)
                .collect(),
            reconnect: ReconnectPolicy::default(),
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        })
    }

    /// Sets the shared HMAC secret. An empty secret leaves verification off.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.secret = if secret.is_empty() { None } else { Some(secret) };
        self
    }

    /// Replaces the metadata keys propagated as headers. Names are matched
    /// case-insensitively against envelope keys (lowercase on the wire).
    pub fn with_forward_headers<I, S>(mut self, headers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = Vec::new();
        for raw in headers {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            let name = HeaderName::from_bytes(raw.to_ascii_lowercase().as_bytes())
                .map_err(|_| ConfigError::InvalidHeaderName(raw.to_string()))?;
            if !names.contains(&name) {
                names.push(name);
            }
        }
        self.forward_headers = names;
        Ok(self)
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Longest event-stream line accepted; frames with longer lines are skipped.
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len.max(1);
        self
    }

    pub fn proxy_url(&self) -> &Url {
        &self.proxy_url
    }

    pub fn target_url(&self) -> &Url {
        &self.target_url
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub fn forward_headers(&self) -> &[HeaderName] {
        &self.forward_headers
    }

    pub fn reconnect(&self) -> ReconnectPolicy {
        self.reconnect
    }

    pub fn forward_timeout(&self) -> Duration {
        self.forward_timeout
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("proxy_url", &self.proxy_url.as_str())
            .field("target_url", &self.target_url.as_str())
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("forward_headers", &self.forward_headers)
            .field("reconnect", &self.reconnect)
            .field("forward_timeout", &self.forward_timeout)
            .field("channel_capacity", &self.channel_capacity)
            .field("max_line_len", &self.max_line_len)
            .finish()
    }
}

fn parse_http_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme {
            field,
            scheme: other.to_string(),
        }),
    }
}
