//! Outbound delivery: re-issue the original webhook as a POST to the target.
//!
//! [`Forwarder`] is the seam the relay loop talks to; [`HttpForwarder`] is the
//! reqwest implementation. Delivery is best-effort and at-most-once: errors are
//! returned to the caller, never retried here.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::RelayConfig;
use crate::envelope::WebhookEnvelope;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid value for header {name}: {value:?}")]
    InvalidHeader { name: String, value: String },
    #[error("forward request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// One outbound delivery, borrowed from the decoded envelope.
#[derive(Debug, Clone, Copy)]
pub struct ForwardRequest<'a> {
    pub target: &'a Url,
    pub content_type: &'a str,
    pub headers: &'a [(HeaderName, Cow<'a, str>)],
    pub body: &'a [u8],
}

impl<'a> ForwardRequest<'a> {
    pub fn new(target: &'a Url, envelope: &'a WebhookEnvelope<'a>) -> Self {
        Self {
            target,
            content_type: &envelope.content_type,
            headers: &envelope.meta,
            body: &envelope.body,
        }
    }

    /// Header map for the outbound request: `Content-Type` plus metadata.
    pub fn header_map(&self) -> Result<HeaderMap, ForwardError> {
        let mut map = HeaderMap::with_capacity(self.headers.len() + 1);
        map.insert(CONTENT_TYPE, header_value(CONTENT_TYPE.as_str(), self.content_type)?);
        for (name, value) in self.headers {
            map.insert(name.clone(), header_value(name.as_str(), value)?);
        }
        Ok(map)
    }
}

/// What the target answered; kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ForwardResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: ForwardRequest<'_>) -> Result<ForwardResponse, ForwardError>;
}

/// POSTs deliveries with a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client,
}

impl HttpForwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ForwardError::Client)?;
        Ok(Self { client })
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, ForwardError> {
        Self::new(config.forward_timeout())
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: ForwardRequest<'_>) -> Result<ForwardResponse, ForwardError> {
        let headers = request.header_map()?;
        let res = self
            .client
            .post(request.target.clone())
            .headers(headers)
            .body(request.body.to_vec())
            .send()
            .await
            .map_err(ForwardError::Transport)?;
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        // The status already decided the outcome; a lost body only costs diagnostics.
        let body = match res.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(status, error = %e, "failed to read target response body");
                String::new()
            }
        };
        Ok(ForwardResponse {
            status,
            headers,
            body,
        })
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ForwardError> {
    HeaderValue::from_str(value).map_err(|_| ForwardError::InvalidHeader {
        name: name.to_string(),
        value: value.to_string(),
    })
}
