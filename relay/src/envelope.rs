//! Webhook envelope decoding.
//!
//! The proxy wraps each delivery in a flat JSON object: the original request
//! headers as lowercase keys plus the original request body under `body`. Only a
//! handful of top-level keys matter, so decoding is a single streaming pass over
//! the raw bytes that captures those keys as borrowed [`RawValue`] slices and
//! skips everything else. There is no schema type for the envelope.

use std::borrow::Cow;
use std::fmt;

use reqwest::header::HeaderName;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::config::RelayConfig;

pub const CONTENT_TYPE_KEY: &str = "content-type";
pub const BODY_KEY: &str = "body";
pub const SIGNATURE_KEY: &str = "x-hub-signature";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope is not a JSON object: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("envelope has no {0:?} field")]
    MissingField(String),
    #[error("envelope field {0:?} is not a string")]
    NotAString(String),
}

/// Decoded view of one envelope, borrowing from the event payload where it can.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEnvelope<'a> {
    pub content_type: Cow<'a, str>,
    /// Metadata present in the envelope, in configured order.
    pub meta: Vec<(HeaderName, Cow<'a, str>)>,
    /// Configured metadata keys the envelope did not carry.
    pub missing_meta: Vec<HeaderName>,
    /// `<algorithm>=<hex digest>` as sent upstream.
    pub signature: Option<Cow<'a, str>>,
    /// Original request body, byte-for-byte.
    pub body: Cow<'a, [u8]>,
}

impl WebhookEnvelope<'_> {
    pub fn meta_value(&self, name: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| value.as_ref())
    }
}

/// Extracts the relay fields from an event payload.
#[derive(Debug, Clone)]
pub struct EnvelopeDecoder {
    meta_keys: Vec<HeaderName>,
}

impl EnvelopeDecoder {
    pub fn new(meta_keys: impl Into<Vec<HeaderName>>) -> Self {
        Self {
            meta_keys: meta_keys.into(),
        }
    }

    /// Metadata keys from the config's forwarded header set.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.forward_headers().to_vec())
    }

    /// `x-hub-signature` is optional here; whether it is required is the
    /// verifier's decision.
    pub fn decode<'a>(&self, payload: &'a [u8]) -> Result<WebhookEnvelope<'a>, DecodeError> {
        let mut keys = vec![CONTENT_TYPE_KEY, BODY_KEY, SIGNATURE_KEY];
        keys.extend(self.meta_keys.iter().map(HeaderName::as_str));
        let found = lookup_fields(payload, &keys)?;

        let content_type = raw_str(CONTENT_TYPE_KEY, require(found[0], CONTENT_TYPE_KEY)?)?;
        let body = raw_body(require(found[1], BODY_KEY)?)?;
        let signature = found[2]
            .map(|raw| raw_str(SIGNATURE_KEY, raw))
            .transpose()?;

        let mut meta = Vec::with_capacity(self.meta_keys.len());
        let mut missing_meta = Vec::new();
        for (name, raw) in self.meta_keys.iter().zip(found[3..].iter().copied()) {
            match raw {
                Some(raw) => meta.push((name.clone(), raw_str(name.as_str(), raw)?)),
                None => missing_meta.push(name.clone()),
            }
        }

        Ok(WebhookEnvelope {
            content_type,
            meta,
            missing_meta,
            signature,
            body,
        })
    }
}

/// Looks up top-level `keys` in a JSON object in one pass.
///
/// Returns one slot per key, in the order given; `null` counts as absent. When
/// a key repeats, the last occurrence wins.
pub fn lookup_fields<'a>(
    payload: &'a [u8],
    keys: &[&str],
) -> Result<Vec<Option<&'a RawValue>>, DecodeError> {
    let mut de = serde_json::Deserializer::from_slice(payload);
    let found = FieldLookup { keys }
        .deserialize(&mut de)
        .map_err(DecodeError::InvalidJson)?;
    de.end().map_err(DecodeError::InvalidJson)?;
    Ok(found
        .into_iter()
        .map(|slot| slot.filter(|raw| raw.get() != "null"))
        .collect())
}

fn require<'a>(slot: Option<&'a RawValue>, key: &str) -> Result<&'a RawValue, DecodeError> {
    slot.ok_or_else(|| DecodeError::MissingField(key.to_string()))
}

fn raw_str<'a>(key: &str, raw: &'a RawValue) -> Result<Cow<'a, str>, DecodeError> {
    if let Ok(s) = serde_json::from_str::<&'a str>(raw.get()) {
        return Ok(Cow::Borrowed(s));
    }
    // Escaped strings cannot borrow.
    serde_json::from_str::<String>(raw.get())
        .map(Cow::Owned)
        .map_err(|_| DecodeError::NotAString(key.to_string()))
}

/// A string body is the original bytes JSON-encoded; any other value is the
/// original JSON document and is passed through as its exact raw text.
fn raw_body(raw: &RawValue) -> Result<Cow<'_, [u8]>, DecodeError> {
    if raw.get().starts_with('"') {
        return Ok(match raw_str(BODY_KEY, raw)? {
            Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
            Cow::Owned(s) => Cow::Owned(s.into_bytes()),
        });
    }
    Ok(Cow::Borrowed(raw.get().as_bytes()))
}

struct FieldLookup<'k> {
    keys: &'k [&'k str],
}

impl<'de, 'k> DeserializeSeed<'de> for FieldLookup<'k> {
    type Value = Vec<Option<&'de RawValue>>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'k> Visitor<'de> for FieldLookup<'k> {
    type Value = Vec<Option<&'de RawValue>>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut found: Vec<Option<&'de RawValue>> = vec![None; self.keys.len()];
        while let Some(key) = map.next_key::<Key<'de>>()? {
            let mut hit: Option<&'de RawValue> = None;
            for (slot, wanted) in found.iter_mut().zip(self.keys) {
                if *wanted == key.0 {
                    if hit.is_none() {
                        hit = Some(map.next_value()?);
                    }
                    *slot = hit;
                }
            }
            if hit.is_none() {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }
}

/// Object key that borrows from the input unless it contains escapes.
struct Key<'de>(Cow<'de, str>);

impl<'de> Deserialize<'de> for Key<'de> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = Key<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string key")
            }

            fn visit_borrowed_str<E: de::Error>(self, v: &'de str) -> Result<Self::Value, E> {
                Ok(Key(Cow::Borrowed(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(Key(Cow::Owned(v.to_owned())))
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}
