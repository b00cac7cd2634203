//! Relay loop behaviour against a recording forwarder.


use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hookrelay::{
    ForwardError, ForwardRequest, ForwardResponse, Forwarder, RelayConfig, RelayLoop,
    RelayOutcome, StreamEvent,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const OK_SIG: &str = "sha1=b4ac4b24a0cfa3eba07bf753358fa7a882cb0105";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivered {
    target: String,
    content_type: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Delivered {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Records every request and answers with a fixed status.
#[derive(Clone)]
struct RecordingForwarder {
    delivered: Arc<Mutex<Vec<Delivered>>>,
    status: u16,
}

impl RecordingForwarder {
    fn new(status: u16) -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
            status,
        }
    }

    fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, request: ForwardRequest<'_>) -> Result<ForwardResponse, ForwardError> {
        self.delivered.lock().unwrap().push(Delivered {
            target: request.target.to_string(),
            content_type: request.content_type.to_string(),
            headers: request
                .headers
                .iter()
                .map(|(n, v)| (n.as_str().to_string(), v.to_string()))
                .collect(),
            body: request.body.to_vec(),
        });
        Ok(ForwardResponse {
            status: self.status,
            headers: Default::default(),
            body: String::new(),
        })
    }
}

/// Fails every delivery with an invalid-header error.
struct FailingForwarder;

#[async_trait]
impl Forwarder for FailingForwarder {
    async fn forward(&self, _request: ForwardRequest<'_>) -> Result<ForwardResponse, ForwardError> {
        Err(ForwardError::InvalidHeader {
            name: "x-test".into(),
            value: "\n".into(),
        })
    }
}

fn config() -> RelayConfig {
    RelayConfig::new("https://smee.io/test", "http://127.0.0.1:3000/hook").unwrap()
}

fn push_event(delivery: &str, signature: Option<&str>) -> StreamEvent {
    let mut envelope = json!({
        "content-type": "application/json",
        "x-github-event": "push",
        "x-github-delivery": delivery,
        "host": "smee.io",
        "body": "{\"ok\":true}",
        "timestamp": 1700000000000u64,
    });
    if let Some(signature) = signature {
        envelope["x-hub-signature"] = json!(signature);
    }
    StreamEvent::new("message", serde_json::to_vec(&envelope).unwrap())
}

#[tokio::test]
async fn unsecured_push_is_forwarded_verbatim() {
    let forwarder = RecordingForwarder::new(200);
    let mut relay = RelayLoop::new(&config(), Arc::new(forwarder.clone()));

    let outcome = relay.handle(push_event("abc123", None)).await;
    assert_eq!(outcome, RelayOutcome::Forwarded { status: 200 });

    let delivered = forwarder.delivered();
    assert_eq!(delivered.len(), 1);
    let d = &delivered[0];
    assert_eq!(d.target, "http://127.0.0.1:3000/hook");
    assert_eq!(d.content_type, "application/json");
    assert_eq!(d.header("x-github-event"), Some("push"));
    assert_eq!(d.header("x-github-delivery"), Some("abc123"));
    assert_eq!(d.body, br#"{"ok":true}"#);
    // Envelope keys outside the forward set stay behind.
    assert_eq!(d.header("host"), None);
}

#[tokio::test]
async fn secured_relay_skips_unsigned_event() {
    let forwarder = RecordingForwarder::new(200);
    let mut relay = RelayLoop::new(
        &config().with_secret("s3cr3t"),
        Arc::new(forwarder.clone()),
    );

    let outcome = relay.handle(push_event("abc123", None)).await;
    assert_eq!(outcome, RelayOutcome::SignatureRejected);
    assert!(forwarder.delivered().is_empty());
}

#[tokio::test]
async fn secured_relay_forwards_valid_signature() {
    let forwarder = RecordingForwarder::new(200);
    let mut relay = RelayLoop::new(
        &config().with_secret("s3cr3t"),
        Arc::new(forwarder.clone()),
    );

    let outcome = relay.handle(push_event("abc123", Some(OK_SIG))).await;
    assert_eq!(outcome, RelayOutcome::Forwarded { status: 200 });
    assert_eq!(forwarder.delivered().len(), 1);
}

#[tokio::test]
async fn secured_relay_rejects_bad_signatures() {
    let forwarder = RecordingForwarder::new(200);
    let mut relay = RelayLoop::new(
        &config().with_secret("s3cr3t"),
        Arc::new(forwarder.clone()),
    );

    for signature in [
        "sha1=0000000000000000000000000000000000000000",
        "sha256=b4ac4b24a0cfa3eba07bf753358fa7a882cb0105",
        "garbage",
    ] {
        let outcome = relay.handle(push_event("abc123", Some(signature))).await;
        assert_eq!(outcome, RelayOutcome::SignatureRejected, "{signature}");
    }
    assert!(forwarder.delivered().is_empty());
    assert_eq!(relay.stats().signature_rejected, 3);
}

#[tokio::test]
async fn keepalives_and_garbage_are_dropped() {
    let forwarder = RecordingForwarder::new(200);
    let mut relay = RelayLoop::new(&config(), Arc::new(forwarder.clone()));

    assert_eq!(
        relay.handle(StreamEvent::new("ping", "{}")).await,
        RelayOutcome::Keepalive
    );
    assert_eq!(
        relay.handle(StreamEvent::new("ready", "")).await,
        RelayOutcome::Keepalive
    );
    assert_eq!(
        relay.handle(StreamEvent::new("message", "not json at all")).await,
        RelayOutcome::DecodeFailed
    );
    // Valid JSON without a body.
    assert_eq!(
        relay
            .handle(StreamEvent::new("message", r#"{"content-type":"text/plain"}"#))
            .await,
        RelayOutcome::DecodeFailed
    );
    assert!(forwarder.delivered().is_empty());

    let stats = relay.stats();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.keepalive, 2);
    assert_eq!(stats.decode_failed, 2);
}

#[tokio::test]
async fn missing_metadata_is_not_fatal() {
    let forwarder = RecordingForwarder::new(200);
    let mut relay = RelayLoop::new(&config(), Arc::new(forwarder.clone()));

    let payload = json!({ "content-type": "text/plain", "body": "hello" });
    let outcome = relay
        .handle(StreamEvent::new("message", serde_json::to_vec(&payload).unwrap()))
        .await;
    assert_eq!(outcome, RelayOutcome::Forwarded { status: 200 });

    let delivered = forwarder.delivered();
    assert!(delivered[0].headers.is_empty());
    assert_eq!(delivered[0].body, b"hello");
}

#[tokio::test]
async fn forward_failures_do_not_stop_the_loop() {
    let (tx, rx) = mpsc::channel(8);
    let relay = RelayLoop::new(&config(), Arc::new(FailingForwarder));
    for i in 0..3 {
        tx.send(push_event(&format!("d-{i}"), None)).await.unwrap();
    }
    drop(tx);

    let stats = relay.run(rx).await;
    assert_eq!(stats.received, 3);
    assert_eq!(stats.forward_failed, 3);
    assert_eq!(stats.forwarded, 0);
}

#[tokio::test]
async fn non_success_status_is_reported_not_retried() {
    let forwarder = RecordingForwarder::new(503);
    let mut relay = RelayLoop::new(&config(), Arc::new(forwarder.clone()));

    let outcome = relay.handle(push_event("abc123", None)).await;
    assert_eq!(outcome, RelayOutcome::Forwarded { status: 503 });
    assert_eq!(forwarder.delivered().len(), 1);
    assert_eq!(relay.stats().target_errors, 1);
}

#[tokio::test]
async fn deliveries_keep_stream_order() {
    let forwarder = RecordingForwarder::new(200);
    let (tx, rx) = mpsc::channel(4);
    let relay = RelayLoop::new(&config(), Arc::new(forwarder.clone()));
    let task = tokio::spawn(relay.run(rx));

    let ids: Vec<String> = (0..50).map(|i| format!("delivery-{i:03}")).collect();
    for (i, id) in ids.iter().enumerate() {
        if i % 7 == 0 {
            tx.send(StreamEvent::new("ping", "{}")).await.unwrap();
        }
        tx.send(push_event(id, None)).await.unwrap();
    }
    drop(tx);

    let stats = task.await.unwrap();
    assert_eq!(stats.forwarded, ids.len() as u64);
    let forwarded: Vec<String> = forwarder
        .delivered()
        .iter()
        .map(|d| d.header("x-github-delivery").unwrap().to_string())
        .collect();
    assert_eq!(forwarded, ids);
}

#[tokio::test]
async fn without_secret_every_decodable_event_is_forwarded() {
    let forwarder = RecordingForwarder::new(200);
    let (tx, rx) = mpsc::channel(16);
    let relay = RelayLoop::new(&config(), Arc::new(forwarder.clone()));

    let payloads: Vec<Vec<u8>> = vec![
        serde_json::to_vec(&json!({"content-type": "application/json", "body": {"a": 1}})).unwrap(),
        b"{}".to_vec(),
        b"[1,2,3]".to_vec(),
        serde_json::to_vec(&json!({"content-type": "text/plain", "body": ""})).unwrap(),
        serde_json::to_vec(&json!({"body": "no content type"})).unwrap(),
        serde_json::to_vec(&json!({"content-type": "application/json", "body": "{}"})).unwrap(),
    ];
    for payload in payloads {
        tx.send(StreamEvent::new("message", payload)).await.unwrap();
    }
    drop(tx);

    let stats = relay.run(rx).await;
    // Decodable and not a keepalive: first, fourth and sixth.
    assert_eq!(stats.received, 6);
    assert_eq!(stats.keepalive, 1);
    assert_eq!(stats.decode_failed, 2);
    assert_eq!(stats.forwarded, 3);
    assert_eq!(forwarder.delivered().len(), 3);
    assert_eq!(forwarder.delivered()[0].body, br#"{"a":1}"#);
}

#[tokio::test]
async fn cancellation_stops_an_idle_loop() {
    let (_tx, rx) = mpsc::channel::<StreamEvent>(1);
    let cancel = CancellationToken::new();
    let relay = RelayLoop::new(&config(), Arc::new(RecordingForwarder::new(200)))
        .with_cancellation(cancel.clone());
    let task = tokio::spawn(relay.run(rx));

    cancel.cancel();
    let stats = tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(stats.received, 0);
}
