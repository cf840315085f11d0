//! End-to-end proxy tests
//!
//! A mock upstream and the relay both run on ephemeral ports; requests go
//! through a real HTTP client.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Response, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use futures::stream;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::server::serve;
use super::ProxyState;
use crate::config::Config;
use crate::storage::tests::MemorySink;
use crate::storage::{LogRecord, StreamOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Mock upstream
// ─────────────────────────────────────────────────────────────────────────────

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let headers: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                Value::String(v.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();

    let payload = json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "body": String::from_utf8_lossy(&body),
        "headers": headers,
    });

    (
        [("x-upstream", "yes"), ("alt-svc", "h3=\":443\"")],
        Json(payload),
    )
}

/// Three SSE chunks, 150ms apart
async fn slow() -> Response<Body> {
    let chunks = stream::unfold(0u8, |i| async move {
        if i >= 3 {
            return None;
        }
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        Some((Ok::<_, io::Error>(Bytes::from(format!("data: {i}\n\n"))), i + 1))
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(chunks))
        .unwrap()
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

/// One chunk, then the upstream connection breaks
async fn broken() -> Response<Body> {
    let chunks = stream::unfold(0u8, |i| async move {
        match i {
            0 => Some((Ok(Bytes::from_static(b"partial")), 1)),
            1 => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some((Err(io::Error::new(io::ErrorKind::Other, "boom")), 2))
            }
            _ => None,
        }
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(chunks))
        .unwrap()
}

/// Brotli-framed bytes when the request accepts `br`, plain text otherwise
async fn negotiated(headers: HeaderMap) -> Response<Body> {
    let accepts_br = headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("br"));

    let builder = Response::builder().header("content-type", "application/json");
    if accepts_br {
        builder
            .header("content-encoding", "br")
            .body(Body::from(&b"\x8b\x02\x80{}\x03"[..]))
            .unwrap()
    } else {
        builder.body(Body::from("{}")).unwrap()
    }
}

/// A chunk every 50ms for five seconds
async fn endless() -> Response<Body> {
    let chunks = stream::unfold(0u8, |i| async move {
        if i >= 100 {
            return None;
        }
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Some((Ok::<_, io::Error>(Bytes::from(format!("data: {i}\n\n"))), i + 1))
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(chunks))
        .unwrap()
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/v1/slow", get(slow))
        .route("/v1/endless", get(endless))
        .route("/v1/empty", get(empty))
        .route("/v1/broken", get(broken))
        .route("/v1/negotiated", get(negotiated))
        .route("/*path", any(echo));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay harness
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    addr: SocketAddr,
    state: ProxyState,
    sink: Arc<MemorySink>,
    client: reqwest::Client,
}

impl Harness {
    async fn start(routes: &[(&str, String)]) -> Self {
        let mut config = Config::default();
        config.routing.routes = routes
            .iter()
            .map(|(p, t)| (p.to_string(), t.clone()))
            .collect();
        config.routing.model_mapping = BTreeMap::from([("A".to_string(), "B".to_string())]);

        let sink = Arc::new(MemorySink::default());
        let state = ProxyState::new(&config, sink.clone()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve_state = state.clone();
        tokio::spawn(async move {
            serve(listener, serve_state, std::future::pending()).await.unwrap();
        });

        Self {
            addr,
            state,
            sink,
            client: reqwest::Client::new(),
        }
    }

    /// Relay routing `v1/*` to the upstream root and everything else to `/fallback`
    async fn with_upstream() -> Self {
        let upstream = spawn_upstream().await;
        let base = format!("http://{upstream}");
        Self::start(&[("v1/*", base.clone()), ("", format!("{base}/fallback"))]).await
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn wait_for_records(&self, n: usize) -> Vec<LogRecord> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let records = self.sink.records();
            if records.len() >= n || Instant::now() > deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarding
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_forwards_request_and_rewrites_model() {
    let h = Harness::with_upstream().await;

    let resp = h
        .client
        .post(h.url("/v1/echo?b=2&a=1"))
        .header("x-custom", "kept")
        .header("x-real-ip", "10.0.0.1")
        .header("x-forwarded-for", "10.0.0.2")
        .json(&json!({"model": "A", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-upstream"], "yes");
    assert!(resp.headers().get("alt-svc").is_none());

    let delivered = resp.bytes().await.unwrap();
    let echoed: Value = serde_json::from_slice(&delivered).unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/v1/echo");
    assert_eq!(echoed["query"], "b=2&a=1");
    assert_eq!(echoed["headers"]["x-custom"], "kept");
    assert!(echoed["headers"].get("x-real-ip").is_none());
    assert!(echoed["headers"].get("x-forwarded-for").is_none());

    let forwarded: Value = serde_json::from_str(echoed["body"].as_str().unwrap()).unwrap();
    assert_eq!(forwarded["model"], "B");

    let records = h.wait_for_records(1).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.request_method, "POST");
    assert!(record.request_url.ends_with("/v1/echo?b=2&a=1"));
    assert_eq!(record.status_code, 200);
    assert_eq!(record.outcome, StreamOutcome::Complete);
    assert_eq!(record.response_content, delivered.to_vec());
    assert!(record.request_body.contains("\"B\""));

    let logged_headers: Value = serde_json::from_str(&record.response_headers).unwrap();
    assert_eq!(logged_headers["x-upstream"], "yes");
}

#[tokio::test]
async fn test_query_string_forwarded_byte_for_byte() {
    let h = Harness::with_upstream().await;

    let echoed: Value = h
        .client
        .get(h.url("/v1/search?flag&q=a%20b&r=+"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed["query"], "flag&q=a%20b&r=+");

    let records = h.wait_for_records(1).await;
    assert!(records[0].request_url.ends_with("/v1/search?flag&q=a%20b&r=+"));
}

#[tokio::test]
async fn test_caller_accept_encoding_not_forwarded() {
    let h = Harness::with_upstream().await;

    let echoed: Value = h
        .client
        .get(h.url("/v1/echo"))
        .header("accept-encoding", "gzip, deflate, br")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let forwarded = echoed["headers"]["accept-encoding"].as_str().unwrap_or_default();
    assert!(!forwarded.contains("br"), "forwarded accept-encoding: {forwarded}");
    assert!(!forwarded.contains("deflate"), "forwarded accept-encoding: {forwarded}");
}

#[tokio::test]
async fn test_response_relayed_decoded_when_caller_accepts_brotli() {
    let h = Harness::with_upstream().await;

    let resp = h
        .client
        .get(h.url("/v1/negotiated"))
        .header("accept-encoding", "gzip, deflate, br")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().get("content-encoding").is_none());

    let delivered = resp.bytes().await.unwrap();
    assert_eq!(delivered.as_ref(), b"{}");

    let records = h.wait_for_records(1).await;
    assert_eq!(records[0].response_content, b"{}".to_vec());
}

#[tokio::test]
async fn test_unmapped_model_forwarded_unchanged() {
    let h = Harness::with_upstream().await;

    let resp = h
        .client
        .put(h.url("/v1/items/7"))
        .json(&json!({"model": "C"}))
        .send()
        .await
        .unwrap();

    let echoed: Value = resp.json().await.unwrap();
    let forwarded: Value = serde_json::from_str(echoed["body"].as_str().unwrap()).unwrap();
    assert_eq!(echoed["method"], "PUT");
    assert_eq!(forwarded["model"], "C");
}

#[tokio::test]
async fn test_root_route_catches_unmatched_paths() {
    let h = Harness::with_upstream().await;

    for (path, expected) in [("/other/thing", "/fallback/other/thing"), ("/", "/fallback/")] {
        let echoed: Value = h
            .client
            .delete(h.url(path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(echoed["path"], expected, "request path {path}");
        assert_eq!(echoed["method"], "DELETE");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming and recording
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_record_persisted_only_after_full_delivery() {
    let h = Harness::with_upstream().await;

    let resp = h.client.get(h.url("/v1/slow")).send().await.unwrap();
    assert_eq!(resp.headers()["content-type"], "text/event-stream");

    // Upstream is still producing chunks
    assert!(h.sink.records().is_empty());
    assert_eq!(h.state.recorder().in_flight(), 1);

    let delivered = resp.bytes().await.unwrap();
    assert_eq!(delivered.as_ref(), b"data: 0\n\ndata: 1\n\ndata: 2\n\n");

    let records = h.wait_for_records(1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].response_content, delivered.to_vec());
    assert_eq!(records[0].outcome, StreamOutcome::Complete);
    assert!(records[0].response_duration_ms >= 300);
    assert!(h.state.recorder().drain(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_caller_disconnect_records_partial_body() {
    let h = Harness::with_upstream().await;

    let mut resp = h.client.get(h.url("/v1/endless")).send().await.unwrap();
    let first = resp.chunk().await.unwrap().unwrap();
    assert!(first.starts_with(b"data: 0"));
    drop(resp);

    let records = h.wait_for_records(1).await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.outcome, StreamOutcome::ClientDisconnected);
    assert!(record.response_content.starts_with(b"data: 0\n\n"));
    assert!(!record.response_content.ends_with(b"data: 99\n\n"));
    assert_eq!(record.status_code, 200);
}

#[tokio::test]
async fn test_empty_response_recorded() {
    let h = Harness::with_upstream().await;

    let resp = h.client.get(h.url("/v1/empty")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.bytes().await.unwrap().is_empty());

    let records = h.wait_for_records(1).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].response_content.is_empty());
    assert_eq!(records[0].request_method, "GET");
}

#[tokio::test]
async fn test_upstream_failure_mid_stream_records_partial() {
    let h = Harness::with_upstream().await;

    let resp = h.client.get(h.url("/v1/broken")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    // The caller sees a truncated body
    assert!(resp.bytes().await.is_err());

    let records = h.wait_for_records(1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, StreamOutcome::UpstreamError);
    assert!(b"partial".starts_with(&records[0].response_content));
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors before the response starts
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_route_not_found_returns_404_without_upstream_call() {
    let upstream = spawn_upstream().await;
    let h = Harness::start(&[("v1/echo", format!("http://{upstream}"))]).await;

    let resp = h.client.get(h.url("/v2/echo")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.text().await.unwrap().contains("/v2/echo"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.sink.records().is_empty());
    assert_eq!(h.state.recorder().in_flight(), 0);
}

#[tokio::test]
async fn test_malformed_json_returns_400() {
    let h = Harness::with_upstream().await;

    let resp = h
        .client
        .post(h.url("/v1/echo"))
        .header("content-type", "application/json")
        .body("{\"model\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.sink.records().is_empty());
}

#[tokio::test]
async fn test_unreachable_upstream_returns_502() {
    // Grab a free port, then close it
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = closed.local_addr().unwrap();
    drop(closed);

    let h = Harness::start(&[("", format!("http://{dead_addr}"))]).await;
    let resp = h.client.get(h.url("/v1/anything")).send().await.unwrap();
    assert_eq!(resp.status(), 502);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.sink.records().is_empty());
}

#[tokio::test]
async fn test_unsupported_method_returns_405() {
    let h = Harness::with_upstream().await;
    let resp = h.client.patch(h.url("/v1/echo")).send().await.unwrap();
    assert_eq!(resp.status(), 405);
}
