//! Main proxy request handler
//!
//! Resolve the upstream, read and possibly rewrite the body, forward, then
//! stream the upstream response back through a [`CaptureStream`].

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, Method, Request, Response},
};
use serde_json::Value;
use std::collections::BTreeMap;

use super::streaming::CaptureStream;
use crate::proxy::error::ProxyError;
use crate::proxy::helpers::{
    filter_headers, forward_request_header, headers_to_json, relay_response_header, upstream_url,
};
use crate::proxy::recorder::RecordDraft;
use crate::proxy::state::ProxyState;
use crate::proxy::transform::rewrite_model;

/// Request body as it will be sent upstream
#[derive(Debug)]
pub(crate) struct OutboundBody {
    pub bytes: Bytes,
    /// Text stored in the exchange log
    pub logged: String,
    pub is_json: bool,
}

/// Only POST and PUT bodies are JSON documents
fn expects_json(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

/// Validate and rewrite the inbound body.
///
/// POST/PUT bodies must be well-formed JSON; a mapped `model` is substituted
/// and the body re-serialized. Untouched bodies are forwarded byte-for-byte.
pub(crate) fn prepare_body(
    method: &Method,
    body: Bytes,
    model_mapping: &BTreeMap<String, String>,
) -> Result<OutboundBody, ProxyError> {
    if !expects_json(method) {
        return Ok(OutboundBody {
            logged: String::from_utf8_lossy(&body).into_owned(),
            bytes: body,
            is_json: false,
        });
    }

    let mut json: Value =
        serde_json::from_slice(&body).map_err(|e| ProxyError::InvalidJson(e.to_string()))?;

    let Some(rewrite) = rewrite_model(&mut json, model_mapping) else {
        return Ok(OutboundBody {
            logged: String::from_utf8_lossy(&body).into_owned(),
            bytes: body,
            is_json: true,
        });
    };

    tracing::debug!(from = %rewrite.from, to = %rewrite.to, "Rewrote model");
    let logged = json.to_string();
    Ok(OutboundBody {
        bytes: Bytes::from(logged.clone()),
        logged,
        is_json: true,
    })
}

/// Main proxy handler - forwards every routed request
pub(crate) async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();
    let mut draft = RecordDraft::begin(method.as_str());

    // Never build a URL from an absent target
    let target = state
        .resolve(&path)
        .ok_or_else(|| ProxyError::RouteNotFound(path.clone()))?;

    let headers = req.headers().clone();
    let body_bytes = axum::body::to_bytes(req.into_body(), state.max_body_bytes)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;

    let body = prepare_body(&method, body_bytes, &state.model_mapping)?;
    draft.request_body = body.logged;

    let mut forward_headers = filter_headers(&headers, forward_request_header);
    if body.is_json && !forward_headers.contains_key(header::CONTENT_TYPE) {
        forward_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    // Query string is forwarded byte-for-byte, never re-encoded
    let url = upstream_url(target, &path, uri.query())
        .map_err(|e| ProxyError::Upstream(format!("{e:#}")))?;
    let mut forward_req = state
        .client
        .request(method.clone(), url)
        .headers(forward_headers);
    if !body.bytes.is_empty() {
        forward_req = forward_req.body(body.bytes);
    }

    let forward_req = forward_req
        .build()
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    draft.request_url = forward_req.url().to_string();

    tracing::debug!(method = %method, path = %path, upstream = %draft.request_url, "Proxying request");

    // Transport failure before any response: 502, no retry
    let response = state
        .client
        .execute(forward_req)
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let status = response.status();
    draft.status_code = status.as_u16();
    draft.response_headers = headers_to_json(response.headers());
    let relay_headers = filter_headers(response.headers(), relay_response_header);

    let (capture, done) = CaptureStream::new(Box::pin(response.bytes_stream()));

    let mut relayed = Response::builder()
        .status(status)
        .body(Body::from_stream(capture))
        .map_err(|e| ProxyError::ResponseBuild(e.to_string()))?;
    *relayed.headers_mut() = relay_headers;

    state.recorder.defer(draft, done);

    Ok(relayed)
}
