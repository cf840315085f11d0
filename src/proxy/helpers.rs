//! Header filtering and URL helpers for request/response relaying

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use reqwest::Url;

/// Inbound headers never sent upstream.
///
/// The client's addressing headers describe the hop to the relay, and the
/// body may be re-serialized, so its framing headers are recomputed. The HTTP
/// client negotiates its own `accept-encoding` so every response it relays
/// arrives decoded.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "accept-encoding",
    "x-forwarded-for",
    "x-real-ip",
    "connection",
    "transfer-encoding",
];

/// Upstream headers never relayed to the caller.
///
/// The body is re-framed and already decompressed by the HTTP client.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "content-encoding",
    "alt-svc",
    "transfer-encoding",
    "connection",
    "keep-alive",
];

/// Check if an inbound header should be forwarded upstream
pub(crate) fn forward_request_header(name: &str) -> bool {
    !STRIPPED_REQUEST_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Check if an upstream response header should be relayed to the caller
pub(crate) fn relay_response_header(name: &str) -> bool {
    !STRIPPED_RESPONSE_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy the headers that pass `keep` into a new map, preserving repeats
pub(crate) fn filter_headers(headers: &HeaderMap, keep: fn(&str) -> bool) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if keep(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Serialize headers as a JSON object; repeated headers are joined with ", "
pub(crate) fn headers_to_json(headers: &HeaderMap) -> String {
    let mut map = serde_json::Map::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match map.get_mut(name.as_str()) {
            Some(serde_json::Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                map.insert(name.as_str().to_string(), serde_json::Value::String(value));
            }
        }
    }
    serde_json::Value::Object(map).to_string()
}

/// Upstream URL: the target base followed by the request path.
///
/// The caller's query is set as the URL's raw query component, so its bytes
/// reach the upstream unchanged.
pub(crate) fn upstream_url(target: &str, path: &str, query: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(&format!("{target}{path}"))
        .with_context(|| format!("Invalid upstream URL {target}{path}"))?;
    if query.is_some() {
        url.set_query(query);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_header_filter() {
        for name in [
            "Host",
            "content-length",
            "X-Forwarded-For",
            "x-real-ip",
            "Connection",
            "Accept-Encoding",
        ] {
            assert!(!forward_request_header(name), "{name} should be stripped");
        }
        for name in ["authorization", "content-type", "accept", "x-request-id"] {
            assert!(forward_request_header(name), "{name} should be forwarded");
        }
    }

    #[test]
    fn test_response_header_filter() {
        for name in ["content-length", "Content-Encoding", "alt-svc", "transfer-encoding"] {
            assert!(!relay_response_header(name), "{name} should be stripped");
        }
        for name in ["content-type", "x-request-id", "set-cookie", "cache-control"] {
            assert!(relay_response_header(name), "{name} should be relayed");
        }
    }

    #[test]
    fn test_filter_headers_keeps_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-length", HeaderValue::from_static("10"));

        let filtered = filter_headers(&headers, relay_response_header);
        assert_eq!(filtered.get_all("set-cookie").iter().count(), 2);
        assert!(filtered.get("content-length").is_none());
    }

    #[test]
    fn test_headers_to_json() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("vary", HeaderValue::from_static("origin"));
        headers.append("vary", HeaderValue::from_static("accept"));

        let json: serde_json::Value = serde_json::from_str(&headers_to_json(&headers)).unwrap();
        assert_eq!(json["content-type"], "application/json");
        assert_eq!(json["vary"], "origin, accept");
    }

    #[test]
    fn test_upstream_url_appends_path_verbatim() {
        assert_eq!(
            upstream_url("https://api.example.com/v1", "/chat/completions", None)
                .unwrap()
                .as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            upstream_url("http://up", "/a%20b", None).unwrap().as_str(),
            "http://up/a%20b"
        );
    }

    #[test]
    fn test_upstream_url_keeps_query_bytes() {
        let url = upstream_url("http://up", "/v1/models", Some("flag&q=a%20b&r=+")).unwrap();
        assert_eq!(url.as_str(), "http://up/v1/models?flag&q=a%20b&r=+");
        assert_eq!(url.query(), Some("flag&q=a%20b&r=+"));
    }

    #[test]
    fn test_upstream_url_rejects_unparseable_target() {
        assert!(upstream_url("not a url", "/v1", None).is_err());
    }
}
