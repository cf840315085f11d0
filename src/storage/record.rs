//! Exchange log record
//!
//! One record per relayed request. The proxy fills it in as the exchange
//! progresses and hands it to a [`super::LogSink`] once the response body has
//! finished; from then on the sink owns it.

use serde::{Serialize, Serializer};
use std::fmt;

/// How the caller-facing response body ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    /// Upstream body was relayed to the end
    Complete,
    /// Upstream failed mid-body; the caller saw a truncated response
    UpstreamError,
    /// Caller went away before the body finished
    ClientDisconnected,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::UpstreamError => "upstream_error",
            Self::ClientDisconnected => "client_disconnected",
        }
    }

    /// Parse a stored outcome; unknown strings read as `Complete`
    pub fn parse(s: &str) -> Self {
        match s {
            "upstream_error" => Self::UpstreamError,
            "client_disconnected" => Self::ClientDisconnected,
            _ => Self::Complete,
        }
    }
}

impl fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response bodies are arbitrary bytes; text stores get a lossy UTF-8 view
fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// A finished request/response exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Full upstream URL the request was sent to, query included
    pub request_url: String,
    pub request_method: String,
    /// Request start, milliseconds since the Unix epoch
    pub request_time: i64,
    /// Time from request start until the response body ended
    pub response_duration_ms: u64,
    pub status_code: u16,
    /// Forwarded request body as JSON text (after model rewrite), empty when none
    pub request_body: String,
    /// Upstream response headers as a JSON object
    pub response_headers: String,
    /// Bytes delivered to the caller, in order
    #[serde(serialize_with = "lossy_utf8")]
    pub response_content: Vec<u8>,
    pub outcome: StreamOutcome,
}
