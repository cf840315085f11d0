//! Proxy error types and response handling

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use std::fmt;

/// Errors that end a request before any upstream bytes reach the caller
#[derive(Debug)]
pub(crate) enum ProxyError {
    /// No configured pattern covers the request path
    RouteNotFound(String),
    /// POST/PUT body is not well-formed JSON
    InvalidJson(String),
    /// Inbound body or query could not be read
    BodyRead(String),
    /// Upstream could not be reached or did not answer
    Upstream(String),
    ResponseBuild(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::InvalidJson(_) | ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ResponseBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::RouteNotFound(path) => write!(f, "No upstream route for path {path}"),
            ProxyError::InvalidJson(msg) => write!(f, "Invalid JSON body: {msg}"),
            ProxyError::BodyRead(msg) => write!(f, "Failed to read request: {msg}"),
            ProxyError::Upstream(msg) => write!(f, "Upstream request failed: {msg}"),
            ProxyError::ResponseBuild(msg) => write!(f, "Failed to build response: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Proxy error: {message}");
        } else {
            tracing::warn!(status = status.as_u16(), "Rejected request: {message}");
        }

        Response::builder()
            .status(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(Body::from(message))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}
