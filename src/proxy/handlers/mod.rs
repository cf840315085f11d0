//! Request handling for the proxy
//!
//! `proxy_handler` forwards a request; the streaming module relays and
//! captures the upstream response body.

mod request;
mod streaming;

pub(crate) use request::proxy_handler;
pub(crate) use streaming::Capture;
