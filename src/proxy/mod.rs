// Proxy module - HTTP server that relays requests to the configured upstreams
//
// Each request is routed by path to an upstream base URL, its JSON body may
// have the `model` field substituted, and the upstream response is streamed
// back unchanged. A copy of the streamed bytes is recorded after the response
// finishes, off the response path.

mod error;
mod handlers;
mod helpers;
pub mod recorder;
mod server;
mod state;
pub mod transform;

#[cfg(test)]
mod tests;

pub use server::start_proxy;
pub use state::ProxyState;
