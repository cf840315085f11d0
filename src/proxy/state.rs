//! Proxy state shared by all request tasks

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::routing::RouteTable;
use crate::storage::LogSink;

use super::recorder::Recorder;

/// Shared state for the proxy server
///
/// Everything here is either immutable after startup or internally
/// synchronized, so cloning per request is cheap and lock-free.
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for forwarding requests (one connection pool per process)
    pub(super) client: reqwest::Client,
    /// Path pattern -> upstream base URL
    pub(super) routes: Arc<RouteTable<String>>,
    /// Client model -> upstream model
    pub(super) model_mapping: Arc<BTreeMap<String, String>>,
    /// Largest inbound body accepted
    pub(super) max_body_bytes: usize,
    /// Deferred exchange log persistence
    pub(super) recorder: Recorder,
}

impl ProxyState {
    /// Build the shared client and route table from config
    pub fn new(config: &Config, sink: Arc<dyn LogSink>) -> Result<Self> {
        // No default User-Agent: the caller's is forwarded unchanged
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create HTTP client")?;

        let routes = RouteTable::build(
            config
                .routing
                .routes
                .iter()
                .map(|(pattern, target)| (pattern.as_str(), target.clone())),
        );
        if routes.is_empty() {
            bail!("No routes configured");
        }
        tracing::debug!(routes = routes.len(), "Route table built");

        Ok(Self {
            client,
            routes: Arc::new(routes),
            model_mapping: Arc::new(config.routing.model_mapping.clone()),
            max_body_bytes: config.max_body_bytes,
            recorder: Recorder::new(sink),
        })
    }

    /// Handle for waiting on deferred recorders at shutdown
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Upstream a path would be routed to
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.routes.resolve(path).map(String::as_str)
    }
}
