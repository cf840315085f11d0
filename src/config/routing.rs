//! Route and model mapping configuration
//!
//! Routes map a path pattern (see [`crate::routing`]) to an upstream base URL.
//! The model mapping substitutes the `model` field of forwarded JSON bodies.

use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// Upstream used when no route is configured anywhere
pub const DEFAULT_UPSTREAM: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Routing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
    /// Path pattern -> upstream base URL
    pub routes: BTreeMap<String, String>,

    /// Client-facing model name -> upstream model name
    pub model_mapping: BTreeMap<String, String>,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            routes: BTreeMap::from([(String::new(), DEFAULT_UPSTREAM.to_string())]),
            model_mapping: BTreeMap::new(),
        }
    }
}

impl Routing {
    /// Combine file sections with the environment overrides.
    ///
    /// `upstream_env` installs the root route (`""`), replacing any root
    /// route from the file. `mapping_env` entries override file entries with
    /// the same client model.
    pub fn from_sources(
        mut routes: BTreeMap<String, String>,
        mut model_mapping: BTreeMap<String, String>,
        upstream_env: Option<String>,
        mapping_env: Option<String>,
    ) -> Self {
        if let Some(upstream) = upstream_env.filter(|u| !u.trim().is_empty()) {
            // "/" and "" are the same root pattern
            routes.remove("/");
            routes.insert(String::new(), upstream.trim().to_string());
        }

        if routes.is_empty() {
            routes = Self::default().routes;
        }

        if let Some(mapping) = mapping_env {
            model_mapping.extend(parse_model_mapping(&mapping));
        }

        Self {
            routes,
            model_mapping,
        }
    }

    /// Check that every route target is an absolute http(s) URL
    pub fn validate(&self) -> Result<()> {
        for (pattern, target) in &self.routes {
            let url = match reqwest::Url::parse(target) {
                Ok(url) => url,
                Err(e) => bail!("Route {pattern:?} has an invalid upstream URL {target:?}: {e}"),
            };
            if !matches!(url.scheme(), "http" | "https") {
                bail!("Route {pattern:?} upstream {target:?} must use http or https");
            }
        }
        Ok(())
    }
}

/// Parse a `client=upstream,client2=upstream2` mapping string.
///
/// Each pair is split on its first `=`; pairs without one are ignored.
pub fn parse_model_mapping(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(client, upstream)| (client.trim().to_string(), upstream.trim().to_string()))
        .filter(|(client, _)| !client.is_empty())
        .collect()
}
