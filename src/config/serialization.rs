//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;
use std::collections::BTreeMap;

/// Render a string map as `"key" = "value"` lines
fn map_to_toml(map: &BTreeMap<String, String>) -> String {
    let mut output = String::new();
    for (key, value) in map {
        output.push_str(&format!("{:?} = {:?}\n", key, value));
    }
    output
}

impl Config {
    /// Serialize `[model_mapping]`, or a commented example when empty
    fn model_mapping_to_toml(&self) -> String {
        if self.routing.model_mapping.is_empty() {
            return r#"# "qwen" = "qwen-max-latest"
# "gpt-4o" = "qwen-plus"
"#
            .to_string();
        }
        map_to_toml(&self.routing.model_mapping)
    }

    /// Serialize config to TOML string
    pub fn to_toml(&self) -> String {
        format!(
            r#"# model-relay configuration
#
# Environment variables override this file:
#   UPSTREAM_BASE_URL   replaces the root route ("")
#   MODEL_MAPPING       client=upstream,... merged over [model_mapping]
#   PROXY_SERVICE_PORT  port on 127.0.0.1
#   MODEL_RELAY_BIND    full bind address
#   MODEL_RELAY_DB      SQLite database path

# Relay bind address
bind_addr = "{bind}"

# Upstream timeouts
request_timeout_secs = {request_timeout}
connect_timeout_secs = {connect_timeout}

# Largest request body accepted from callers
max_body_bytes = {max_body}

# Path pattern -> upstream base URL
# Segments are literal or "*" (exactly one segment). The deepest match wins;
# "" is the root route and catches everything else.
[routes]
{routes}
# Client model name -> upstream model name
[model_mapping]
{model_mapping}
# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{log_level}"
# JSON file logging (in addition to stdout)
file_enabled = {log_file_enabled}
file_dir = {log_file_dir:?}
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = {log_file_prefix:?}

# Exchange log storage
[storage]
backend = "{backend}"  # sqlite, jsonl, none
db_path = {db_path:?}
log_dir = {log_dir:?}
channel_buffer = {channel_buffer}
batch_size = {batch_size}
flush_interval_secs = {flush_interval}
retention_days = {retention_days}
"#,
            bind = self.bind_addr,
            request_timeout = self.request_timeout_secs,
            connect_timeout = self.connect_timeout_secs,
            max_body = self.max_body_bytes,
            routes = map_to_toml(&self.routing.routes),
            model_mapping = self.model_mapping_to_toml(),
            log_level = self.logging.level,
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = self.logging.file_dir.display().to_string(),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = self.logging.file_prefix,
            backend = self.storage.backend.as_str(),
            db_path = self.storage.db_path.display().to_string(),
            log_dir = self.storage.log_dir.display().to_string(),
            channel_buffer = self.storage.channel_buffer,
            batch_size = self.storage.batch_size,
            flush_interval = self.storage.flush_interval_secs,
            retention_days = self.storage.retention_days,
        )
    }
}
