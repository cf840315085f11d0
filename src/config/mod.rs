//! Configuration for the relay
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`$MODEL_RELAY_CONFIG` or ~/.config/model-relay/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! Everything is read once at startup; nothing is reloaded at runtime.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod observability;
mod routing;
mod serialization;


// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use observability::{
    FileLogging, FileStorage, LogRotation, LoggingConfig, StorageBackend, StorageConfig,
};
pub use routing::{parse_model_mapping, Routing, DEFAULT_UPSTREAM};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port used when neither a bind address nor a port is configured
pub const DEFAULT_PORT: u16 = 9191;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "MODEL_RELAY_CONFIG";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the relay to
    pub bind_addr: SocketAddr,

    /// Total time allowed for one upstream exchange, streaming included
    pub request_timeout_secs: u64,

    /// Time allowed to establish an upstream connection
    pub connect_timeout_secs: u64,

    /// Largest inbound request body accepted
    pub max_body_bytes: usize,

    /// Path patterns and model name substitutions
    pub routing: Routing,

    /// Operational logging configuration
    pub logging: LoggingConfig,

    /// Exchange log persistence configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            request_timeout_secs: 300,
            connect_timeout_secs: 10,
            max_body_bytes: 32 * 1024 * 1024,
            routing: Routing::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure; every key is optional
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,

    /// Optional [routes] section: pattern = upstream base URL
    #[serde(default)]
    pub routes: BTreeMap<String, String>,

    /// Optional [model_mapping] section: client model = upstream model
    #[serde(default)]
    pub model_mapping: BTreeMap<String, String>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// Optional [storage] section
    pub storage: Option<FileStorage>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: `$MODEL_RELAY_CONFIG`, else
    /// ~/.config/model-relay/config.toml
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::home_dir().map(|p| p.join(".config").join("model-relay").join("config.toml"))
    }

    /// Load the file config if it exists.
    ///
    /// A missing file means defaults. A file that exists but cannot be read
    /// or parsed is an error: a broken config should fail fast rather than
    /// silently fall back.
    fn load_file_config() -> Result<FileConfig> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config file {}", path.display())),
        }
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn from_env() -> Result<Self> {
        let file = Self::load_file_config()?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file config with an environment lookup.
    ///
    /// The lookup is injected so tests can supply their own environment.
    pub(crate) fn resolve<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Bind address: full address env > port env > file > default
        let bind_addr = if let Some(addr) = env("MODEL_RELAY_BIND") {
            addr.parse()
                .with_context(|| format!("Invalid MODEL_RELAY_BIND address: {addr}"))?
        } else if let Some(port) = env("PROXY_SERVICE_PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PROXY_SERVICE_PORT: {port}"))?;
            SocketAddr::from(([127, 0, 0, 1], port))
        } else if let Some(addr) = file.bind_addr {
            addr.parse()
                .with_context(|| format!("Invalid bind_addr in config file: {addr}"))?
        } else {
            defaults.bind_addr
        };

        let routing = Routing::from_sources(
            file.routes,
            file.model_mapping,
            env("UPSTREAM_BASE_URL"),
            env("MODEL_MAPPING"),
        );
        routing.validate()?;

        let mut storage = StorageConfig::from_file(file.storage);
        if let Some(db_path) = env("MODEL_RELAY_DB") {
            storage.db_path = PathBuf::from(db_path);
        }

        let config = Self {
            bind_addr,
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            connect_timeout_secs: file
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            max_body_bytes: file.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            routing,
            logging: LoggingConfig::from_file(file.logging),
            storage,
        };

        if config.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }

        Ok(config)
    }
}
