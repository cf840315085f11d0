//! Observability configuration: operational logging and exchange log storage
//!
//! - Logging: level, file output, rotation
//! - Storage: where finished exchange records are persisted

use serde::Deserialize;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Log Rotation
// ─────────────────────────────────────────────────────────────────────────────

/// Log file rotation strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LogRotation {
    Hourly,
    /// Rotate log files daily (default)
    #[default]
    Daily,
    /// Single log file
    Never,
}

impl LogRotation {
    /// Parse rotation string from config, falling back to daily
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "never" => Self::Never,
            _ => Self::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Never => "never",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter: trace, debug, info, warn, error
    pub level: String,
    /// Also write JSON logs to rolling files
    pub file_enabled: bool,
    pub file_dir: PathBuf,
    pub file_rotation: LogRotation,
    /// Prefix for log file names ("model-relay" -> "model-relay.2024-01-15")
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            file_dir: PathBuf::from("./logs/trace"),
            file_rotation: LogRotation::Daily,
            file_prefix: "model-relay".to_string(),
        }
    }
}

/// Logging settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileLogging {
    pub level: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_rotation: Option<String>,
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    /// Create from file config with defaults
    pub fn from_file(file: Option<FileLogging>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            level: file.level.unwrap_or(defaults.level),
            file_enabled: file.file_enabled.unwrap_or(defaults.file_enabled),
            file_dir: file
                .file_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.file_dir),
            file_rotation: file
                .file_rotation
                .map(|s| LogRotation::parse(&s))
                .unwrap_or(defaults.file_rotation),
            file_prefix: file.file_prefix.unwrap_or(defaults.file_prefix),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where exchange records end up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageBackend {
    /// SQLite database (default)
    #[default]
    Sqlite,
    /// Append-only JSON lines files
    Jsonl,
    /// Records are discarded
    None,
}

impl StorageBackend {
    /// Parse backend string from config, falling back to sqlite
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "jsonl" => Self::Jsonl,
            "none" | "off" | "disabled" => Self::None,
            _ => Self::Sqlite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Jsonl => "jsonl",
            Self::None => "none",
        }
    }
}

/// Exchange log storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite database file (sqlite backend)
    pub db_path: PathBuf,
    /// Directory for `.jsonl` files (jsonl backend)
    pub log_dir: PathBuf,
    /// Channel buffer size (backpressure threshold)
    pub channel_buffer: usize,
    /// Batch size before flush
    pub batch_size: usize,
    /// Maximum time before flush (seconds)
    pub flush_interval_secs: u64,
    /// Retention period in days (0 = forever)
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_path: PathBuf::from("./data/proxy_logs.db"),
            log_dir: PathBuf::from("./logs/exchanges"),
            channel_buffer: 10_000,
            batch_size: 100,
            flush_interval_secs: 1,
            retention_days: 30,
        }
    }
}

/// Storage config as loaded from file
#[derive(Debug, Deserialize, Default)]
pub struct FileStorage {
    pub backend: Option<String>,
    pub db_path: Option<String>,
    pub log_dir: Option<String>,
    pub channel_buffer: Option<usize>,
    pub batch_size: Option<usize>,
    pub flush_interval_secs: Option<u64>,
    pub retention_days: Option<u32>,
}

impl StorageConfig {
    /// Create from file config with defaults
    pub fn from_file(file: Option<FileStorage>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            backend: file
                .backend
                .map(|s| StorageBackend::parse(&s))
                .unwrap_or(defaults.backend),
            db_path: file.db_path.map(PathBuf::from).unwrap_or(defaults.db_path),
            log_dir: file.log_dir.map(PathBuf::from).unwrap_or(defaults.log_dir),
            // Zero would make the writer channel a rendezvous; keep at least one slot
            channel_buffer: file
                .channel_buffer
                .unwrap_or(defaults.channel_buffer)
                .max(1),
            batch_size: file.batch_size.unwrap_or(defaults.batch_size).max(1),
            flush_interval_secs: file
                .flush_interval_secs
                .unwrap_or(defaults.flush_interval_secs),
            retention_days: file.retention_days.unwrap_or(defaults.retention_days),
        }
    }
}
