// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - config --show: Display effective configuration as TOML
// - config --path: Show config file path
// - config --init: Write a default config file if none exists
// - resolve <path>: Show which upstream a request path routes to
// - logs [--limit N]: Print the most recent stored exchanges

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{Config, StorageBackend, VERSION};
use crate::routing::RouteTable;
use crate::storage;

/// Model Relay - routing reverse proxy for model APIs
#[derive(Parser)]
#[command(name = "model-relay")]
#[command(version = VERSION)]
#[command(about = "Routing reverse proxy for model APIs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Show which upstream a request path would be routed to
    Resolve {
        /// Request path, e.g. /v1/chat/completions
        path: String,
    },

    /// Print the most recent stored exchanges
    Logs {
        /// Number of records to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Handle CLI commands. Returns true if a command was handled (exit after).
pub fn handle_cli() -> Result<bool> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { show, path, init }) => {
            if path {
                handle_config_path()?;
            } else if show {
                handle_config_show()?;
            } else if init {
                handle_config_init()?;
            } else {
                println!("Usage: model-relay config [--show|--path|--init]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --path    Show config file path");
                println!("  --init    Write a default config file if none exists");
            }
            Ok(true)
        }
        Some(Commands::Resolve { path }) => {
            handle_resolve(&path)?;
            Ok(true)
        }
        Some(Commands::Logs { limit }) => {
            handle_logs(limit)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn handle_config_path() -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;
    println!("{}", path.display());
    Ok(())
}

fn handle_config_show() -> Result<()> {
    let config = Config::from_env()?;

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());

    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
    Ok(())
}

fn handle_config_init() -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    std::fs::write(&path, Config::default().to_toml())
        .with_context(|| format!("Failed to write config {}", path.display()))?;

    println!("Created config file: {}", path.display());
    Ok(())
}

fn handle_resolve(path: &str) -> Result<()> {
    let config = Config::from_env()?;
    let table = RouteTable::build(
        config
            .routing
            .routes
            .iter()
            .map(|(pattern, target)| (pattern.as_str(), target.as_str())),
    );

    match table.resolve(path) {
        Some(target) => {
            println!("{path} -> {target}{path}");
            Ok(())
        }
        None => bail!("No route for {path}"),
    }
}

fn handle_logs(limit: usize) -> Result<()> {
    let config = Config::from_env()?;
    if config.storage.backend != StorageBackend::Sqlite {
        bail!(
            "Reading logs requires the sqlite backend (configured: {})",
            config.storage.backend.as_str()
        );
    }

    let records = storage::recent(&config.storage.db_path, limit)?;
    if records.is_empty() {
        println!("No exchanges recorded yet.");
        return Ok(());
    }

    for record in records {
        let time = chrono::DateTime::from_timestamp_millis(record.request_time)
            .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.request_time.to_string());

        println!(
            "{time}  {:<6} {} {}  {}ms  {}B  {}",
            record.request_method,
            record.status_code,
            record.request_url,
            record.response_duration_ms,
            record.response_content.len(),
            record.outcome
        );
    }
    Ok(())
}
