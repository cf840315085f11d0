// Startup module - displays the banner with the effective routing setup
//
// Shows version, config source, the route table and model mapping, and
// where exchange logs go, before the proxy starts accepting connections.

use crate::config::{Config, StorageBackend, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Routes as displayed: the root pattern is shown as `/`
fn display_pattern(pattern: &str) -> String {
    format!("/{}", pattern.trim_start_matches('/'))
}

/// Where exchange logs are persisted, if anywhere
fn storage_summary(config: &Config) -> String {
    match config.storage.backend {
        StorageBackend::Sqlite => format!("sqlite {}", config.storage.db_path.display()),
        StorageBackend::Jsonl => format!("jsonl {}", config.storage.log_dir.display()),
        StorageBackend::None => "disabled".to_string(),
    }
}

/// Print the startup banner to stdout
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}Model Relay{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Routing reverse proxy for model APIs{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}+{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    println!("  {DIM}Routes{RESET}");
    for (pattern, target) in &config.routing.routes {
        println!("    {:<24} {DIM}->{RESET} {}", display_pattern(pattern), target);
    }

    if !config.routing.model_mapping.is_empty() {
        println!();
        println!("  {DIM}Model mapping{RESET}");
        for (from, to) in &config.routing.model_mapping {
            println!("    {:<24} {DIM}->{RESET} {}", from, to);
        }
    }

    println!();
    println!("  {DIM}Exchange logs:{RESET} {}", storage_summary(config));
    println!(
        "  {MAGENTA}>{RESET} Proxy listening on {BOLD}{}{RESET}",
        config.bind_addr
    );
    println!();
}

/// Emit the same information through tracing, for file logs
pub fn log_startup(config: &Config) {
    tracing::info!(version = VERSION, "Model Relay starting");

    for (pattern, target) in &config.routing.routes {
        tracing::info!(pattern = %display_pattern(pattern), target = %target, "Route");
    }
    for (from, to) in &config.routing.model_mapping {
        tracing::info!(from = %from, to = %to, "Model mapping");
    }

    tracing::info!(
        storage = %storage_summary(config),
        bind = %config.bind_addr,
        "Ready"
    );
}
