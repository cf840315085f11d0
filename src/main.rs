// Model Relay - routing reverse proxy for model APIs
//
// Accepts requests on a local address, routes each one by path to an upstream
// base URL, optionally rewrites the `model` field of JSON bodies, streams the
// upstream response back unchanged and records the exchange afterwards.

mod cli;
mod config;
mod logging;
mod proxy;
mod routing;
mod startup;
mod storage;

use std::time::Duration;

use anyhow::Result;
use config::Config;

/// How long shutdown waits for in-flight exchanges to finish recording
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI subcommands first (config, resolve, logs)
    match cli::handle_cli() {
        Ok(true) => return Ok(()),
        Ok(false) => {}
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }

    // Configuration errors are fatal before anything starts listening
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    // Guard must outlive the runtime so file logs are flushed
    let _file_guard = logging::init_tracing(&config.logging);

    let sink = storage::open_sink(&config.storage)?;
    let state = proxy::ProxyState::new(&config, sink.clone())?;
    let recorder = state.recorder().clone();

    startup::print_startup(&config);
    startup::log_startup(&config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let bind_addr = config.bind_addr;
    let mut proxy_handle =
        tokio::spawn(async move { proxy::start_proxy(bind_addr, state, shutdown_rx).await });

    // Run until Ctrl+C, or until the server fails on its own (e.g. bind error)
    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            None
        }
        result = &mut proxy_handle => Some(result),
    };

    let server_result = match early_exit {
        Some(result) => result,
        None => {
            tracing::info!("Shutting down...");
            // If the send fails, the proxy has already stopped
            let _ = shutdown_tx.send(());
            proxy_handle.await
        }
    };

    // Exchanges whose bodies were still streaming get a chance to be recorded
    recorder.drain(DRAIN_TIMEOUT).await;

    if let Err(e) = sink.shutdown() {
        tracing::error!("Storage shutdown error: {:#}", e);
    }

    match server_result {
        Ok(Ok(())) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(e.into()),
    }
}
