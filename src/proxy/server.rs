//! Proxy server setup and initialization

use std::future::Future;

use anyhow::{Context, Result};
use axum::{
    routing::{on, MethodFilter},
    Router,
};
use tokio::net::TcpListener;

use super::handlers::proxy_handler;
use super::state::ProxyState;

/// Methods the relay forwards; anything else gets 405 from the router
const FORWARDED_METHODS: MethodFilter = MethodFilter::GET
    .or(MethodFilter::POST)
    .or(MethodFilter::PUT)
    .or(MethodFilter::DELETE);

/// Build the router: every path, including `/`, goes to the proxy handler
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/", on(FORWARDED_METHODS, proxy_handler))
        .route("/*path", on(FORWARDED_METHODS, proxy_handler))
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: ProxyState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Start the proxy server
pub async fn start_proxy(
    bind_addr: std::net::SocketAddr,
    state: ProxyState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    tracing::info!("Starting proxy on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to address {bind_addr}"))?;

    tracing::info!("Proxy listening on {}", bind_addr);

    serve(listener, state, async move {
        shutdown_rx.await.ok();
    })
    .await?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}
