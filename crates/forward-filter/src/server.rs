//! Axum HTTP server: router, listener, graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::filter::{forward_filter, ForwardFilter};
use crate::upstream::Upstream;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub filter: Arc<ForwardFilter>,
    pub upstream: Upstream,
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> anyhow::Result<Self> {
        Ok(Self {
            filter: Arc::new(ForwardFilter::new(config.filter.clone())?),
            upstream: Upstream::new(&config.upstream)?,
        })
    }
}

/// Every path goes through the filter to the upstream, except `/health`.
pub fn router(state: AppState) -> Router {
    let filter = state.filter.clone();

    Router::new()
        .fallback(handle_upstream)
        .layer(axum::middleware::from_fn_with_state(filter, forward_filter))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Build and run the HTTP server.
pub async fn run(listen_address: &str, state: AppState) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    tracing::info!(address = %listen_address, "forward-filter listening");

    // Peer addresses feed X-Forwarded-For.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("forward-filter shut down gracefully");
    Ok(())
}

async fn handle_upstream(State(state): State<Arc<AppState>>, request: Request) -> Response {
    state.upstream.forward(request).await
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
