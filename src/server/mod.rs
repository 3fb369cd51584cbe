//! HTTP surface: run lifecycle API plus the per-run event stream.

pub mod api;
pub mod sse;

use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::cors::CorsLayer;

use crate::controller::RunController;
use crate::events::EventHub;

/// Shared application state.
pub struct AppState {
    pub controller: Arc<RunController>,
    pub hub: Arc<EventHub>,
}

pub type SharedState = Arc<AppState>;

/// Build the full router.
pub fn router(state: SharedState) -> axum::Router {
    api::api_router()
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API, resuming persisted runs first, until ctrl-c.
pub async fn serve(state: SharedState, port: u16) -> Result<()> {
    let resumed = state
        .controller
        .resume_all()
        .await
        .map_err(|e| anyhow::anyhow!("resume failed: {}", e))?;
    if resumed > 0 {
        tracing::info!(resumed, "resumed persisted runs");
    }

    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, "tailor server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("Server error")?;
    Ok(())
}
