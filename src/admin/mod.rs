//! Operational HTTP surface.
//!
//! # Routes
//! - `GET /health`: acquisition + probe for every monitored target
//! - `GET /debug/pools`: live pool snapshots and the watchdog counter
//! - `GET /status`: version and uptime

pub mod handlers;

use std::time::Duration;

use axum::http::StatusCode;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use self::handlers::*;

pub use self::handlers::AppState;

/// Requests exceeding `request_timeout` are answered with 408.
pub fn setup_admin_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/debug/pools", get(get_pools))
        .route("/status", get(get_status))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin router until the shutdown broadcast fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin server stopped");
    Ok(())
}
