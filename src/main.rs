//! Report gateway daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!     Report handler
//!         │ run_query(target, statement, params, deadline)
//!         ▼
//!  ┌──────────────┐   ┌────────────────────┐   ┌──────────────────────────┐
//!  │ PoolRegistry │──▶│ ConnectionAcquirer │──▶│ RetryPolicy + TimedExec. │──▶ Remote engine
//!  │ single-flight│   │ ceiling + probe    │   │ deadline + active cancel │
//!  └──────┬───────┘   └────────────────────┘   └──────────────────────────┘
//!         │ snapshots
//!         ▼
//!  ┌──────────────┐        ┌───────────────────────────────┐
//!  │ PoolWatchdog │──exit─▶│ external supervisor restarts  │
//!  └──────────────┘        └───────────────────────────────┘
//! ```
//!
//! The watchdog's process exit is only safe under a supervisor that
//! restarts the process (container orchestrator, systemd, etc.).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use report_gateway::admin::{self, AppState};
use report_gateway::config::load_config;
use report_gateway::health::ProcessExit;
use report_gateway::lifecycle::{wait_for_signal, Gateway, Shutdown};
use report_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "report-gateway")]
#[command(about = "Resilient query execution and pool lifecycle for report workloads", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "REPORT_GATEWAY_CONFIG", default_value = "config/gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "report-gateway starting");
    tracing::info!(
        config = %args.config.display(),
        targets = config.targets.len(),
        admin = %config.admin.bind_address,
        statement_timeout_ms = config.execution.statement_timeout_ms,
        acquire_timeout_ms = config.execution.acquire_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let gateway = Gateway::from_config(&config, Arc::new(ProcessExit))?;
    let shutdown = Shutdown::new();

    let watchdog = tokio::spawn(gateway.watchdog.run(shutdown.subscribe()));

    let listener = TcpListener::bind(&config.admin.bind_address).await?;
    let router = admin::setup_admin_router(
        AppState::new(Arc::clone(&gateway.service)),
        Duration::from_secs(config.admin.request_timeout_secs),
    );
    let server = tokio::spawn(admin::serve(listener, router, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();

    if let Err(e) = watchdog.await {
        tracing::warn!(error = %e, "Watchdog task ended abnormally");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Admin server failed"),
        Err(e) => tracing::warn!(error = %e, "Admin server task ended abnormally"),
    }

    gateway.registry.shutdown(config.execution.drain_timeout()).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
