//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the registry, query service and watchdog from one config
//! - Wire the watchdog counter into the service's status view
//!
//! # Design Decisions
//! - Pools are not created here; the first query or health check does it
//! - The terminator is injected so tests never exit the process

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::driver::DriverError;
use crate::health::watchdog::{PoolWatchdog, Terminator};
use crate::pool::PoolRegistry;
use crate::query::QueryService;

/// Assembled gateway components, ready to be spawned.
pub struct Gateway {
    pub registry: Arc<PoolRegistry>,
    pub service: Arc<QueryService>,
    pub watchdog: PoolWatchdog,
}

impl Gateway {
    /// Assemble around an already-built registry.
    pub fn assemble(
        config: &GatewayConfig,
        registry: Arc<PoolRegistry>,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        let watchdog = PoolWatchdog::new(registry.clone(), terminator, config.watchdog.clone());
        let service = QueryService::from_config(Arc::clone(&registry), config).with_watchdog(watchdog.handle());

        tracing::info!(
            targets = ?registry.targets(),
            monitored = ?registry.monitored_targets(),
            watchdog_enabled = config.watchdog.enabled,
            "Gateway assembled"
        );

        Self {
            registry,
            service: Arc::new(service),
            watchdog,
        }
    }

    /// Assemble with Postgres-backed pools for every configured target.
    pub fn from_config(config: &GatewayConfig, terminator: Arc<dyn Terminator>) -> Result<Self, DriverError> {
        let registry = Arc::new(PoolRegistry::from_config(config)?);
        Ok(Self::assemble(config, registry, terminator))
    }
}
