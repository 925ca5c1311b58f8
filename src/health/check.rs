//! On-demand health check across monitored pools.
//!
//! Each target goes through the real acquisition path (bounded checkout plus
//! liveness probe); targets are checked in parallel and the lease is
//! released immediately.

use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::Instant;

use crate::pool::{ConnectionAcquirer, PoolRegistry};

/// Health of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetHealth {
    pub target: String,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate health across targets.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub healthy: bool,
    pub targets: Vec<TargetHealth>,
}

/// Acquire and probe a connection on every monitored target.
pub async fn check_all(registry: &PoolRegistry, acquirer: &ConnectionAcquirer) -> HealthReport {
    let checks = registry
        .monitored_targets()
        .into_iter()
        .map(|target| check_target(registry, acquirer, target));
    let targets = join_all(checks).await;

    let healthy = targets.iter().all(|t| t.healthy);
    HealthReport {
        status: if healthy { "ok" } else { "degraded" },
        healthy,
        targets,
    }
}

async fn check_target(registry: &PoolRegistry, acquirer: &ConnectionAcquirer, target: String) -> TargetHealth {
    let start = Instant::now();
    let result = match registry.acquire_pool(&target).await {
        Ok(pool) => acquirer.acquire(&pool, &target).await.map(|lease| lease.release()),
        Err(e) => Err(e),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => TargetHealth {
            target,
            healthy: true,
            latency_ms,
            error: None,
        },
        Err(e) => {
            tracing::warn!(target_db = %target, error = %e, "Health check failed");
            TargetHealth {
                target,
                healthy: false,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}
