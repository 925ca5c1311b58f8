//! Query facade used by report handlers.
//!
//! Ties the registry, acquirer, retry policy and timed executor together so
//! a caller only names a target, a statement and an optional deadline.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::GatewayConfig;
use crate::driver::pool::PoolMetrics;
use crate::driver::{PoolSnapshot, QueryResult, Value};
use crate::error::QueryError;
use crate::health::check::{check_all, HealthReport};
use crate::health::watchdog::{WatchdogHandle, WatchdogStatus};
use crate::pool::{ConnectionAcquirer, PoolRegistry};
use crate::resilience::{RetryPolicy, TimedExecutor};

/// One pool's entry in the debug status.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatusEntry {
    #[serde(flatten)]
    pub snapshot: PoolSnapshot,
    pub saturation_pct: f64,
    pub metrics: PoolMetrics,
}

/// Live pool saturation and watchdog state.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub pools: Vec<PoolStatusEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchdog: Option<WatchdogStatus>,
}

/// Entry point for running statements against logical targets.
pub struct QueryService {
    registry: Arc<PoolRegistry>,
    acquirer: ConnectionAcquirer,
    executor: TimedExecutor,
    retry: RetryPolicy,
    default_deadline: Duration,
    batch_deadline: Duration,
    watchdog: Option<WatchdogHandle>,
}

impl QueryService {
    pub fn new(
        registry: Arc<PoolRegistry>,
        acquirer: ConnectionAcquirer,
        executor: TimedExecutor,
        retry: RetryPolicy,
        default_deadline: Duration,
        batch_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            acquirer,
            executor,
            retry,
            default_deadline,
            batch_deadline,
            watchdog: None,
        }
    }

    pub fn from_config(registry: Arc<PoolRegistry>, config: &GatewayConfig) -> Self {
        Self::new(
            registry,
            ConnectionAcquirer::from_config(&config.execution),
            TimedExecutor::from_config(&config.execution),
            RetryPolicy::from_config(&config.retries),
            config.execution.statement_timeout(),
            config.execution.batch_statement_timeout(),
        )
    }

    /// Attach the watchdog so status reports include its counter.
    pub fn with_watchdog(mut self, handle: WatchdogHandle) -> Self {
        self.watchdog = Some(handle);
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Run one statement. `deadline` overrides the interactive default.
    pub async fn run_query(
        &self,
        target: &str,
        statement: &str,
        params: &[Value],
        deadline: Option<Duration>,
    ) -> Result<QueryResult, QueryError> {
        let deadline = deadline.unwrap_or(self.default_deadline);

        let pool = self.registry.acquire_pool(target).await?;
        let mut lease = self.acquirer.acquire(&pool, target).await?;

        let outcome = self
            .retry
            .execute_with_retry(&self.executor, &mut lease, statement, params, deadline)
            .await;

        // No-op for a poisoned lease; its connection is already being discarded.
        lease.release();
        outcome
    }

    /// Run a long batch report under the batch deadline.
    pub async fn run_report(
        &self,
        target: &str,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, QueryError> {
        self.run_query(target, statement, params, Some(self.batch_deadline))
            .await
    }

    /// Snapshot of the target's pool, creating the pool if needed.
    pub async fn pool_snapshot(&self, target: &str) -> Result<PoolSnapshot, QueryError> {
        Ok(self.registry.acquire_pool(target).await?.snapshot())
    }

    pub async fn health_check(&self) -> HealthReport {
        check_all(&self.registry, &self.acquirer).await
    }

    pub fn status(&self) -> GatewayStatus {
        let pools = self
            .registry
            .targets()
            .iter()
            .filter_map(|target| self.registry.current(target))
            .map(|pool| {
                let snapshot = pool.snapshot();
                PoolStatusEntry {
                    saturation_pct: snapshot.saturation(),
                    snapshot,
                    metrics: pool.metrics(),
                }
            })
            .collect();

        GatewayStatus {
            pools,
            watchdog: self.watchdog.as_ref().map(WatchdogHandle::status),
        }
    }
}
