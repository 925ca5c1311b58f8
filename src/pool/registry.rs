//! Per-target pool registry.
//!
//! # Responsibilities
//! - Lazily create one pool per logical target on first use
//! - Recreate a pool whose status is draining, closed, or unreadable
//! - Collapse concurrent first use into a single creation
//! - Close every pool on shutdown

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex;

use crate::config::GatewayConfig;
use crate::driver::postgres::PostgresConnector;
use crate::driver::{Connector, DbPool, DriverError, PoolOptions, PoolSnapshot};
use crate::error::QueryError;
use crate::health::watchdog::SaturationSource;

/// Everything needed to build the pool for one logical target.
pub struct TargetSpec {
    pub name: String,
    pub options: PoolOptions,
    pub connector: Arc<dyn Connector>,
    /// Sampled by the watchdog and the health check.
    pub monitored: bool,
}

/// Lazily-initialized home of one target's pool.
struct PoolSlot {
    options: PoolOptions,
    connector: Arc<dyn Connector>,
    monitored: bool,
    current: ArcSwapOption<DbPool>,
    /// Held while a pool is being created so concurrent callers wait for it.
    create_lock: Mutex<()>,
}

impl PoolSlot {
    /// The memoized pool, if it is still able to hand out connections.
    fn usable(&self, target: &str) -> Option<Arc<DbPool>> {
        let pool = self.current.load_full()?;
        match pool.status() {
            Ok(status) if !status.is_terminal() => Some(pool),
            Ok(status) => {
                tracing::warn!(target_db = %target, status = ?status, "Pool no longer active");
                None
            }
            Err(e) => {
                tracing::warn!(target_db = %target, error = %e, "Pool status unavailable, treating as unusable");
                None
            }
        }
    }
}

/// Owns exactly one live pool per configured target.
pub struct PoolRegistry {
    slots: BTreeMap<String, PoolSlot>,
}

impl PoolRegistry {
    pub fn new(targets: Vec<TargetSpec>) -> Self {
        let slots = targets
            .into_iter()
            .map(|spec| {
                let slot = PoolSlot {
                    options: spec.options,
                    connector: spec.connector,
                    monitored: spec.monitored,
                    current: ArcSwapOption::empty(),
                    create_lock: Mutex::new(()),
                };
                (spec.name, slot)
            })
            .collect();
        Self { slots }
    }

    /// Build a registry backed by Postgres connectors for every configured target.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, DriverError> {
        let connect_timeout = config.execution.connect_timeout();
        let mut specs = Vec::with_capacity(config.targets.len());
        for target in &config.targets {
            let connector = PostgresConnector::new(&target.name, &target.dsn, connect_timeout)?;
            specs.push(TargetSpec {
                name: target.name.clone(),
                options: target.pool_options(),
                connector: Arc::new(connector),
                monitored: target.monitored,
            });
        }
        Ok(Self::new(specs))
    }

    /// Names of every configured target, in stable order.
    pub fn targets(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn monitored_targets(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.monitored)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Return the live pool for `target`, creating it if needed.
    ///
    /// Creation failures propagate as [`QueryError::PoolCreation`] and are
    /// not retried; the next call attempts creation again.
    pub async fn acquire_pool(&self, target: &str) -> Result<Arc<DbPool>, QueryError> {
        let slot = self
            .slots
            .get(target)
            .ok_or_else(|| QueryError::UnknownTarget(target.to_string()))?;

        if let Some(pool) = slot.usable(target) {
            return Ok(pool);
        }

        let _creating = slot.create_lock.lock().await;

        // Another caller may have finished creating while we waited.
        if let Some(pool) = slot.usable(target) {
            return Ok(pool);
        }

        if let Some(stale) = slot.current.swap(None) {
            tracing::info!(target_db = %target, "Discarding unusable pool");
            tokio::spawn(async move {
                stale.close(Duration::ZERO).await;
            });
        }

        tracing::info!(
            target_db = %target,
            min = slot.options.min_connections,
            max = slot.options.max_connections,
            "Creating connection pool"
        );
        let pool = DbPool::create(target, slot.options.clone(), Arc::clone(&slot.connector))
            .await
            .map_err(|source| {
                tracing::error!(target_db = %target, error = %source, "Pool creation failed");
                QueryError::PoolCreation {
                    target: target.to_string(),
                    source,
                }
            })?;
        slot.current.store(Some(Arc::clone(&pool)));

        tracing::info!(target_db = %target, "Connection pool ready");
        Ok(pool)
    }

    /// The memoized pool for `target` without creating one.
    pub fn current(&self, target: &str) -> Option<Arc<DbPool>> {
        self.slots.get(target)?.current.load_full()
    }

    /// Snapshots of every pool that currently exists.
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.slots
            .values()
            .filter_map(|slot| slot.current.load_full())
            .map(|pool| pool.snapshot())
            .collect()
    }

    /// Snapshots of monitored pools that currently exist.
    pub fn monitored_snapshots(&self) -> Vec<PoolSnapshot> {
        self.slots
            .values()
            .filter(|slot| slot.monitored)
            .filter_map(|slot| slot.current.load_full())
            .map(|pool| pool.snapshot())
            .collect()
    }

    /// Close every pool, waiting up to `drain_timeout` for outstanding leases.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let closing = self
            .slots
            .values()
            .filter_map(|slot| slot.current.swap(None))
            .map(|pool| async move { pool.close(drain_timeout).await });
        join_all(closing).await;
        tracing::info!("All connection pools closed");
    }
}

#[async_trait]
impl SaturationSource for PoolRegistry {
    async fn sample(&self) -> Vec<PoolSnapshot> {
        self.monitored_snapshots()
    }
}
