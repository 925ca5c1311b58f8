//! Verified connection checkout.
//!
//! # Responsibilities
//! - Bound the wait for a pooled connection
//! - Probe liveness before handing the connection out
//! - Close and drop connections that fail the probe
//! - Log acquisition latency as the early saturation signal

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::driver::{Connection, DbPool, DriverError, PooledConnection};
use crate::error::QueryError;
use crate::observability::metrics;

/// Leases held longer than this are logged on release.
const LONG_HOLD: Duration = Duration::from_secs(60);

/// One connection checked out for a single logical operation.
///
/// `acquire → execute → release-or-drop` happens exactly once. Statements
/// take `&mut self`, so a lease never runs two statements concurrently.
pub struct ConnectionLease {
    conn: Option<PooledConnection>,
    target: String,
    correlation_id: Uuid,
    acquired_at: Instant,
    invalidated: bool,
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("target", &self.target)
            .field("correlation_id", &self.correlation_id)
            .field("acquired_at", &self.acquired_at)
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}

impl ConnectionLease {
    fn new(target: &str, conn: PooledConnection) -> Self {
        Self {
            conn: Some(conn),
            target: target.to_string(),
            correlation_id: Uuid::new_v4(),
            acquired_at: Instant::now(),
            invalidated: false,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// True once a timeout has poisoned this lease.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// The physical connection, unless the lease was invalidated.
    pub(crate) fn connection(&self) -> Result<Arc<dyn Connection>, QueryError> {
        match &self.conn {
            Some(pooled) if !self.invalidated => Ok(pooled.connection()),
            _ => Err(QueryError::LeaseInvalidated {
                target: self.target.clone(),
                correlation_id: self.correlation_id,
            }),
        }
    }

    /// Poison the lease and hand its connection to the caller for cleanup.
    ///
    /// The returned connection is marked poisoned, so however it is dropped
    /// it never goes back to the idle set.
    pub(crate) fn invalidate(&mut self) -> Option<PooledConnection> {
        self.invalidated = true;
        let mut conn = self.conn.take()?;
        conn.mark_poisoned();
        Some(conn)
    }

    /// Return the connection to its pool. A poisoned lease has nothing to return.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        if let Some(conn) = self.conn.take() {
            if held > LONG_HOLD {
                tracing::warn!(
                    target_db = %self.target,
                    correlation_id = %self.correlation_id,
                    held_ms = held.as_millis() as u64,
                    "Lease held for an extended period"
                );
            }
            tracing::trace!(correlation_id = %self.correlation_id, "Lease released");
            conn.release();
        }
    }
}

/// Turns a pool into a verified lease within a bounded time.
#[derive(Debug, Clone)]
pub struct ConnectionAcquirer {
    ceiling: Duration,
    probe_timeout: Duration,
    close_timeout: Duration,
    slow_threshold: Duration,
}

impl ConnectionAcquirer {
    pub fn new(ceiling: Duration, probe_timeout: Duration, close_timeout: Duration, slow_threshold: Duration) -> Self {
        Self {
            ceiling,
            probe_timeout,
            close_timeout,
            slow_threshold,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            config.acquire_timeout(),
            config.probe_timeout(),
            config.close_timeout(),
            config.slow_acquire_warn(),
        )
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Check out a connection from `pool` and verify it answers.
    pub async fn acquire(&self, pool: &Arc<DbPool>, name: &str) -> Result<ConnectionLease, QueryError> {
        let start = Instant::now();

        let pooled = match timeout(self.ceiling, pool.get()).await {
            Ok(Ok(pooled)) => pooled,
            Ok(Err(DriverError::QueueTimeout)) | Err(_) => {
                let waited = start.elapsed();
                metrics::record_acquire_timeout(name);
                tracing::warn!(
                    target_db = %name,
                    waited_ms = waited.as_millis() as u64,
                    snapshot = ?pool.snapshot(),
                    "Connection acquisition timed out, pool exhausted"
                );
                return Err(QueryError::AcquisitionTimeout {
                    target: name.to_string(),
                    waited,
                });
            }
            Ok(Err(e)) => {
                tracing::error!(target_db = %name, error = %e, "Connection acquisition failed");
                return Err(QueryError::ConnectionUnhealthy {
                    target: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let elapsed = start.elapsed();
        metrics::record_acquire(name, elapsed);
        if elapsed > self.slow_threshold {
            tracing::warn!(
                target_db = %name,
                wait_ms = elapsed.as_millis() as u64,
                "Slow connection acquisition, pool may be saturating"
            );
        } else {
            tracing::debug!(target_db = %name, wait_ms = elapsed.as_millis() as u64, "Connection acquired");
        }

        let conn = pooled.connection();
        let reason = match timeout(self.probe_timeout, conn.ping()).await {
            Ok(Ok(())) => return Ok(ConnectionLease::new(name, pooled)),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("probe timed out after {:?}", self.probe_timeout),
        };

        tracing::error!(
            target_db = %name,
            connection_id = pooled.id(),
            reason = %reason,
            "Connection failed liveness probe, discarding"
        );
        match timeout(self.close_timeout, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(target_db = %name, error = %e, "Close after failed probe errored"),
            Err(_) => tracing::warn!(target_db = %name, "Close after failed probe timed out"),
        }
        pooled.discard();

        Err(QueryError::ConnectionUnhealthy {
            target: name.to_string(),
            reason,
        })
    }
}
