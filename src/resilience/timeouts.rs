//! Statement execution under a deadline.
//!
//! # Responsibilities
//! - Race each statement against a deadline scoped to the call
//! - On expiry, poison the lease and return the timeout immediately
//! - Cancel and discard-close the connection on a detached task
//!
//! # Design Decisions
//! - The statement future is dropped the moment the deadline fires, so a
//!   late completion has no effect on program state
//! - Cleanup is fire-and-forget relative to the caller but always finishes
//!   by giving the slot back to the pool; its failures are logged only
//! - A stuck statement occupies a remote worker until it is actively
//!   cancelled, so cancellation is sent even though the caller has moved on

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::driver::{Connection, PooledConnection, QueryResult, Value};
use crate::error::QueryError;
use crate::observability::metrics;
use crate::pool::ConnectionLease;

/// Result of one statement: rows, or a typed failure that says whether the
/// lease was poisoned (see [`QueryError::is_connection_poisoned`]).
pub type ExecutionOutcome = Result<QueryResult, QueryError>;

/// Runs statements with an enforced, actively-cancelling deadline.
#[derive(Debug, Clone)]
pub struct TimedExecutor {
    cancel_timeout: Duration,
    close_timeout: Duration,
}

impl TimedExecutor {
    pub fn new(cancel_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            cancel_timeout,
            close_timeout,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.cancel_timeout(), config.close_timeout())
    }

    /// Execute `statement` on the lease's connection, failing after `deadline`.
    pub async fn execute(
        &self,
        lease: &mut ConnectionLease,
        statement: &str,
        params: &[Value],
        deadline: Duration,
    ) -> ExecutionOutcome {
        let conn = lease.connection()?;
        let start = Instant::now();

        let raced = timeout(deadline, conn.execute(statement, params)).await;
        match raced {
            Ok(Ok(result)) => {
                let elapsed = start.elapsed();
                metrics::record_statement(lease.target(), elapsed, "ok");
                tracing::debug!(
                    target_db = %lease.target(),
                    correlation_id = %lease.correlation_id(),
                    rows = result.row_count(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Statement completed"
                );
                Ok(result)
            }
            Ok(Err(source)) => {
                metrics::record_statement(lease.target(), start.elapsed(), "error");
                tracing::warn!(
                    target_db = %lease.target(),
                    correlation_id = %lease.correlation_id(),
                    error = %source,
                    "Statement failed"
                );
                Err(QueryError::StatementExecution {
                    target: lease.target().to_string(),
                    source,
                })
            }
            Err(_) => {
                metrics::record_statement(lease.target(), start.elapsed(), "timeout");
                metrics::record_statement_timeout(lease.target());
                tracing::error!(
                    target_db = %lease.target(),
                    correlation_id = %lease.correlation_id(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Statement deadline exceeded, cancelling"
                );

                if let Some(pooled) = lease.invalidate() {
                    self.spawn_cleanup(pooled, conn, lease.correlation_id());
                }

                Err(QueryError::StatementTimeout {
                    target: lease.target().to_string(),
                    deadline,
                    connection_poisoned: true,
                })
            }
        }
    }

    /// Cancel, close and discard a timed-out connection off the caller's path.
    ///
    /// The returned handle is never awaited by the query path.
    fn spawn_cleanup(
        &self,
        pooled: PooledConnection,
        conn: Arc<dyn Connection>,
        correlation_id: Uuid,
    ) -> JoinHandle<()> {
        let cancel_timeout = self.cancel_timeout;
        let close_timeout = self.close_timeout;

        tokio::spawn(async move {
            let pool = pooled.pool_alias().to_string();

            match timeout(cancel_timeout, conn.cancel()).await {
                Ok(Ok(())) => {
                    tracing::info!(pool = %pool, correlation_id = %correlation_id, "Statement cancelled")
                }
                Ok(Err(e)) => {
                    tracing::warn!(pool = %pool, correlation_id = %correlation_id, error = %e, "Statement cancel failed")
                }
                Err(_) => {
                    tracing::warn!(pool = %pool, correlation_id = %correlation_id, "Statement cancel timed out")
                }
            }

            match timeout(close_timeout, conn.close()).await {
                Ok(Ok(())) => {
                    tracing::debug!(pool = %pool, correlation_id = %correlation_id, "Poisoned connection closed")
                }
                Ok(Err(e)) => {
                    tracing::warn!(pool = %pool, correlation_id = %correlation_id, error = %e, "Poisoned connection close failed")
                }
                Err(_) => {
                    tracing::warn!(pool = %pool, correlation_id = %correlation_id, "Poisoned connection close timed out")
                }
            }

            pooled.discard();
        })
    }
}
