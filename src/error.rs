//! Error taxonomy surfaced to callers of the query layer.

use std::time::Duration;

use crate::driver::DriverError;

/// Every failure a caller of [`crate::query::QueryService`] can observe.
///
/// Each variant is produced in bounded time; no code path waits past the
/// acquisition ceiling plus the statement deadline plus a cleanup margin.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// Pool could not be built for this target (credentials, reachability).
    #[error("failed to create pool for `{target}`: {source}")]
    PoolCreation {
        target: String,
        #[source]
        source: DriverError,
    },

    /// No connection became available within the acquisition ceiling.
    #[error("pool `{target}` exhausted: no connection within {waited:?}")]
    AcquisitionTimeout { target: String, waited: Duration },

    /// The liveness probe failed; the connection was closed and dropped.
    #[error("connection to `{target}` not active: {reason}")]
    ConnectionUnhealthy { target: String, reason: String },

    /// The statement outlived its deadline and was cancelled.
    #[error("statement on `{target}` exceeded {deadline:?} and was cancelled")]
    StatementTimeout {
        target: String,
        deadline: Duration,
        connection_poisoned: bool,
    },

    /// Driver-level failure unrelated to timing.
    #[error("statement on `{target}` failed: {source}")]
    StatementExecution {
        target: String,
        #[source]
        source: DriverError,
    },

    /// The target name is not one of the configured databases.
    #[error("unknown target `{0}`")]
    UnknownTarget(String),

    /// The lease was poisoned by an earlier statement and cannot run another.
    #[error("lease {correlation_id} on `{target}` was invalidated by an earlier timeout")]
    LeaseInvalidated {
        target: String,
        correlation_id: uuid::Uuid,
    },
}

impl QueryError {
    /// True when the lease behind this failure must never go back to its pool.
    pub fn is_connection_poisoned(&self) -> bool {
        match self {
            QueryError::StatementTimeout {
                connection_poisoned,
                ..
            } => *connection_poisoned,
            QueryError::LeaseInvalidated { .. } => true,
            _ => false,
        }
    }

    /// True when the caller may try again, possibly with a fresh lease.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::AcquisitionTimeout { .. }
                | QueryError::ConnectionUnhealthy { .. }
                | QueryError::StatementTimeout { .. }
                | QueryError::StatementExecution { .. }
        )
    }

    /// Short machine-readable kind, used as a metrics label and in JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::PoolCreation { .. } => "pool_creation",
            QueryError::AcquisitionTimeout { .. } => "acquisition_timeout",
            QueryError::ConnectionUnhealthy { .. } => "connection_unhealthy",
            QueryError::StatementTimeout { .. } => "statement_timeout",
            QueryError::StatementExecution { .. } => "statement_execution",
            QueryError::UnknownTarget(_) => "unknown_target",
            QueryError::LeaseInvalidated { .. } => "lease_invalidated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_poisoned_and_retryable() {
        let err = QueryError::StatementTimeout {
            target: "primary".into(),
            deadline: Duration::from_secs(5),
            connection_poisoned: true,
        };
        assert!(err.is_connection_poisoned());
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "statement_timeout");
    }

    #[test]
    fn pool_creation_is_fatal() {
        let err = QueryError::PoolCreation {
            target: "primary".into(),
            source: DriverError::Connect("refused".into()),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_connection_poisoned());
        assert!(err.to_string().contains("refused"));
    }
}
