//! Database driver subsystem.
//!
//! # Data Flow
//! ```text
//! TargetConfig (dsn, pool bounds)
//!     → Connector (one per logical target, opens physical connections)
//!     → pool.rs (bounded DbPool: idle set, open/in-use accounting, status)
//!     → PooledConnection (checked out, returned or discarded)
//! ```
//!
//! # Design Decisions
//! - Connections are shared through `Arc` so `cancel()` can run while
//!   `execute()` is still pending on another task
//! - The pool never inspects statements; it only tracks lifecycle
//! - Dropping a `PooledConnection` recycles it; poisoned connections must
//!   be discarded explicitly

pub mod pool;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub use pool::{DbPool, PoolOptions, PoolSnapshot, PoolStatus, PooledConnection};

/// Errors raised by a driver or by the pool it feeds.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("cancel failed: {0}")]
    Cancel(String),

    #[error("connection closed")]
    Closed,

    #[error("unsupported column type `{0}`")]
    Unsupported(String),

    #[error("cannot bind parameter ${index} as `{ty}`: {reason}")]
    Bind {
        index: usize,
        ty: String,
        reason: String,
    },

    #[error("pool status unavailable: {0}")]
    StatusUnavailable(String),

    #[error("timed out waiting for a free connection")]
    QueueTimeout,
}

/// A bind parameter or a decoded cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Column metadata returned alongside rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
}

/// A materialized result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One physical connection to a remote engine.
///
/// Implementations must tolerate `cancel()` and `close()` being called while
/// an `execute()` future from another task is still outstanding or has just
/// been dropped.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run one statement with positional parameters.
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<QueryResult, DriverError>;

    /// Trivial round trip used as a liveness probe.
    async fn ping(&self) -> Result<(), DriverError>;

    /// Out-of-band break of whatever statement is running on this connection.
    async fn cancel(&self) -> Result<(), DriverError>;

    /// Tear down the physical connection.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Opens physical connections for one logical target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError>;
}
