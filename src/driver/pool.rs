//! Bounded connection pool for one logical target.
//!
//! # Responsibilities
//! - Open `min` connections eagerly, grow by `increment` up to `max`
//! - Queue checkouts behind a pool-level ceiling when saturated
//! - Recycle released connections, forget discarded ones
//! - Expose open/in-use/status for the registry, watchdog and debug paths
//!
//! # State Transitions
//! ```text
//! Active → Draining: close() called
//! Draining → Closed: every lease returned, or drain timeout elapsed
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Connection, Connector, DriverError};

/// Global counter for connection IDs (uniqueness only).
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Sizing and timing options for a pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub min_connections: usize,
    pub max_connections: usize,
    /// Connections opened at once when the pool has to grow.
    pub increment: usize,
    /// How long `get()` waits for a release before giving up.
    pub queue_timeout: Duration,
    /// Idle connections older than this are closed on checkout (down to `min`).
    pub idle_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            increment: 1,
            queue_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Lifecycle status of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Active,
    Draining,
    Closed,
}

impl PoolStatus {
    /// Draining and closed pools never hand out connections again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, PoolStatus::Active)
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub alias: String,
    pub status: PoolStatus,
    pub open: usize,
    pub in_use: usize,
    pub idle: usize,
    /// Slots reserved for connects still in flight; neither idle nor in use.
    pub connecting: usize,
    pub min: usize,
    pub max: usize,
}

impl PoolSnapshot {
    /// In-use connections as a percentage of `max`.
    pub fn saturation(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.in_use >= self.max
    }
}

/// Lifetime counters for a pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolMetrics {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub connections_discarded: u64,
    pub checkouts_successful: u64,
    pub checkouts_failed: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    closed: AtomicU64,
    discarded: AtomicU64,
    checkouts_ok: AtomicU64,
    checkouts_failed: AtomicU64,
}

struct IdleConnection {
    conn: Arc<dyn Connection>,
    id: u64,
    since: Instant,
}

struct PoolState {
    idle: Vec<IdleConnection>,
    /// Physical connections owned by the pool, including ones being opened.
    open: usize,
    /// The part of `open` still waiting on the connector.
    connecting: usize,
    status: PoolStatus,
}

/// A driver-managed set of physical connections for one logical target.
pub struct DbPool {
    alias: String,
    options: PoolOptions,
    connector: Arc<dyn Connector>,
    state: Mutex<PoolState>,
    available: Notify,
    drained: Notify,
    counters: Counters,
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbPool")
            .field("alias", &self.alias)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DbPool {
    /// Create a pool and open its minimum connections.
    ///
    /// Any connection failure during prewarm closes what was opened and
    /// surfaces the driver error; nothing is retried here.
    pub async fn create(
        alias: impl Into<String>,
        options: PoolOptions,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>, DriverError> {
        let alias = alias.into();
        let min = options.min_connections.min(options.max_connections);

        let mut opened: Vec<Arc<dyn Connection>> = Vec::with_capacity(min);
        for _ in 0..min {
            match connector.connect().await {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    for conn in opened {
                        let _ = conn.close().await;
                    }
                    tracing::error!(pool = %alias, error = %e, "Pool prewarm failed");
                    return Err(e);
                }
            }
        }

        let now = Instant::now();
        let idle: Vec<IdleConnection> = opened
            .into_iter()
            .map(|conn| IdleConnection {
                conn,
                id: next_connection_id(),
                since: now,
            })
            .collect();
        let open = idle.len();

        let pool = Arc::new(Self {
            alias,
            options,
            connector,
            state: Mutex::new(PoolState {
                idle,
                open,
                connecting: 0,
                status: PoolStatus::Active,
            }),
            available: Notify::new(),
            drained: Notify::new(),
            counters: Counters::default(),
        });
        pool.counters.created.fetch_add(open as u64, Ordering::Relaxed);

        tracing::info!(
            pool = %pool.alias,
            min = pool.options.min_connections,
            max = pool.options.max_connections,
            increment = pool.options.increment,
            "Connection pool created"
        );
        Ok(pool)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Check out a connection, growing or queueing as needed.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection, DriverError> {
        let deadline = Instant::now() + self.options.queue_timeout;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut stale = Vec::new();
            let grow_by = {
                let mut state = self.lock_state();
                if state.status.is_terminal() {
                    self.counters.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                    return Err(DriverError::Closed);
                }

                while state.open > self.options.min_connections
                    && state
                        .idle
                        .first()
                        .is_some_and(|c| c.since.elapsed() > self.options.idle_timeout)
                {
                    stale.push(state.idle.remove(0));
                    state.open -= 1;
                }

                if let Some(idle) = state.idle.pop() {
                    drop(state);
                    self.close_in_background(stale);
                    self.counters.checkouts_ok.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledConnection::new(Arc::clone(self), idle.conn, idle.id));
                }

                if state.open < self.options.max_connections {
                    let headroom = self.options.max_connections - state.open;
                    let n = self.options.increment.max(1).min(headroom);
                    state.open += n;
                    state.connecting += n;
                    n
                } else {
                    0
                }
            };
            self.close_in_background(stale);

            if grow_by > 0 {
                return self.grow(grow_by).await;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.counters.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(pool = %self.alias, "Pool queue timeout");
                return Err(DriverError::QueueTimeout);
            }
        }
    }

    /// Open `count` reserved slots: one for the caller, the rest parked idle.
    async fn grow(self: &Arc<Self>, count: usize) -> Result<PooledConnection, DriverError> {
        // Releases the reserved slot if this future is dropped mid-connect.
        let mut reservation = Reservation {
            pool: Arc::clone(self),
            count: 1,
        };
        if count > 1 {
            let pool = Arc::clone(self);
            let mut extra = Reservation {
                pool: Arc::clone(self),
                count: count - 1,
            };
            tokio::spawn(async move {
                while extra.count > 0 {
                    match pool.connector.connect().await {
                        Ok(conn) => {
                            extra.count -= 1;
                            pool.counters.created.fetch_add(1, Ordering::Relaxed);
                            pool.park(conn, next_connection_id(), true);
                        }
                        Err(e) => {
                            tracing::warn!(pool = %pool.alias, error = %e, "Pool increment connect failed");
                            break;
                        }
                    }
                }
            });
        }

        match self.connector.connect().await {
            Ok(conn) => {
                reservation.count = 0;
                let mut state = self.lock_state();
                state.connecting = state.connecting.saturating_sub(1);
                drop(state);
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                self.counters.checkouts_ok.fetch_add(1, Ordering::Relaxed);
                Ok(PooledConnection::new(Arc::clone(self), conn, next_connection_id()))
            }
            Err(e) => {
                self.counters.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(pool = %self.alias, error = %e, "Failed to open connection");
                Err(e)
            }
        }
    }

    /// Return a healthy connection to the idle set.
    ///
    /// `reserved` marks a freshly opened connection filling a slot that
    /// `get` set aside for it.
    fn park(&self, conn: Arc<dyn Connection>, id: u64, reserved: bool) {
        let mut state = self.lock_state();
        if reserved {
            state.connecting = state.connecting.saturating_sub(1);
        }
        if state.status.is_terminal() {
            state.open = state.open.saturating_sub(1);
            drop(state);
            self.close_in_background(vec![IdleConnection {
                conn,
                id,
                since: Instant::now(),
            }]);
            self.drained.notify_waiters();
            return;
        }
        state.idle.push(IdleConnection {
            conn,
            id,
            since: Instant::now(),
        });
        drop(state);
        self.available.notify_one();
    }

    /// Drop accounting for `count` connections that will never come back.
    fn forget(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.lock_state();
        state.open = state.open.saturating_sub(count);
        drop(state);
        self.available.notify_one();
        self.drained.notify_waiters();
    }

    /// Give back reserved slots whose connect never completed.
    fn unreserve(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.lock_state();
        state.connecting = state.connecting.saturating_sub(count);
        state.open = state.open.saturating_sub(count);
        drop(state);
        self.available.notify_one();
        self.drained.notify_waiters();
    }

    fn close_in_background(&self, conns: Vec<IdleConnection>) {
        if conns.is_empty() {
            return;
        }
        self.counters
            .closed
            .fetch_add(conns.len() as u64, Ordering::Relaxed);
        let alias = self.alias.clone();
        tokio::spawn(async move {
            for idle in conns {
                if let Err(e) = idle.conn.close().await {
                    tracing::debug!(pool = %alias, connection_id = idle.id, error = %e, "Close failed");
                }
            }
        });
    }

    /// Last known lifecycle status.
    ///
    /// Fails when the pool's internal state can no longer be read, which
    /// callers must treat as unusable.
    pub fn status(&self) -> Result<PoolStatus, DriverError> {
        self.state
            .lock()
            .map(|state| state.status)
            .map_err(|e| DriverError::StatusUnavailable(e.to_string()))
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock_state();
        PoolSnapshot {
            alias: self.alias.clone(),
            status: state.status,
            open: state.open,
            in_use: state
                .open
                .saturating_sub(state.idle.len() + state.connecting),
            idle: state.idle.len(),
            connecting: state.connecting,
            min: self.options.min_connections,
            max: self.options.max_connections,
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.counters.created.load(Ordering::Relaxed),
            connections_closed: self.counters.closed.load(Ordering::Relaxed),
            connections_discarded: self.counters.discarded.load(Ordering::Relaxed),
            checkouts_successful: self.counters.checkouts_ok.load(Ordering::Relaxed),
            checkouts_failed: self.counters.checkouts_failed.load(Ordering::Relaxed),
        }
    }

    /// Drain and close the pool.
    ///
    /// Idle connections close immediately; checked-out ones close as they
    /// come back. After `drain_timeout` the pool is marked closed regardless.
    pub async fn close(&self, drain_timeout: Duration) {
        let idle = {
            let mut state = self.lock_state();
            if state.status == PoolStatus::Closed {
                return;
            }
            state.status = PoolStatus::Draining;
            let idle: Vec<IdleConnection> = state.idle.drain(..).collect();
            state.open = state.open.saturating_sub(idle.len());
            idle
        };
        self.available.notify_waiters();
        tracing::info!(pool = %self.alias, "Connection pool draining");

        for conn in idle {
            if let Err(e) = conn.conn.close().await {
                tracing::debug!(pool = %self.alias, connection_id = conn.id, error = %e, "Close failed");
            }
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
        }

        let deadline = Instant::now() + drain_timeout;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = self.lock_state().open;
            if remaining == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(pool = %self.alias, outstanding = remaining, "Drain timeout, closing with leases outstanding");
                break;
            }
        }

        self.lock_state().status = PoolStatus::Closed;
        tracing::info!(pool = %self.alias, "Connection pool closed");
    }

    fn release(&self, conn: Arc<dyn Connection>, id: u64) {
        tracing::trace!(pool = %self.alias, connection_id = id, "Returning connection to pool");
        self.park(conn, id, false);
    }

    fn discard(&self, id: u64) {
        tracing::debug!(pool = %self.alias, connection_id = id, "Discarding connection");
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        self.forget(1);
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_connection_id() -> u64 {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Open-count slots reserved for connections still being established.
struct Reservation {
    pool: Arc<DbPool>,
    count: usize,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pool.unreserve(self.count);
    }
}

/// A connection checked out of a [`DbPool`].
///
/// Dropping it returns the connection to the pool, unless it was marked
/// poisoned, in which case the slot is forgotten and the connection is
/// never recycled.
pub struct PooledConnection {
    pool: Arc<DbPool>,
    conn: Arc<dyn Connection>,
    id: u64,
    poisoned: bool,
}

impl PooledConnection {
    fn new(pool: Arc<DbPool>, conn: Arc<dyn Connection>, id: u64) -> Self {
        Self {
            pool,
            conn,
            id,
            poisoned: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool_alias(&self) -> &str {
        self.pool.alias()
    }

    /// Shared handle to the physical connection.
    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.conn)
    }

    /// Never return this connection to the pool.
    pub fn mark_poisoned(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Give the connection back for reuse.
    pub fn release(self) {
        drop(self);
    }

    /// Forget the connection; the caller is responsible for closing it.
    pub fn discard(mut self) {
        self.poisoned = true;
        drop(self);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.poisoned {
            self.pool.discard(self.id);
        } else {
            self.pool.release(Arc::clone(&self.conn), self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{QueryResult, Value};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn execute(&self, _: &str, _: &[Value]) -> Result<QueryResult, DriverError> {
            Ok(QueryResult::default())
        }
        async fn ping(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn cancel(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullConnection))
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError> {
            Err(DriverError::Connect("bad credentials".into()))
        }
    }

    struct SlowConnector {
        delay: Duration,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError> {
            tokio::time::sleep(self.delay).await;
            Ok(Arc::new(NullConnection))
        }
    }

    fn options(min: usize, max: usize) -> PoolOptions {
        PoolOptions {
            min_connections: min,
            max_connections: max,
            increment: 1,
            queue_timeout: Duration::from_millis(50),
            idle_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn snapshot_saturation() {
        let snapshot = PoolSnapshot {
            alias: "primary".into(),
            status: PoolStatus::Active,
            open: 10,
            in_use: 5,
            idle: 5,
            connecting: 0,
            min: 2,
            max: 20,
        };
        assert!((snapshot.saturation() - 25.0).abs() < f64::EPSILON);
        assert!(!snapshot.is_exhausted());

        let full = PoolSnapshot { in_use: 20, ..snapshot };
        assert!(full.is_exhausted());
    }

    #[tokio::test]
    async fn prewarms_min_connections() {
        let connector = Arc::new(CountingConnector::default());
        let pool = DbPool::create("primary", options(2, 4), connector.clone())
            .await
            .unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.open, 2);
        assert_eq!(snapshot.idle, 2);
        assert_eq!(snapshot.in_use, 0);
    }

    #[tokio::test]
    async fn create_propagates_connect_failure() {
        let result = DbPool::create("primary", options(1, 4), Arc::new(RefusingConnector)).await;
        assert!(matches!(result, Err(DriverError::Connect(_))));
    }

    #[tokio::test]
    async fn release_recycles_and_discard_forgets() {
        let connector = Arc::new(CountingConnector::default());
        let pool = DbPool::create("primary", options(0, 2), connector.clone())
            .await
            .unwrap();

        let first = pool.get().await.unwrap();
        let second = pool.get().await.unwrap();
        assert_eq!(pool.snapshot().in_use, 2);

        first.release();
        assert_eq!(pool.snapshot().idle, 1);

        second.discard();
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.open, 1);
        assert_eq!(snapshot.in_use, 0);
        assert_eq!(pool.metrics().connections_discarded, 1);
    }

    #[tokio::test]
    async fn queue_timeout_when_saturated() {
        let pool = DbPool::create("primary", options(0, 1), Arc::new(CountingConnector::default()))
            .await
            .unwrap();
        let _held = pool.get().await.unwrap();

        let result = pool.get().await;
        assert!(matches!(result, Err(DriverError::QueueTimeout)));
        assert_eq!(pool.metrics().checkouts_failed, 1);
    }

    #[tokio::test]
    async fn waiter_wakes_on_release() {
        let pool = DbPool::create("primary", options(0, 1), Arc::new(CountingConnector::default()))
            .await
            .unwrap();
        let held = pool.get().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get().await.map(|c| c.id()) })
        };
        tokio::task::yield_now().await;
        let id = held.id();
        held.release();

        assert_eq!(waiter.await.unwrap().unwrap(), id);
    }

    #[tokio::test]
    async fn close_drains_to_closed() {
        let pool = DbPool::create("primary", options(2, 4), Arc::new(CountingConnector::default()))
            .await
            .unwrap();
        let held = pool.get().await.unwrap();

        let closer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.close(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(pool.status().unwrap(), PoolStatus::Draining);
        assert!(matches!(pool.get().await, Err(DriverError::Closed)));

        held.release();
        closer.await.unwrap();
        assert_eq!(pool.status().unwrap(), PoolStatus::Closed);
        assert_eq!(pool.snapshot().open, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_connects_are_not_counted_as_in_use() {
        let connector = Arc::new(SlowConnector {
            delay: Duration::from_secs(2),
        });
        let mut opts = options(0, 4);
        opts.increment = 2;
        opts.queue_timeout = Duration::from_secs(10);
        let pool = DbPool::create("primary", opts, connector).await.unwrap();

        let checkout = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.open, 2);
        assert_eq!(snapshot.connecting, 2);
        assert_eq!(snapshot.in_use, 0);
        assert_eq!(snapshot.idle, 0);

        let held = checkout.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.connecting, 0);
        assert_eq!(snapshot.in_use, 1);
        assert_eq!(snapshot.idle, 1);
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_connect_returns_its_reservation() {
        let connector = Arc::new(SlowConnector {
            delay: Duration::from_secs(5),
        });
        let pool = DbPool::create("primary", options(0, 2), connector).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pool.get()).await;
        assert!(result.is_err());

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.open, 0);
        assert_eq!(snapshot.connecting, 0);
        assert_eq!(snapshot.in_use, 0);
    }
}
