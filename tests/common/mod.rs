//! Shared utilities for integration tests.
//!
//! `FakeBackend` stands in for a remote engine: every connection it hands
//! out follows the backend's current behavior and reports calls back to it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use report_gateway::driver::{
    ColumnMeta, Connection, Connector, DriverError, PoolOptions, QueryResult, Value,
};
use report_gateway::pool::{ConnectionAcquirer, PoolRegistry, TargetSpec};
use report_gateway::query::QueryService;
use report_gateway::resilience::{RetryPolicy, TimedExecutor};

/// How `execute` responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Return one row immediately.
    Rows,
    /// Never finish until cancelled.
    Hang,
    /// Fail with a driver error.
    Fail,
    /// Fail `n` times, then return rows.
    FailTimes(usize),
}

pub struct FakeBackend {
    behavior: Mutex<Behavior>,
    ping_fails: AtomicBool,
    connect_fails: AtomicBool,
    connect_delay: Mutex<Duration>,
    cancel_hangs: AtomicBool,
    close_hangs: AtomicBool,
    pub connects: AtomicUsize,
    pub executes: AtomicUsize,
    pub cancels: AtomicUsize,
    pub closes: AtomicUsize,
    pub pings: AtomicUsize,
    execute_times: Mutex<Vec<Instant>>,
}

impl FakeBackend {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            ping_fails: AtomicBool::new(false),
            connect_fails: AtomicBool::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            cancel_hangs: AtomicBool::new(false),
            close_hangs: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            executes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            execute_times: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_connect_fails(&self, fails: bool) {
        self.connect_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// Make `cancel` hang forever, like a cancel request to a dead server.
    pub fn set_cancel_hangs(&self, hangs: bool) {
        self.cancel_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn set_close_hangs(&self, hangs: bool) {
        self.close_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn execute_times(&self) -> Vec<Instant> {
        self.execute_times.lock().unwrap().clone()
    }

    /// Decide the outcome of one execute call.
    fn next_behavior(&self) -> Behavior {
        let mut behavior = self.behavior.lock().unwrap();
        match *behavior {
            Behavior::FailTimes(0) => Behavior::Rows,
            Behavior::FailTimes(n) => {
                *behavior = Behavior::FailTimes(n - 1);
                Behavior::Fail
            }
            other => other,
        }
    }
}

pub struct FakeConnector {
    backend: Arc<FakeBackend>,
}

impl FakeConnector {
    pub fn new(backend: &Arc<FakeBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend: Arc::clone(backend),
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn Connection>, DriverError> {
        let delay = *self.backend.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.backend.connect_fails.load(Ordering::SeqCst) {
            return Err(DriverError::Connect("password authentication failed".into()));
        }
        self.backend.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeConnection {
            backend: Arc::clone(&self.backend),
            cancelled: Notify::new(),
        }))
    }
}

pub struct FakeConnection {
    backend: Arc<FakeBackend>,
    cancelled: Notify,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(&self, _statement: &str, _params: &[Value]) -> Result<QueryResult, DriverError> {
        self.backend.executes.fetch_add(1, Ordering::SeqCst);
        self.backend.execute_times.lock().unwrap().push(Instant::now());

        match self.backend.next_behavior() {
            Behavior::Rows | Behavior::FailTimes(_) => Ok(QueryResult {
                columns: vec![ColumnMeta {
                    name: "total".into(),
                    type_name: "int8".into(),
                }],
                rows: vec![vec![Value::Int(42)]],
            }),
            Behavior::Fail => Err(DriverError::Query("relation \"sales\" does not exist".into())),
            Behavior::Hang => {
                self.cancelled.notified().await;
                Err(DriverError::Query("canceling statement due to user request".into()))
            }
        }
    }

    async fn ping(&self) -> Result<(), DriverError> {
        self.backend.pings.fetch_add(1, Ordering::SeqCst);
        if self.backend.ping_fails.load(Ordering::SeqCst) {
            return Err(DriverError::Query("server closed the connection unexpectedly".into()));
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<(), DriverError> {
        self.backend.cancels.fetch_add(1, Ordering::SeqCst);
        if self.backend.cancel_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.cancelled.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.backend.closes.fetch_add(1, Ordering::SeqCst);
        if self.backend.close_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

pub fn pool_options(min: usize, max: usize) -> PoolOptions {
    PoolOptions {
        min_connections: min,
        max_connections: max,
        increment: 1,
        queue_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(60),
    }
}

/// Registry with one monitored target named `reports`.
pub fn registry(backend: &Arc<FakeBackend>, options: PoolOptions) -> Arc<PoolRegistry> {
    Arc::new(PoolRegistry::new(vec![TargetSpec {
        name: "reports".into(),
        options,
        connector: FakeConnector::new(backend),
        monitored: true,
    }]))
}

/// Acquirer with a 12s ceiling, 5s probe, 3s close, 1s slow threshold.
pub fn acquirer() -> ConnectionAcquirer {
    ConnectionAcquirer::new(
        Duration::from_secs(12),
        Duration::from_secs(5),
        Duration::from_secs(3),
        Duration::from_secs(1),
    )
}

pub fn executor() -> TimedExecutor {
    TimedExecutor::new(Duration::from_secs(3), Duration::from_secs(3))
}

pub fn retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1000), Duration::from_secs(10))
}

pub fn service(registry: &Arc<PoolRegistry>, max_attempts: u32) -> QueryService {
    QueryService::new(
        Arc::clone(registry),
        acquirer(),
        executor(),
        retry(max_attempts),
        Duration::from_secs(30),
        Duration::from_secs(60),
    )
}

/// Let detached cleanup tasks run to completion.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}
