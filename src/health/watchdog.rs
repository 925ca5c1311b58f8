//! Pool exhaustion watchdog.
//!
//! # States
//! - Normal: last sample showed no exhausted pool
//! - Degraded: one or more consecutive samples showed an exhausted pool
//!
//! # State Transitions
//! ```text
//! Normal → Degraded: a monitored pool has in_use >= max
//! Degraded → Degraded: still exhausted, counter + 1
//! Degraded → Normal: any sample without exhaustion, counter = 0
//! Degraded → exit: counter reaches failure_threshold
//! ```
//!
//! # Precondition
//! Terminating is only a recovery strategy when an external supervisor
//! (container orchestrator, service manager) restarts the process. Stuck
//! remote workers cannot be reclaimed in-process; a fresh process rebuilds
//! clean pools.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::WatchdogConfig;
use crate::driver::PoolSnapshot;
use crate::observability::metrics;

/// Where the watchdog reads pool state from.
#[async_trait]
pub trait SaturationSource: Send + Sync {
    async fn sample(&self) -> Vec<PoolSnapshot>;
}

/// What the watchdog does when the threshold is reached.
pub trait Terminator: Send + Sync {
    fn terminate(&self, exit_code: i32);
}

/// Exits the process so the supervisor can restart it.
#[derive(Debug, Default)]
pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn terminate(&self, exit_code: i32) {
        std::process::exit(exit_code);
    }
}

/// Result of a single watchdog tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Normal,
    Degraded { consecutive: u32 },
    Terminated { consecutive: u32 },
}

/// Read-only view of the watchdog counter for status endpoints.
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    consecutive: Arc<AtomicU32>,
    threshold: u32,
    enabled: bool,
}

/// Serializable watchdog status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchdogStatus {
    pub enabled: bool,
    pub consecutive_exhaustion: u32,
    pub failure_threshold: u32,
}

impl WatchdogHandle {
    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            enabled: self.enabled,
            consecutive_exhaustion: self.consecutive(),
            failure_threshold: self.threshold,
        }
    }
}

/// Periodic monitor that exits the process on sustained pool exhaustion.
pub struct PoolWatchdog {
    source: Arc<dyn SaturationSource>,
    terminator: Arc<dyn Terminator>,
    config: WatchdogConfig,
    /// Written only by `tick`, read by status endpoints.
    consecutive: Arc<AtomicU32>,
}

impl PoolWatchdog {
    pub fn new(
        source: Arc<dyn SaturationSource>,
        terminator: Arc<dyn Terminator>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            source,
            terminator,
            config,
            consecutive: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn handle(&self) -> WatchdogHandle {
        WatchdogHandle {
            consecutive: Arc::clone(&self.consecutive),
            threshold: self.config.failure_threshold,
            enabled: self.config.enabled,
        }
    }

    /// Sample once and advance the state machine.
    pub async fn tick(&mut self) -> TickOutcome {
        let sample_timeout = Duration::from_millis(self.config.sample_timeout_ms);
        let exhausted: Vec<PoolSnapshot> = match time::timeout(sample_timeout, self.source.sample()).await {
            Ok(snapshots) => {
                for snapshot in &snapshots {
                    metrics::record_pool(snapshot);
                }
                snapshots.into_iter().filter(PoolSnapshot::is_exhausted).collect()
            }
            Err(_) => {
                // A missing sample is a gap; gaps never accumulate toward the threshold.
                tracing::warn!(timeout_ms = self.config.sample_timeout_ms, "Watchdog sample timed out");
                Vec::new()
            }
        };

        if exhausted.is_empty() {
            let previous = self.consecutive.swap(0, Ordering::Relaxed);
            metrics::record_watchdog(0);
            if previous > 0 {
                tracing::info!(previous, "Pool exhaustion cleared, watchdog back to normal");
            }
            return TickOutcome::Normal;
        }

        let consecutive = self.consecutive.load(Ordering::Relaxed) + 1;
        self.consecutive.store(consecutive, Ordering::Relaxed);
        metrics::record_watchdog(consecutive);

        let pools: Vec<&str> = exhausted.iter().map(|s| s.alias.as_str()).collect();
        tracing::warn!(
            consecutive,
            threshold = self.config.failure_threshold,
            pools = ?pools,
            "Connection pool exhausted"
        );

        if consecutive >= self.config.failure_threshold {
            tracing::error!(
                consecutive,
                exit_code = self.config.exit_code,
                pools = ?pools,
                "Sustained pool exhaustion, terminating for supervisor restart"
            );
            self.terminator.terminate(self.config.exit_code);
            return TickOutcome::Terminated { consecutive };
        }

        TickOutcome::Degraded { consecutive }
    }

    /// Tick every `interval_secs` until shutdown or termination.
    ///
    /// Ticks run sequentially inside this loop, so they never overlap.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Pool watchdog disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            threshold = self.config.failure_threshold,
            "Pool watchdog starting; relies on an external supervisor to restart the process"
        );

        let period = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let TickOutcome::Terminated { .. } = self.tick().await {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool watchdog received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PoolStatus;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back a script of exhausted/not-exhausted samples.
    struct ScriptedSource {
        script: Mutex<VecDeque<bool>>,
    }

    impl ScriptedSource {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
            })
        }
    }

    #[async_trait]
    impl SaturationSource for ScriptedSource {
        async fn sample(&self) -> Vec<PoolSnapshot> {
            let exhausted = self.script.lock().unwrap().pop_front().unwrap_or(false);
            vec![PoolSnapshot {
                alias: "primary".into(),
                status: PoolStatus::Active,
                open: 10,
                in_use: if exhausted { 10 } else { 4 },
                idle: if exhausted { 0 } else { 6 },
                connecting: 0,
                min: 2,
                max: 10,
            }]
        }
    }

    struct HangingSource;

    #[async_trait]
    impl SaturationSource for HangingSource {
        async fn sample(&self) -> Vec<PoolSnapshot> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct RecordingTerminator {
        calls: Mutex<Vec<i32>>,
    }

    impl Terminator for RecordingTerminator {
        fn terminate(&self, exit_code: i32) {
            self.calls.lock().unwrap().push(exit_code);
        }
    }

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            enabled: true,
            interval_secs: 30,
            failure_threshold: 3,
            sample_timeout_ms: 1_000,
            exit_code: 1,
        }
    }

    fn watchdog(
        source: Arc<dyn SaturationSource>,
    ) -> (PoolWatchdog, Arc<RecordingTerminator>) {
        let terminator = Arc::new(RecordingTerminator::default());
        let dog = PoolWatchdog::new(source, terminator.clone(), config());
        (dog, terminator)
    }

    #[tokio::test]
    async fn three_consecutive_exhausted_ticks_terminate() {
        let (mut dog, terminator) = watchdog(ScriptedSource::new(&[true, true, true]));

        assert_eq!(dog.tick().await, TickOutcome::Degraded { consecutive: 1 });
        assert_eq!(dog.tick().await, TickOutcome::Degraded { consecutive: 2 });
        assert_eq!(dog.tick().await, TickOutcome::Terminated { consecutive: 3 });
        assert_eq!(*terminator.calls.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn healthy_tick_resets_counter() {
        let (mut dog, terminator) =
            watchdog(ScriptedSource::new(&[true, true, false, true, true, false]));
        let handle = dog.handle();

        dog.tick().await;
        dog.tick().await;
        assert_eq!(handle.consecutive(), 2);

        assert_eq!(dog.tick().await, TickOutcome::Normal);
        assert_eq!(handle.consecutive(), 0);

        dog.tick().await;
        dog.tick().await;
        dog.tick().await;
        assert!(terminator.calls.lock().unwrap().is_empty());
        assert_eq!(handle.status().consecutive_exhaustion, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_sample_counts_as_gap() {
        let (mut dog, terminator) = watchdog(Arc::new(HangingSource));

        for _ in 0..5 {
            assert_eq!(dog.tick().await, TickOutcome::Normal);
        }
        assert!(terminator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_terminates_after_threshold_intervals() {
        let (dog, terminator) = watchdog(ScriptedSource::new(&[true; 10]));
        let handle = dog.handle();
        let (_tx, rx) = broadcast::channel(1);

        let started = time::Instant::now();
        dog.run(rx).await;

        assert_eq!(*terminator.calls.lock().unwrap(), vec![1]);
        assert_eq!(handle.consecutive(), 3);
        assert!(started.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_shutdown() {
        let (dog, terminator) = watchdog(ScriptedSource::new(&[]));
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn(dog.run(rx));
        time::sleep(Duration::from_secs(65)).await;
        tx.send(()).unwrap();
        task.await.unwrap();

        assert!(terminator.calls.lock().unwrap().is_empty());
    }
}
