//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::PoolOptions;

/// Root configuration for the report gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Operational HTTP endpoints (health, debug).
    pub admin: AdminConfig,

    /// Acquisition, probe and statement deadlines.
    pub execution: ExecutionConfig,

    /// Statement retry configuration.
    pub retries: RetryConfig,

    /// Pool exhaustion watchdog.
    pub watchdog: WatchdogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Logical databases, one pool each.
    pub targets: Vec<TargetConfig>,
}

impl GatewayConfig {
    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address (e.g., "127.0.0.1:8081").
    pub bind_address: String,

    /// Ceiling on any single admin request in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8081".to_string(),
            request_timeout_secs: 70,
        }
    }
}

/// Deadlines for each suspension point of a query.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Ceiling on waiting for a pooled connection.
    pub acquire_timeout_ms: u64,

    /// Liveness probe timeout.
    pub probe_timeout_ms: u64,

    /// Acquisitions slower than this are logged as a saturation warning.
    pub slow_acquire_warn_ms: u64,

    /// Default statement deadline for interactive callers.
    pub statement_timeout_ms: u64,

    /// Statement deadline for batch reports.
    pub batch_statement_timeout_ms: u64,

    /// Out-of-band cancel timeout after a statement deadline fires.
    pub cancel_timeout_ms: u64,

    /// Discard-close timeout after a statement deadline fires.
    pub close_timeout_ms: u64,

    /// Connect timeout for new physical connections.
    pub connect_timeout_ms: u64,

    /// How long shutdown waits for leases before closing pools.
    pub drain_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 12_000,
            probe_timeout_ms: 5_000,
            slow_acquire_warn_ms: 1_000,
            statement_timeout_ms: 30_000,
            batch_statement_timeout_ms: 60_000,
            cancel_timeout_ms: 3_000,
            close_timeout_ms: 3_000,
            connect_timeout_ms: 10_000,
            drain_timeout_ms: 10_000,
        }
    }
}

impl ExecutionConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn slow_acquire_warn(&self) -> Duration {
        Duration::from_millis(self.slow_acquire_warn_ms)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    pub fn batch_statement_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_statement_timeout_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total statement attempts on one lease (1 disables retries).
    pub max_attempts: u32,

    /// Base delay; attempt `n` waits `n * base_delay_ms`.
    pub base_delay_ms: u64,

    /// Upper bound on any single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Pool exhaustion watchdog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Enable the watchdog.
    pub enabled: bool,

    /// Sampling interval in seconds.
    pub interval_secs: u64,

    /// Consecutive exhausted samples before the process exits.
    pub failure_threshold: u32,

    /// Bound on a single sampling call.
    pub sample_timeout_ms: u64,

    /// Exit code used for the deliberate termination.
    pub exit_code: i32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            failure_threshold: 3,
            sample_timeout_ms: 5_000,
            exit_code: 1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// One logical database.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Logical name used by callers (e.g., "primary").
    pub name: String,

    /// Connection string including credentials.
    pub dsn: String,

    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connections opened at once when the pool grows.
    #[serde(default = "default_increment")]
    pub increment: usize,

    /// Pool-level wait ceiling in milliseconds.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// Idle connections older than this are closed (down to min).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Include this target in watchdog sampling and health checks.
    #[serde(default = "default_monitored")]
    pub monitored: bool,
}

impl TargetConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            increment: self.increment,
            queue_timeout: Duration::from_millis(self.queue_timeout_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

fn default_min_connections() -> usize {
    2
}

fn default_max_connections() -> usize {
    10
}

fn default_increment() -> usize {
    1
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_monitored() -> bool {
    true
}
