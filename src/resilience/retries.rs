//! Statement retry logic.
//!
//! # Responsibilities
//! - Re-run a failed statement on the same lease with backoff
//! - Stop immediately once the lease is poisoned
//! - Surface the last error when attempts run out
//!
//! # Design Decisions
//! - Only statement execution is retried; acquisition is the caller's job
//! - A poisoned lease needs a fresh acquisition, which this layer never does

use std::time::Duration;

use crate::config::RetryConfig;
use crate::driver::Value;
use crate::pool::ConnectionLease;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::{ExecutionOutcome, TimedExecutor};

/// Bounded retries with linearly growing delays.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Same policy with a different attempt budget.
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }

    /// Run the statement up to `max_attempts` times on one lease.
    pub async fn execute_with_retry(
        &self,
        executor: &TimedExecutor,
        lease: &mut ConnectionLease,
        statement: &str,
        params: &[Value],
        deadline: Duration,
    ) -> ExecutionOutcome {
        let mut attempt = 1;
        loop {
            let err = match executor.execute(lease, statement, params, deadline).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if err.is_connection_poisoned() {
                tracing::warn!(
                    target_db = %lease.target(),
                    correlation_id = %lease.correlation_id(),
                    attempt,
                    error = %err,
                    "Lease poisoned, not retrying on this connection"
                );
                return Err(err);
            }

            if attempt >= self.max_attempts {
                tracing::warn!(
                    target_db = %lease.target(),
                    correlation_id = %lease.correlation_id(),
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }

            let delay = self.backoff(attempt);
            tracing::info!(
                target_db = %lease.target(),
                correlation_id = %lease.correlation_id(),
                attempt,
                max_attempts = self.max_attempts,
                delay = ?delay,
                error = %err,
                "Retrying statement"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_never_drop_below_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.with_max_attempts(0).max_attempts(), 1);
        assert_eq!(policy.with_max_attempts(4).max_attempts(), 4);
    }

    #[test]
    fn delays_grow_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000), Duration::from_secs(10));
        assert!(policy.backoff(2) > policy.backoff(1));
        assert!(policy.backoff(1) >= Duration::from_millis(1000));
    }

    #[test]
    fn default_matches_config_defaults() {
        assert_eq!(RetryPolicy::default().max_attempts(), 2);
    }
}
