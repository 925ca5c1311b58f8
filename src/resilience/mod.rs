//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Statement on a verified lease:
//!     → retries.rs (bounded attempts, backoff between them)
//!     → timeouts.rs (deadline race; on expiry poison + detached cancel/close)
//!     → backoff.rs (attempt * base delay, capped, jittered)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every suspension point has a deadline
//! - A deadline is not advisory: once fired the caller sees a failure
//! - Retries never reuse a poisoned lease

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::RetryPolicy;
pub use timeouts::{ExecutionOutcome, TimedExecutor};
