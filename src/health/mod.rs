//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Watchdog (watchdog.rs):
//!     Periodic timer
//!     → Sample monitored pool snapshots
//!     → Count consecutive exhausted samples
//!     → Exit the process at the threshold
//!
//! Health check (check.rs):
//!     Operator request
//!     → Acquire + probe every monitored target in parallel
//!     → Per-target status plus aggregate pass/fail
//! ```
//!
//! # Design Decisions
//! - The watchdog is the only writer of its counter
//! - Any non-exhausted sample resets the counter; gaps never accumulate
//! - Health checks exercise the same acquisition path as real queries

pub mod check;
pub mod watchdog;

pub use check::{check_all, HealthReport, TargetHealth};
pub use watchdog::{PoolWatchdog, ProcessExit, SaturationSource, Terminator, WatchdogHandle};
