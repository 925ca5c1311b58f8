//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build registry + service + watchdog
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop watchdog and admin server → Drain pools → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Pools are created lazily, never at startup
//! - Pool drain is bounded by `execution.drain_timeout_ms`
//! - A watchdog exit skips the drain; the supervisor restarts the process

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::Gateway;
