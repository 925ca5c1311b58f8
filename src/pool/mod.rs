//! Pool management subsystem.
//!
//! # Data Flow
//! ```text
//! Caller names a target ("primary", "secondary")
//!     → registry.rs (memoized pool, recreated when draining/closed)
//!     → acquire.rs (bounded checkout + SELECT 1 probe)
//!     → ConnectionLease handed to the executor
//!     → released to the pool, or dropped if poisoned
//! ```
//!
//! # Design Decisions
//! - One live pool per target; creation is single-flight
//! - No lock is held across statements; the pool's own accounting
//!   serializes checkout
//! - Unverified connections are never handed out

pub mod acquire;
pub mod registry;

pub use acquire::{ConnectionAcquirer, ConnectionLease};
pub use registry::{PoolRegistry, TargetSpec};
