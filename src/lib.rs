//! Resilient query execution and connection-pool lifecycle for report workloads.

pub mod admin;
pub mod config;
pub mod driver;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod query;
pub mod resilience;

pub use config::schema::GatewayConfig;
pub use error::QueryError;
pub use lifecycle::{Gateway, Shutdown};
pub use query::QueryService;
