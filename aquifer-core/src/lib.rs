//! Core of aquifer, the connection pool underlying the `aquifer` MySQL client.
//! Not intended to be used directly; see the `aquifer` crate.

mod clock;
pub mod connection;
mod error;
pub mod factory;
pub mod pool;

pub use clock::{Clock, SystemClock};
pub use connection::PoolConnection;
pub use error::{Error, HookPhase, Result};
pub use factory::{Connection, ConnectionFactory};
pub use pool::{
    options::PoolOptions, AcquirePhase, CircuitBreakerSnapshot, DataSource, Pool, PoolMetricsCollector,
    PoolMetricsSnapshot,
};
