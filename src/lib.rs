//! Aquifer: a fiber-friendly, circuit-broken connection pool, plus a
//! native MySQL client driver built on it.
//!
//! The pool itself (`Pool`, `PoolOptions`, lifecycle hooks, metrics, the
//! circuit breaker) lives in `aquifer-core` and is generic over any
//! [`ConnectionFactory`]; this crate re-exports it and, behind the
//! `mysql` feature (on by default), adds [`MySqlConnectionFactory`] so a
//! `Pool<MySqlConnectionFactory>` can be built without depending on
//! `aquifer-core`/`aquifer-mysql` directly.
//!
//! ```no_run
//! # async fn run() -> Result<(), aquifer::Error> {
//! use aquifer::{Connection, DataSource, MySqlConnectOptions, MySqlConnectionFactory, PoolOptions};
//!
//! let factory = MySqlConnectionFactory::new(
//!     MySqlConnectOptions::new().host("localhost").user("root"),
//! );
//! let pool = PoolOptions::new().max_connections(10).connect(factory).await?;
//!
//! let mut conn = pool.acquire().await?;
//! conn.ping().await?;
//! # Ok(())
//! # }
//! ```

pub use aquifer_core::{
    AcquirePhase, CircuitBreakerSnapshot, Clock, Connection, ConnectionFactory, DataSource, Error,
    HookPhase, Pool, PoolConnection, PoolMetricsCollector, PoolMetricsSnapshot, PoolOptions,
    Result, SystemClock,
};

#[cfg(feature = "mysql")]
pub use aquifer_mysql::{MySqlConnectOptions, MySqlConnection, MySqlConnectionFactory};
