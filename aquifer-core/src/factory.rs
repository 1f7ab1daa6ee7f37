//! The narrow capability the pool consumes to create and tear down
//! connections. The wire protocol (capability negotiation, packet framing,
//! authentication, prepared statements, result decoding) lives entirely on
//! the other side of this trait, in a driver crate such as `aquifer-mysql`.

use futures_core::future::BoxFuture;
use std::time::Duration;

/// A single live connection, as far as the pool is concerned: something
/// that can be health-checked and that can be told to shut down cleanly.
pub trait Connection: Send + 'static {
    /// A lightweight liveness check, used as the default validator when no
    /// `connection_test_query` is configured.
    fn ping(&mut self) -> BoxFuture<'_, crate::Result<()>>;

    /// Close the connection, performing whatever polite shutdown the
    /// protocol supports. Best-effort: the entry is considered gone
    /// regardless of the result.
    fn close(self) -> BoxFuture<'static, crate::Result<()>>;

    /// The health check the pool's Validator actually runs: `test_query`,
    /// when set (from `PoolOptions::connection_test_query`), is a
    /// user-supplied SQL statement to send in place of a raw protocol
    /// ping. Connections that have no meaningful notion of a test query
    /// beyond ping can leave the default implementation in place.
    fn validate(&mut self, test_query: Option<&str>) -> BoxFuture<'_, crate::Result<()>> {
        let _ = test_query;
        self.ping()
    }
}

/// Creates new, ready-to-use connections on behalf of the pool.
///
/// Implementations perform TCP (and, if configured, TLS) connection setup
/// and the protocol handshake, then hand back a [`Connection`]. Errors
/// should distinguish transient causes (network failure, server
/// temporarily unavailable) from permanent ones (bad credentials, unknown
/// database) by setting `permanent: true` on [`crate::Error::CreateFailed`]
/// for the latter — permanent failures bypass the circuit breaker's
/// backoff and are surfaced immediately.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    /// Open one new connection, failing if `timeout` elapses first.
    fn connect(&self, timeout: Duration) -> BoxFuture<'_, crate::Result<Self::Connection>>;
}
