//! An in-memory [`ConnectionFactory`]/[`Connection`] test double: no real
//! socket, fully programmable success/failure/latency scripting, with
//! bookkeeping the integration suite asserts against directly (every
//! connection produced is eventually closed exactly once, pings fail on
//! command, etc).

use aquifer_core::{Connection, ConnectionFactory, Error};
use futures_core::future::BoxFuture;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod metrics;
pub use metrics::RecordingMetrics;

/// A cloneable handle to an in-memory connection factory. All clones share
/// the same script and bookkeeping.
#[derive(Clone)]
pub struct MockFactory {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    next_id: u64,
    live: HashSet<u64>,
    closed: HashSet<u64>,
    script: Script,
}

#[derive(Clone, Default)]
struct Script {
    fail_connects: u32,
    fail_connects_permanent: bool,
    connect_latency: Duration,
    fail_pings: u32,
    ping_latency: Duration,
}

impl MockFactory {
    pub fn new() -> Self {
        MockFactory {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                live: HashSet::new(),
                closed: HashSet::new(),
                script: Script::default(),
            })),
        }
    }

    /// The next `n` `connect()` calls fail. `permanent` controls whether
    /// the resulting `Error::CreateFailed` bypasses the circuit breaker's
    /// backoff, matching the permanent/transient distinction a real driver
    /// makes between bad credentials and a dropped TCP dial.
    pub fn fail_next_connects(&self, n: u32, permanent: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.script.fail_connects = n;
        inner.script.fail_connects_permanent = permanent;
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        self.inner.lock().unwrap().script.connect_latency = latency;
    }

    /// The next `n` `ping()` calls, across every connection this factory
    /// has produced, fail.
    pub fn fail_next_pings(&self, n: u32) {
        self.inner.lock().unwrap().script.fail_pings = n;
    }

    pub fn set_ping_latency(&self, latency: Duration) {
        self.inner.lock().unwrap().script.ping_latency = latency;
    }

    pub fn created_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.live.len() + inner.closed.len()
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    pub fn closed_count(&self) -> usize {
        self.inner.lock().unwrap().closed.len()
    }

    /// True once every connection this factory has ever produced has also
    /// been passed to `close` — what a draining pool `close()` must
    /// guarantee before it returns.
    pub fn all_created_were_closed(&self) -> bool {
        self.inner.lock().unwrap().live.is_empty()
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn connect(&self, _timeout: Duration) -> BoxFuture<'_, aquifer_core::Result<MockConnection>> {
        Box::pin(async move {
            let (latency, should_fail, permanent, id) = {
                let mut inner = self.inner.lock().unwrap();
                let should_fail = inner.script.fail_connects > 0;
                if should_fail {
                    inner.script.fail_connects -= 1;
                }
                let id = inner.next_id;
                inner.next_id += 1;
                (
                    inner.script.connect_latency,
                    should_fail,
                    inner.script.fail_connects_permanent,
                    id,
                )
            };

            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if should_fail {
                return Err(Error::CreateFailed {
                    cause: Box::new(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "mock connect failure",
                    )),
                    permanent,
                });
            }

            self.inner.lock().unwrap().live.insert(id);
            Ok(MockConnection {
                id,
                factory: self.clone(),
            })
        })
    }
}

/// A connection handed out by [`MockFactory`]. Carries no real socket;
/// `ping`/`close` are driven entirely by the factory's script.
pub struct MockConnection {
    id: u64,
    factory: MockFactory,
}

impl MockConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Connection for MockConnection {
    fn ping(&mut self) -> BoxFuture<'_, aquifer_core::Result<()>> {
        Box::pin(async move {
            let (latency, should_fail) = {
                let mut inner = self.factory.inner.lock().unwrap();
                let should_fail = inner.script.fail_pings > 0;
                if should_fail {
                    inner.script.fail_pings -= 1;
                }
                (inner.script.ping_latency, should_fail)
            };

            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if should_fail {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock ping failure",
                )));
            }

            Ok(())
        })
    }

    fn close(self) -> BoxFuture<'static, aquifer_core::Result<()>> {
        Box::pin(async move {
            let mut inner = self.factory.inner.lock().unwrap();
            inner.live.remove(&self.id);
            inner.closed.insert(self.id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_created_and_closed_connections() {
        let factory = MockFactory::new();
        let a = factory.connect(Duration::from_secs(1)).await.unwrap();
        let b = factory.connect(Duration::from_secs(1)).await.unwrap();

        assert_eq!(factory.created_count(), 2);
        assert_eq!(factory.live_count(), 2);
        assert!(!factory.all_created_were_closed());

        a.close().await.unwrap();
        assert_eq!(factory.live_count(), 1);

        b.close().await.unwrap();
        assert!(factory.all_created_were_closed());
        assert_eq!(factory.closed_count(), 2);
    }

    #[tokio::test]
    async fn scripted_connect_failure_is_reported() {
        let factory = MockFactory::new();
        factory.fail_next_connects(1, true);

        let err = factory.connect(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CreateFailed {
                permanent: true,
                ..
            }
        ));

        // Only the first attempt was scripted to fail.
        assert!(factory.connect(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_ping_failure_is_reported() {
        let factory = MockFactory::new();
        let mut conn = factory.connect(Duration::from_secs(1)).await.unwrap();
        factory.fail_next_pings(1);

        assert!(conn.ping().await.is_err());
        assert!(conn.ping().await.is_ok());
    }
}
