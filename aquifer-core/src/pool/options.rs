use super::hooks::{LifecycleHooks, PoolConnectionMetadata};
use super::metrics::PoolMetricsCollector;
use super::Pool;
use crate::factory::ConnectionFactory;
use crate::{Clock, SystemClock};
use futures_core::future::BoxFuture;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

/// Recognized options and their defaults. Built with the same
/// consuming-setter pattern used throughout this crate.
pub struct PoolOptions<F>
where
    F: ConnectionFactory,
{
    pub(crate) min_connections: u32,
    pub(crate) max_connections: u32,
    pub(crate) connection_timeout: Duration,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) max_lifetime: Option<Duration>,
    pub(crate) validation_timeout: Duration,
    pub(crate) keepalive_time: Duration,
    pub(crate) connection_test_query: Option<String>,
    pub(crate) leak_detection_threshold: Option<Duration>,
    pub(crate) adaptive_sizing: bool,
    pub(crate) adaptive_interval: Duration,
    pub(crate) housekeeper_interval: Duration,
    pub(crate) failure_threshold: u32,
    pub(crate) acquire_slow_threshold: Duration,
    pub(crate) acquire_slow_level: log::LevelFilter,
    pub(crate) hooks: LifecycleHooks<F::Connection, Box<dyn std::any::Any + Send>>,
    pub(crate) metrics: Arc<dyn PoolMetricsCollector>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl<F> Debug for PoolOptions<F>
where
    F: ConnectionFactory,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("connection_timeout", &self.connection_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("validation_timeout", &self.validation_timeout)
            .field("keepalive_time", &self.keepalive_time)
            .field("connection_test_query", &self.connection_test_query)
            .field("leak_detection_threshold", &self.leak_detection_threshold)
            .field("adaptive_sizing", &self.adaptive_sizing)
            .field("adaptive_interval", &self.adaptive_interval)
            .field("failure_threshold", &self.failure_threshold)
            .finish_non_exhaustive()
    }
}

impl<F> Clone for PoolOptions<F>
where
    F: ConnectionFactory,
{
    fn clone(&self) -> Self {
        PoolOptions {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            connection_timeout: self.connection_timeout,
            idle_timeout: self.idle_timeout,
            max_lifetime: self.max_lifetime,
            validation_timeout: self.validation_timeout,
            keepalive_time: self.keepalive_time,
            connection_test_query: self.connection_test_query.clone(),
            leak_detection_threshold: self.leak_detection_threshold,
            adaptive_sizing: self.adaptive_sizing,
            adaptive_interval: self.adaptive_interval,
            housekeeper_interval: self.housekeeper_interval,
            failure_threshold: self.failure_threshold,
            acquire_slow_threshold: self.acquire_slow_threshold,
            acquire_slow_level: self.acquire_slow_level,
            hooks: self.hooks.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<F> Default for PoolOptions<F>
where
    F: ConnectionFactory,
{
    fn default() -> Self {
        PoolOptions {
            min_connections: 0,
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            validation_timeout: Duration::from_secs(5),
            keepalive_time: Duration::from_secs(2 * 60),
            connection_test_query: None,
            leak_detection_threshold: None,
            adaptive_sizing: false,
            adaptive_interval: Duration::from_secs(60),
            housekeeper_interval: Duration::from_secs(30),
            failure_threshold: 5,
            acquire_slow_threshold: Duration::from_secs(2),
            acquire_slow_level: log::LevelFilter::Warn,
            hooks: LifecycleHooks::default(),
            metrics: Arc::new(()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl<F> PoolOptions<F>
where
    F: ConnectionFactory,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into();
        self
    }

    pub fn max_lifetime(mut self, lifetime: impl Into<Option<Duration>>) -> Self {
        self.max_lifetime = lifetime.into();
        self
    }

    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    pub fn keepalive_time(mut self, interval: Duration) -> Self {
        self.keepalive_time = interval;
        self
    }

    /// Run `sql` instead of a protocol ping as the Validator's health
    /// check, both on the fast acquire path (once `keepalive_time` has
    /// elapsed) and during the housekeeper's keepalive sweep.
    pub fn connection_test_query(mut self, sql: impl Into<Option<String>>) -> Self {
        self.connection_test_query = sql.into();
        self
    }

    pub fn leak_detection_threshold(mut self, threshold: impl Into<Option<Duration>>) -> Self {
        self.leak_detection_threshold = threshold.into();
        self
    }

    pub fn adaptive_sizing(mut self, enabled: bool) -> Self {
        self.adaptive_sizing = enabled;
        self
    }

    pub fn adaptive_interval(mut self, interval: Duration) -> Self {
        self.adaptive_interval = interval;
        self
    }

    pub fn housekeeper_interval(mut self, interval: Duration) -> Self {
        self.housekeeper_interval = interval;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn metrics(mut self, collector: Arc<dyn PoolMetricsCollector>) -> Self {
        self.metrics = collector;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a typed before/after hook pair run around each lease.
    /// `before` runs inside the lease boundary before the caller sees the
    /// connection; its return value `Ctx` is stored on the entry and
    /// handed to `after`, which runs just before release. A hook failure
    /// turns the outcome BROKEN, destroying the entry.
    pub fn lifecycle_hooks<Ctx, Before, After>(mut self, before: Before, after: After) -> Self
    where
        Ctx: Send + 'static,
        Before: Fn(&mut F::Connection, PoolConnectionMetadata) -> BoxFuture<'static, crate::Result<Ctx>>
            + Send
            + Sync
            + 'static,
        After: Fn(Ctx, &mut F::Connection, PoolConnectionMetadata) -> BoxFuture<'static, crate::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks = LifecycleHooks::default()
            .before_acquire(move |conn, meta| {
                let fut = before(conn, meta);
                Box::pin(async move {
                    let ctx = fut.await?;
                    Ok(Box::new(ctx) as Box<dyn std::any::Any + Send>)
                })
            })
            .after_release(move |ctx, conn, meta| {
                let ctx = *ctx
                    .downcast::<Ctx>()
                    .expect("lifecycle hook context type mismatch (bug)");
                after(ctx, conn, meta)
            });
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.min_connections > self.max_connections {
            return Err(crate::Error::Configuration(format!(
                "min_connections ({}) must not exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        if let Some(max_lifetime) = self.max_lifetime {
            if max_lifetime <= self.keepalive_time {
                return Err(crate::Error::Configuration(format!(
                    "max_lifetime ({max_lifetime:?}) must be greater than keepalive_time \
                     ({:?})",
                    self.keepalive_time
                )));
            }
        }

        Ok(())
    }

    /// Validate the configuration and construct a [`Pool`], eagerly
    /// bringing the pool up to `min_connections`.
    pub async fn connect(self, factory: F) -> crate::Result<Pool<F>> {
        self.validate()?;
        Pool::with_options(self, factory).await
    }

    /// Validate the configuration and construct a [`Pool`] without
    /// eagerly establishing any connections.
    pub fn connect_lazy(self, factory: F) -> crate::Result<Pool<F>> {
        self.validate()?;
        Ok(Pool::with_options_lazy(self, factory))
    }
}
