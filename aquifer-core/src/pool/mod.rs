//! Pool Core: the state machine coordinating entries, waiters, and idle
//! slots behind a single critical section.

mod adaptive;
mod breaker;
mod entry;
mod hooks;
mod housekeeper;
mod leak;
mod metrics;
pub mod options;
mod size;

pub use breaker::CircuitBreakerSnapshot;
pub use hooks::PoolConnectionMetadata;
pub use metrics::{AcquirePhase, PoolMetricsCollector, PoolMetricsSnapshot};
pub use options::PoolOptions;

pub(crate) use entry::EntryId;
pub(crate) use leak::LeakGuard;

use adaptive::AdaptiveSizing;
use breaker::BreakerDecision;
use entry::{EntryState, PooledEntry};
use leak::LeakDetector;
use metrics::SimplePoolMetrics;
use size::{IncreaseGuard, PoolSize};

use crate::connection::PoolConnection;
use crate::factory::{Connection, ConnectionFactory};
use crate::{Clock, Error};
use futures_core::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};

pub(crate) type HookCtx = Box<dyn std::any::Any + Send>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<WaiterGrant>,
}

struct WaiterGrant {
    entry_id: EntryId,
    token: u64,
}

struct PoolState<C> {
    entries: HashMap<EntryId, PooledEntry<C>>,
    /// LIFO: `pop_back` favors the most-recently-returned (warmest)
    /// connection.
    idle: VecDeque<EntryId>,
    /// Strict FIFO.
    waiters: VecDeque<Waiter>,
    closed: bool,
    next_id: EntryId,
    next_generation: u32,
    breaker: breaker::CircuitBreaker,
}

impl<C> PoolState<C> {
    fn new(failure_threshold: u32) -> Self {
        PoolState {
            entries: HashMap::new(),
            idle: VecDeque::new(),
            waiters: VecDeque::new(),
            closed: false,
            next_id: 1,
            next_generation: 0,
            breaker: breaker::CircuitBreaker::new(failure_threshold),
        }
    }

    /// Try waiters in FIFO order until one is still listening; otherwise
    /// push the entry onto the idle queue.
    fn hand_off_or_idle(&mut self, entry_id: EntryId, now: Instant) {
        while let Some(waiter) = self.waiters.pop_front() {
            let entry = self.entries.get_mut(&entry_id).expect("entry vanished");
            let token = entry.lease_token.map_or(1, |t| t + 1);

            match waiter.tx.send(WaiterGrant { entry_id, token }) {
                Ok(()) => {
                    entry.lease_token = Some(token);
                    entry.state = EntryState::InUse;
                    entry.last_borrowed_at = Some(now);
                    entry.use_count += 1;
                    return;
                }
                Err(_) => continue, // waiter dropped/cancelled; try the next
            }
        }

        let entry = self.entries.get_mut(&entry_id).expect("entry vanished");
        entry.state = EntryState::Idle;
        entry.lease_token = None;
        entry.last_returned_at = Some(now);
        self.idle.push_back(entry_id);
    }
}

enum AcquireDecision {
    Ready { entry_id: EntryId, token: u64 },
    Create { guard: IncreaseGuard },
    Park(oneshot::Receiver<WaiterGrant>),
    CircuitOpen,
    Closed,
}

/// Outcome passed to [`Pool::release_internal`] by a releasing lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Ok,
    Broken,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    options: PoolOptions<F>,
    state: Mutex<PoolState<F::Connection>>,
    size: PoolSize,
    metrics: SimplePoolMetrics,
    user_metrics: Arc<dyn PoolMetricsCollector>,
    leak_detector: LeakDetector,
    adaptive: AdaptiveSizing,
    clock: Arc<dyn Clock>,
    closed_notify: Notify,
    next_lease_token: AtomicU64,
    next_waiter_id: AtomicU64,
    housekeeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A bounded pool of connections produced by a [`ConnectionFactory`].
///
/// Cloning a `Pool` is cheap (it's a thin handle over an `Arc`); all clones
/// share the same underlying state.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// The public entry point exposed to the query/DSL layer: scoped and
/// unscoped acquisition, a metrics snapshot, and shutdown.
pub trait DataSource: Send + Sync {
    type Connection: crate::Connection;

    fn acquire(&self) -> BoxFuture<'_, crate::Result<PoolConnection<Self::Connection>>>;

    /// Scoped acquisition: `body` runs with an exclusive lease that is
    /// guaranteed to be released on every exit path, including an early
    /// return or a panic unwinding through `body`.
    ///
    /// `body` is universally quantified over the lease's borrow (`for<'c>`)
    /// and must hand back a `BoxFuture<'c, _>` rather than naming its own
    /// future type, the same workaround `PoolOptions`'s lifecycle hooks
    /// use: there is no way to otherwise tell the compiler that a closure's
    /// higher-ranked lifetime parameter and its returned future's lifetime
    /// are the same one. Binding `T` outside that `for<'c>` is what stops
    /// `body` from smuggling a reference to the lease back out past the
    /// point where it gets dropped.
    fn with_connection<'a, T>(
        &'a self,
        body: impl for<'c> FnOnce(&'c mut PoolConnection<Self::Connection>) -> BoxFuture<'c, crate::Result<T>>
            + Send
            + 'a,
    ) -> BoxFuture<'a, crate::Result<T>>
    where
        T: Send + 'static;
}

impl<F> DataSource for Pool<F>
where
    F: ConnectionFactory,
{
    type Connection = F::Connection;

    fn acquire(&self) -> BoxFuture<'_, crate::Result<PoolConnection<F::Connection>>> {
        Box::pin(self.acquire_impl())
    }

    fn with_connection<'a, T>(
        &'a self,
        body: impl for<'c> FnOnce(&'c mut PoolConnection<Self::Connection>) -> BoxFuture<'c, crate::Result<T>>
            + Send
            + 'a,
    ) -> BoxFuture<'a, crate::Result<T>>
    where
        T: Send + 'static,
    {
        Box::pin(async move {
            let mut conn = self.acquire_impl().await?;
            // `conn` releases itself on drop along every exit path of
            // `body`, including an error return or an unwinding panic; the
            // borrow below cannot outlive that drop because `T` cannot
            // name the borrow's lifetime.
            body(&mut conn).await
        })
    }
}

impl<F> Pool<F>
where
    F: ConnectionFactory,
{
    pub(crate) async fn with_options(options: PoolOptions<F>, factory: F) -> crate::Result<Self> {
        let pool = Self::with_options_lazy(options, factory);
        pool.prefill_to_minimum().await?;
        Ok(pool)
    }

    pub(crate) fn with_options_lazy(options: PoolOptions<F>, factory: F) -> Self {
        let max_connections = options.max_connections;
        let failure_threshold = options.failure_threshold;
        let leak_detector = LeakDetector::new(options.leak_detection_threshold);
        let clock = Arc::clone(&options.clock);
        let user_metrics = Arc::clone(&options.metrics);

        let min_connections = options.min_connections;

        let inner = Arc::new(PoolInner {
            factory,
            options,
            state: Mutex::new(PoolState::new(failure_threshold)),
            size: PoolSize::new(max_connections),
            metrics: SimplePoolMetrics::new(),
            user_metrics,
            leak_detector,
            adaptive: AdaptiveSizing::new(min_connections),
            clock,
            closed_notify: Notify::new(),
            next_lease_token: AtomicU64::new(1),
            next_waiter_id: AtomicU64::new(1),
            housekeeper: Mutex::new(None),
        });

        let pool = Pool { inner };
        let handle = housekeeper::spawn(pool.clone());
        *pool.inner.housekeeper.lock().unwrap() = Some(handle);
        pool
    }

    async fn prefill_to_minimum(&self) -> crate::Result<()> {
        let min = self.inner.options.min_connections;
        for _ in 0..min {
            // Leave it idle: dropping the lease without using it returns
            // it straight to the idle queue.
            drop(self.acquire_impl().await?);
        }
        Ok(())
    }

    fn next_token(&self) -> u64 {
        self.inner.next_lease_token.fetch_add(1, Ordering::Relaxed)
    }

    fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// Acquire a connection, parking behind the waiter queue if the pool is
    /// momentarily exhausted. Fails with `PoolClosed`, `AcquireTimeout`,
    /// `CircuitOpen`, `CreateFailed`, or `ValidationFailed`.
    async fn acquire_impl(&self) -> crate::Result<PoolConnection<F::Connection>> {
        self.inner.user_metrics.acquire_called();
        let start = self.now();
        let deadline = start + self.inner.options.connection_timeout;

        let validation_attempts_budget = 1 + self.inner.options.max_connections.min(3);
        let mut last_validation_cause: Option<Box<dyn std::error::Error + Send + Sync>> = None;

        for _attempt in 0..validation_attempts_budget {
            match self.decide(deadline).await? {
                Taken::Fresh(entry_id, token) => {
                    return self.finish_acquire(entry_id, token, start).await;
                }
                Taken::Candidate(entry_id, token) => {
                    match self.validate(entry_id, token, deadline).await {
                        Ok(()) => return self.finish_acquire(entry_id, token, start).await,
                        Err(ValidationOutcome::Retry(cause)) => {
                            last_validation_cause = Some(cause);
                            continue;
                        }
                        Err(ValidationOutcome::Fatal(e)) => return Err(e),
                    }
                }
            }
        }

        Err(Error::ValidationFailed {
            attempts: validation_attempts_budget,
            last_cause: last_validation_cause.unwrap_or_else(|| Box::new(Error::AcquireTimeout)),
        })
    }

    async fn decide(&self, deadline: Instant) -> crate::Result<Taken> {
        let now = self.now();
        let decision = {
            let mut state = self.inner.state.lock().unwrap();

            if state.closed {
                AcquireDecision::Closed
            } else if let Some(entry_id) = state.idle.pop_back() {
                let token = self.next_token();
                let entry = state.entries.get_mut(&entry_id).expect("entry vanished");
                entry.state = EntryState::InUse;
                entry.lease_token = Some(token);
                entry.last_borrowed_at = Some(now);
                entry.use_count += 1;
                AcquireDecision::Ready { entry_id, token }
            } else if self.inner.size.current() < self.inner.size.max() {
                match state.breaker.decide(now) {
                    BreakerDecision::Reject => AcquireDecision::CircuitOpen,
                    BreakerDecision::Permit | BreakerDecision::PermitProbe => {
                        let guard = self
                            .inner
                            .size
                            .try_increase()
                            .expect("size reservation race (bug): total changed under the pool lock");
                        AcquireDecision::Create { guard }
                    }
                }
            } else {
                let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter { id, tx });
                AcquireDecision::Park(rx)
            }
        };

        match decision {
            AcquireDecision::Closed => Err(Error::PoolClosed),
            AcquireDecision::CircuitOpen => {
                self.inner
                    .user_metrics
                    .acquire_timed_out(AcquirePhase::Backoff);
                Err(Error::CircuitOpen)
            }
            AcquireDecision::Ready { entry_id, token } => Ok(Taken::Candidate(entry_id, token)),
            AcquireDecision::Create { guard } => {
                let (entry_id, token) = self.create_entry(guard, deadline).await?;
                Ok(Taken::Fresh(entry_id, token))
            }
            AcquireDecision::Park(rx) => self.wait_for_grant(rx, deadline).await,
        }
    }

    async fn create_entry(
        &self,
        guard: IncreaseGuard,
        deadline: Instant,
    ) -> crate::Result<(EntryId, u64)> {
        let remaining = deadline
            .saturating_duration_since(self.now())
            .max(Duration::from_millis(1));

        match self.inner.factory.connect(remaining).await {
            Ok(conn) => {
                guard.commit();
                let token = self.next_token();
                let created_at = self.now();

                let mut state = self.inner.state.lock().unwrap();
                let id = state.next_id;
                state.next_id += 1;
                let generation = state.next_generation;
                state.next_generation += 1;

                let mut entry = PooledEntry::new(id, generation, conn, created_at);
                entry.lease_token = Some(token);
                state.entries.insert(id, entry);
                state.breaker.on_success();
                drop(state);

                self.inner.metrics.on_created();
                self.inner.user_metrics.connection_created();
                Ok((id, token))
            }
            Err(e) => {
                drop(guard);
                let create_err = match e {
                    Error::CreateFailed { .. } => e,
                    other => Error::CreateFailed {
                        cause: Box::new(other),
                        permanent: false,
                    },
                };

                let permanent =
                    matches!(&create_err, Error::CreateFailed { permanent: true, .. });
                if !permanent {
                    let mut state = self.inner.state.lock().unwrap();
                    state.breaker.on_failure(self.now());
                }

                log::warn!("failed to create a new pooled connection: {create_err}");
                Err(create_err)
            }
        }
    }

    async fn wait_for_grant(
        &self,
        mut rx: oneshot::Receiver<WaiterGrant>,
        deadline: Instant,
    ) -> crate::Result<Taken> {
        let remaining = deadline.saturating_duration_since(self.now());

        tokio::select! {
            biased;
            res = &mut rx => match res {
                Ok(grant) => Ok(Taken::Candidate(grant.entry_id, grant.token)),
                Err(_) => Err(Error::PoolClosed),
            },
            _ = self.inner.clock.sleep(remaining) => {
                self.inner.metrics.on_timeout();
                self.inner
                    .user_metrics
                    .acquire_timed_out(AcquirePhase::Waiting);
                Err(self.handle_timeout(rx).await)
            }
        }
    }

    /// On timeout we may race a concurrent `release` that already popped
    /// us off the waiter queue and is in the middle of sending a grant; if
    /// so, accept the entry and immediately hand it back rather than
    /// leaking it, and still report the timeout to our own caller.
    async fn handle_timeout(&self, mut rx: oneshot::Receiver<WaiterGrant>) -> Error {
        match rx.try_recv() {
            Ok(grant) => {
                self.discard_unclaimed_grant(grant.entry_id, grant.token)
                    .await;
                Error::AcquireTimeout
            }
            Err(_) => Error::AcquireTimeout,
        }
    }

    async fn validate(
        &self,
        entry_id: EntryId,
        token: u64,
        deadline: Instant,
    ) -> Result<(), ValidationOutcome> {
        let _ = token;
        let now = self.now();

        let needs_check = {
            let state = self.inner.state.lock().unwrap();
            match state.entries.get(&entry_id) {
                Some(entry) => {
                    now.saturating_duration_since(entry.last_validated_at)
                        > self.inner.options.keepalive_time
                }
                None => return Err(ValidationOutcome::Fatal(Error::PoolClosed)),
            }
        };

        if !needs_check {
            return Ok(());
        }

        let mut conn = {
            let mut state = self.inner.state.lock().unwrap();
            match state.entries.get_mut(&entry_id) {
                Some(entry) => {
                    entry.state = EntryState::Validating;
                    entry.conn.take().expect("connection already taken (bug)")
                }
                None => return Err(ValidationOutcome::Fatal(Error::PoolClosed)),
            }
        };

        let remaining = deadline.saturating_duration_since(self.now());
        let budget = remaining.min(self.inner.options.validation_timeout);
        let test_query = self.inner.options.connection_test_query.as_deref();

        let result = tokio::time::timeout(budget, conn.validate(test_query)).await;

        match result {
            Ok(Ok(())) => {
                let mut state = self.inner.state.lock().unwrap();
                if let Some(entry) = state.entries.get_mut(&entry_id) {
                    entry.conn = Some(conn);
                    entry.state = EntryState::InUse;
                    entry.last_validated_at = self.now();
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.destroy_after_failed_validation(entry_id, conn).await;
                Err(ValidationOutcome::Retry(Box::new(e)))
            }
            Err(_elapsed) => {
                self.destroy_after_failed_validation(entry_id, conn).await;
                Err(ValidationOutcome::Retry(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection validation timed out",
                ))))
            }
        }
    }

    async fn destroy_after_failed_validation(&self, entry_id: EntryId, conn: F::Connection) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.entries.remove(&entry_id);
        }
        self.inner.metrics.on_validation_failed();
        self.inner.user_metrics.validation_failed();
        self.finish_destroy(conn).await;
    }

    /// Account for and close a connection whose entry has already been
    /// removed from the map. Must be called outside the pool lock.
    pub(crate) async fn finish_destroy(&self, conn: F::Connection) {
        self.inner.size.release_one();
        self.inner.metrics.on_destroyed();
        self.inner.user_metrics.connection_destroyed();
        let _ = conn.close().await;
    }

    /// Takes the entry's connection out of the entries map for the
    /// duration of the lease: once this returns, `PoolConnection` is the
    /// sole owner of the connection value, matching the concurrency
    /// model's promise that no other task observes an `IN_USE` entry.
    async fn finish_acquire(
        &self,
        entry_id: EntryId,
        token: u64,
        start: Instant,
    ) -> crate::Result<PoolConnection<F::Connection>> {
        let (mut conn, age, idle_for) = {
            let mut state = self.inner.state.lock().unwrap();
            let entry = state.entries.get_mut(&entry_id).expect("entry vanished");
            let conn = entry.conn.take().expect("connection already taken (bug)");
            let now = self.now();
            let age = now.saturating_duration_since(entry.created_at);
            let idle_for = entry
                .last_returned_at
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or_default();
            (conn, age, idle_for)
        };

        let meta = PoolConnectionMetadata { age, idle_for };
        let hook_result = self
            .inner
            .options
            .hooks
            .run_before_acquire(&mut conn, meta)
            .await;

        let hook_ctx = match hook_result {
            Ok(ctx) => ctx,
            Err(e) => {
                self.release_leased(entry_id, token, conn, ReleaseOutcome::Broken, None)
                    .await;
                return Err(Error::HookFailed {
                    phase: crate::HookPhase::BeforeAcquire,
                    cause: Box::new(e),
                });
            }
        };

        let leak_guard = self.inner.leak_detector.arm(entry_id, &self.inner.clock);

        let total_time = self.now().saturating_duration_since(start);
        self.inner.metrics.on_acquired(total_time);
        self.inner.user_metrics.connection_acquired(total_time);

        if total_time >= self.inner.options.acquire_slow_threshold {
            log_at(
                self.inner.options.acquire_slow_level,
                &format!("connection acquired in {total_time:?}, exceeding the configured slow-acquire threshold"),
            );
        }

        Ok(PoolConnection::new(
            conn,
            self.clone_handle(),
            entry_id,
            token,
            hook_ctx,
            leak_guard,
        ))
    }

    fn clone_handle(&self) -> PoolHandle<F> {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Used by `PoolConnection::drop`/`release`/`close` to return a leased
    /// connection to the pool. Runs the `after_release` hook (if
    /// `hook_ctx` is `Some`), then hands off to `finish_release`. The
    /// connection is owned directly by the caller (it left the entries map
    /// back in `finish_acquire`), so there is no entry lookup to take it
    /// from.
    pub(crate) async fn release_leased(
        &self,
        entry_id: EntryId,
        token: u64,
        mut conn: F::Connection,
        mut outcome: ReleaseOutcome,
        hook_ctx: Option<HookCtx>,
    ) {
        let now = self.now();

        if let Some(ctx) = hook_ctx {
            // The entry is still in the map (only `finish_release` below
            // decides whether to recycle or destroy it), so its real
            // `created_at` is available here rather than faking the age.
            let age = {
                let state = self.inner.state.lock().unwrap();
                state
                    .entries
                    .get(&entry_id)
                    .map(|entry| now.saturating_duration_since(entry.created_at))
                    .unwrap_or_default()
            };
            let meta = PoolConnectionMetadata {
                age,
                // Not yet idle: the lease just ended, it hasn't sat idle
                // for any amount of time.
                idle_for: Duration::ZERO,
            };
            if let Err(e) = self
                .inner
                .options
                .hooks
                .run_after_release(Some(ctx), &mut conn, meta)
                .await
            {
                log::warn!("after_release hook failed for entry {entry_id}: {e}");
                outcome = ReleaseOutcome::Broken;
            }
        }

        self.finish_release(entry_id, token, conn, outcome, now).await;
    }

    /// Releases a connection that never made it out to a caller: a grant
    /// was sent to a waiter, but that waiter's `acquire` had already timed
    /// out (or been cancelled) and is unwinding. The connection is still
    /// sitting in the entries map (nobody ran `finish_acquire` on it), so
    /// it's fetched from there rather than passed in.
    async fn discard_unclaimed_grant(&self, entry_id: EntryId, token: u64) {
        let now = self.now();
        let conn = {
            let mut state = self.inner.state.lock().unwrap();
            state
                .entries
                .get_mut(&entry_id)
                .filter(|e| e.lease_token == Some(token))
                .and_then(|e| e.conn.take())
        };

        if let Some(conn) = conn {
            self.finish_release(entry_id, token, conn, ReleaseOutcome::Ok, now)
                .await;
        }
    }

    /// Recycles to a waiting waiter or the idle queue, or destroys the
    /// connection outright (forced by `outcome = BROKEN`, an expired
    /// `max_lifetime`, a `retire_on_release` flag set by the housekeeper,
    /// or the pool closing).
    async fn finish_release(
        &self,
        entry_id: EntryId,
        token: u64,
        conn: F::Connection,
        outcome: ReleaseOutcome,
        now: Instant,
    ) {
        enum Disposition<C> {
            Recycled,
            Destroy(C),
            /// The entry is already gone from the map (closed, or a stale
            /// double release): nothing to recycle into, but the
            /// connection still must not leak.
            Orphaned(C),
        }

        let max_lifetime = self.inner.options.max_lifetime;

        let disposition = {
            let mut state = self.inner.state.lock().unwrap();
            match state.entries.get_mut(&entry_id) {
                Some(entry) if entry.lease_token == Some(token) => {
                    let expired = max_lifetime.is_some_and(|max| {
                        now.saturating_duration_since(entry.created_at) >= max
                    });
                    let closing = state.closed;

                    if matches!(outcome, ReleaseOutcome::Broken)
                        || expired
                        || entry.retire_on_release
                        || closing
                    {
                        state.entries.remove(&entry_id);
                        Disposition::Destroy(conn)
                    } else {
                        entry.conn = Some(conn);
                        entry.lease_token = None;
                        state.hand_off_or_idle(entry_id, now);
                        Disposition::Recycled
                    }
                }
                Some(_) => {
                    log::warn!("double release observed for entry {entry_id}; ignoring");
                    Disposition::Orphaned(conn)
                }
                None => Disposition::Orphaned(conn),
            }
        };

        self.inner.metrics.on_released();

        match disposition {
            Disposition::Recycled => {}
            Disposition::Destroy(conn) => {
                self.finish_destroy(conn).await;
                self.maybe_replenish(now).await;
            }
            Disposition::Orphaned(conn) => {
                // Already accounted for (or never was, in the stale-token
                // case) — just close it, without touching size/metrics
                // again.
                let _ = conn.close().await;
            }
        }
    }

    async fn maybe_replenish(&self, now: Instant) {
        let should = {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return;
            }
            self.inner.size.current() < self.inner.options.min_connections
                && !matches!(state.breaker.decide(now), BreakerDecision::Reject)
        };

        if !should {
            return;
        }

        if let Some(guard) = self.inner.size.try_increase() {
            if let Ok((entry_id, _token)) = self
                .create_entry(guard, now + self.inner.options.connection_timeout)
                .await
            {
                let mut state = self.inner.state.lock().unwrap();
                state.hand_off_or_idle(entry_id, self.now());
            }
        }
    }

    /// Reject new acquires, wait for in-use entries up to `drain_deadline`,
    /// then destroy every remaining entry. Idempotent.
    pub async fn close(&self, drain_deadline: Duration) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.waiters.clear(); // senders dropped -> receivers see PoolClosed
        }

        let deadline = self.now() + drain_deadline;
        while self.now() < deadline {
            let still_in_use = {
                let state = self.inner.state.lock().unwrap();
                state
                    .entries
                    .values()
                    .any(|e| e.state == EntryState::InUse)
            };
            if !still_in_use {
                break;
            }
            self.inner.clock.sleep(Duration::from_millis(10)).await;
        }

        let remaining: Vec<_> = {
            let mut state = self.inner.state.lock().unwrap();
            state
                .entries
                .drain()
                .filter_map(|(_, e)| e.conn)
                .collect()
        };

        for conn in remaining {
            self.inner.size.release_one();
            self.inner.metrics.on_destroyed();
            self.inner.user_metrics.connection_destroyed();
            let _ = conn.close().await;
        }

        if let Some(handle) = self.inner.housekeeper.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.closed_notify.notify_waiters();
    }

    /// A consistent snapshot of the pool's counters, gauges, and the
    /// circuit breaker's current state.
    pub fn snapshot(&self) -> (PoolMetricsSnapshot, CircuitBreakerSnapshot) {
        let state = self.inner.state.lock().unwrap();
        let count_u32 = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let active = count_u32(
            state
                .entries
                .values()
                .filter(|e| e.state == EntryState::InUse)
                .count(),
        );
        let idle = count_u32(state.idle.len());
        let waiting = count_u32(state.waiters.len());
        self.inner.metrics.set_gauges(active, idle, waiting);
        (self.inner.metrics.snapshot(), state.breaker.snapshot())
    }

    pub(crate) fn housekeeping_pass(&self, now: Instant) {
        housekeeper::run_pass(self, now);
    }

    pub(crate) fn options(&self) -> &PoolOptions<F> {
        &self.inner.options
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn size(&self) -> &PoolSize {
        &self.inner.size
    }

    pub(crate) fn state(&self) -> &Mutex<PoolState<F::Connection>> {
        &self.inner.state
    }

    pub(crate) fn adaptive(&self) -> &AdaptiveSizing {
        &self.inner.adaptive
    }
}

/// A cheap, cloneable handle back to the pool, held by each outstanding
/// lease so it can release itself on drop without needing a full `Pool`.
pub(crate) struct PoolHandle<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for PoolHandle<F> {
    fn clone(&self) -> Self {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> PoolHandle<F> {
    pub(crate) fn as_pool(&self) -> Pool<F> {
        Pool {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Type-erases the connection factory so [`crate::connection::PoolConnection`]
/// can hold a handle back to its owning pool while being generic only over
/// the connection type `C = F::Connection`, not over `F` itself, avoiding a
/// cyclic pool<->entry reference.
pub(crate) trait ReleaseSink<C>: Send + Sync {
    fn release(
        &self,
        entry_id: EntryId,
        token: u64,
        conn: C,
        outcome: ReleaseOutcome,
        hook_ctx: Option<HookCtx>,
    ) -> BoxFuture<'static, ()>;
}

impl<F> ReleaseSink<F::Connection> for PoolHandle<F>
where
    F: ConnectionFactory,
{
    fn release(
        &self,
        entry_id: EntryId,
        token: u64,
        conn: F::Connection,
        outcome: ReleaseOutcome,
        hook_ctx: Option<HookCtx>,
    ) -> BoxFuture<'static, ()> {
        let pool = self.as_pool();
        Box::pin(async move {
            pool.release_leased(entry_id, token, conn, outcome, hook_ctx)
                .await;
        })
    }
}

enum Taken {
    Fresh(EntryId, u64),
    Candidate(EntryId, u64),
}

enum ValidationOutcome {
    /// Carries the actual validation failure (or timeout) so it can be
    /// surfaced as `Error::ValidationFailed`'s `last_cause` if every retry
    /// is exhausted, rather than a fabricated, unrelated cause.
    Retry(Box<dyn std::error::Error + Send + Sync>),
    Fatal(Error),
}

/// Log `msg` at `level`, or not at all if the application has configured
/// `acquire_slow_level` to `Off`.
fn log_at(level: log::LevelFilter, msg: &str) {
    let level = match level {
        log::LevelFilter::Off => return,
        log::LevelFilter::Error => log::Level::Error,
        log::LevelFilter::Warn => log::Level::Warn,
        log::LevelFilter::Info => log::Level::Info,
        log::LevelFilter::Debug => log::Level::Debug,
        log::LevelFilter::Trace => log::Level::Trace,
    };
    log::log!(level, "{msg}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquifer_test::MockFactory;

    fn pool_with(max: u32) -> Pool<MockFactory> {
        PoolOptions::new()
            .max_connections(max)
            .connection_timeout(Duration::from_secs(1))
            .connect_lazy(MockFactory::new())
            .unwrap()
    }

    #[tokio::test]
    async fn cancelling_a_parked_waiter_does_not_leak_the_granted_entry() {
        let pool = pool_with(1);
        let held = pool.acquire().await.unwrap();

        let waiting = pool.clone();
        let waiter = tokio::spawn(async move { waiting.acquire().await });
        tokio::task::yield_now().await;

        // Cancel before the waiter is ever granted anything.
        waiter.abort();
        let _ = waiter.await;

        held.release().await;

        let (metrics, _) = pool.snapshot();
        assert_eq!(metrics.active, 0);
        assert_eq!(metrics.idle, 1, "the only entry must come back to idle, not leak");
    }

    /// A scaled-down multi-waiter cascade: waiters are fulfilled strictly
    /// in enqueue order, and a cancelled waiter in the middle of the queue
    /// is skipped rather than stalling the ones behind it.
    #[tokio::test]
    async fn waiters_are_served_fifo_skipping_a_cancelled_one() {
        let pool = pool_with(1);
        let held = pool.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let p1 = pool.clone();
        let w1 = tokio::spawn(async move { p1.acquire().await.unwrap() });
        tokio::task::yield_now().await;

        let p2 = pool.clone();
        let w2 = tokio::spawn(async move { p2.acquire().await });
        tokio::task::yield_now().await;
        w2.abort();
        let _ = w2.await;

        let p3 = pool.clone();
        let w3 = tokio::spawn(async move { p3.acquire().await.unwrap() });
        tokio::task::yield_now().await;

        held.release().await;
        let c1 = w1.await.unwrap();
        order.lock().unwrap().push(1);
        c1.release().await;

        let c3 = w3.await.unwrap();
        order.lock().unwrap().push(3);
        c3.release().await;

        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }
}
