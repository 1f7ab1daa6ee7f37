//! The leased handle returned by [`crate::pool::Pool::acquire`][Pool::acquire]:
//! owns the underlying connection for the duration of the borrow and
//! returns it to the pool on every exit path, including an unwinding
//! panic.
//!
//! [Pool::acquire]: crate::pool::DataSource::acquire

use futures_core::future::BoxFuture;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::pool::{EntryId, HookCtx, ReleaseOutcome, ReleaseSink};

/// A connection checked out from a [`Pool`][crate::pool::Pool].
///
/// Derefs to the underlying connection type `C`. Dropping a `PoolConnection`
/// returns it to the pool in the background; call [`release`][Self::release]
/// or [`close`][Self::close] directly if the caller wants to wait for that
/// hand-off (or force destruction) rather than fire-and-forget it.
pub struct PoolConnection<C> {
    conn: Option<C>,
    releaser: Arc<dyn ReleaseSink<C>>,
    entry_id: EntryId,
    token: u64,
    hook_ctx: Option<HookCtx>,
    leak_guard: Option<crate::pool::LeakGuard>,
}

const DEREF_ERR: &str = "(bug) PoolConnection used after release";

impl<C> PoolConnection<C> {
    /// The stable id of the pooled entry backing this lease, unique for the
    /// lifetime of the pool. Useful in tests and diagnostics to tell
    /// whether two leases were handed the same underlying entry.
    pub fn id(&self) -> u64 {
        self.entry_id
    }

    pub(crate) fn new(
        conn: C,
        releaser: impl ReleaseSink<C> + 'static,
        entry_id: EntryId,
        token: u64,
        hook_ctx: Option<HookCtx>,
        leak_guard: Option<crate::pool::LeakGuard>,
    ) -> Self {
        PoolConnection {
            conn: Some(conn),
            releaser: Arc::new(releaser),
            entry_id,
            token,
            hook_ctx,
            leak_guard,
        }
    }

    /// Return the connection to the pool, recycling it for reuse. Waits for
    /// the `after_release` lifecycle hook (if one is configured) to finish.
    pub async fn release(mut self) {
        self.finish(ReleaseOutcome::Ok).await;
    }

    /// Return the connection to the pool, but mark it broken: the pool
    /// destroys it unconditionally instead of recycling it. Use this after
    /// observing an error on the connection that leaves its session state
    /// in doubt.
    pub async fn close(mut self) {
        self.finish(ReleaseOutcome::Broken).await;
    }

    async fn finish(&mut self, outcome: ReleaseOutcome) {
        self.leak_guard.take();
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.releaser
            .release(self.entry_id, self.token, conn, outcome, self.hook_ctx.take())
            .await;
    }
}

impl<C> Deref for PoolConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect(DEREF_ERR)
    }
}

impl<C> DerefMut for PoolConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect(DEREF_ERR)
    }
}

impl<C: fmt::Debug> fmt::Debug for PoolConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("entry_id", &self.entry_id)
            .field("conn", &self.conn)
            .finish()
    }
}

/// Returns the connection to the pool if the caller didn't already
/// explicitly [`release`][PoolConnection::release] or
/// [`close`][PoolConnection::close] it. `Drop` can't `.await`, so the actual
/// hand-off runs on a spawned task; from the caller's perspective the lease
/// ends the instant this returns.
impl<C: Send + 'static> Drop for PoolConnection<C> {
    fn drop(&mut self) {
        self.leak_guard.take();
        let Some(conn) = self.conn.take() else {
            return;
        };

        let releaser = Arc::clone(&self.releaser);
        let entry_id = self.entry_id;
        let token = self.token;
        let hook_ctx = self.hook_ctx.take();

        tokio::spawn(async move {
            releaser
                .release(entry_id, token, conn, ReleaseOutcome::Ok, hook_ctx)
                .await;
        });
    }
}
