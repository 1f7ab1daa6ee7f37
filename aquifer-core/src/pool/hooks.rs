use futures_core::future::BoxFuture;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

/// Bookkeeping handed to a lifecycle hook, mirroring what `PooledEntry`
/// already tracks.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct PoolConnectionMetadata {
    pub age: Duration,
    pub idle_for: Duration,
}

type BeforeAcquireFn<Conn, Ctx> =
    dyn Fn(&mut Conn, PoolConnectionMetadata) -> BoxFuture<'static, crate::Result<Ctx>>
        + Send
        + Sync;

type AfterReleaseFn<Conn, Ctx> =
    dyn Fn(Ctx, &mut Conn, PoolConnectionMetadata) -> BoxFuture<'static, crate::Result<()>>
        + Send
        + Sync;

/// Before/after callbacks run around each lease, typed in a user context
/// `Ctx` that `before_acquire` produces and `after_release` consumes. A
/// hook failure turns the release outcome BROKEN, destroying the entry;
/// the failure itself is surfaced to whichever call triggered the hook.
pub struct LifecycleHooks<Conn, Ctx> {
    before_acquire: Option<Arc<BeforeAcquireFn<Conn, Ctx>>>,
    after_release: Option<Arc<AfterReleaseFn<Conn, Ctx>>>,
}

impl<Conn, Ctx> Clone for LifecycleHooks<Conn, Ctx> {
    fn clone(&self) -> Self {
        LifecycleHooks {
            before_acquire: self.before_acquire.clone(),
            after_release: self.after_release.clone(),
        }
    }
}

impl<Conn, Ctx> Debug for LifecycleHooks<Conn, Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("before_acquire", &self.before_acquire.is_some())
            .field("after_release", &self.after_release.is_some())
            .finish()
    }
}

impl<Conn, Ctx> Default for LifecycleHooks<Conn, Ctx> {
    fn default() -> Self {
        LifecycleHooks {
            before_acquire: None,
            after_release: None,
        }
    }
}

impl<Conn, Ctx> LifecycleHooks<Conn, Ctx>
where
    Conn: Send + 'static,
    Ctx: Send + 'static,
{
    pub fn before_acquire<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Conn, PoolConnectionMetadata) -> BoxFuture<'static, crate::Result<Ctx>>
            + Send
            + Sync
            + 'static,
    {
        self.before_acquire = Some(Arc::new(hook));
        self
    }

    pub fn after_release<F>(mut self, hook: F) -> Self
    where
        F: Fn(Ctx, &mut Conn, PoolConnectionMetadata) -> BoxFuture<'static, crate::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.after_release = Some(Arc::new(hook));
        self
    }

    pub(crate) async fn run_before_acquire(
        &self,
        conn: &mut Conn,
        meta: PoolConnectionMetadata,
    ) -> crate::Result<Option<Ctx>> {
        match &self.before_acquire {
            Some(hook) => hook(conn, meta).await.map(Some),
            None => Ok(None),
        }
    }

    pub(crate) async fn run_after_release(
        &self,
        ctx: Option<Ctx>,
        conn: &mut Conn,
        meta: PoolConnectionMetadata,
    ) -> crate::Result<()> {
        match (&self.after_release, ctx) {
            (Some(hook), Some(ctx)) => hook(ctx, conn, meta).await,
            _ => Ok(()),
        }
    }
}
