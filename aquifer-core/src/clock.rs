//! Monotonic time and cancellable delays, injected rather than called
//! globally so tests can drive time deterministically (e.g. via
//! `tokio::time::pause`/`advance`, which `SystemClock` rides on top of).

use futures_core::future::BoxFuture;
use std::time::{Duration, Instant};

/// A source of monotonic time and sleeps, injected into the pool at
/// construction.
pub trait Clock: Send + Sync + 'static {
    /// The current instant, per this clock.
    fn now(&self) -> Instant;

    /// Sleep for `dur`. Must be cancel-safe: dropping the returned future
    /// before it resolves must not have any observable side effect.
    fn sleep(&self, dur: Duration) -> BoxFuture<'static, ()>;
}

/// The default [`Clock`], backed by the async runtime's own timer wheel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        // Going through `tokio::time::Instant` (rather than
        // `std::time::Instant::now()` directly) is what makes this clock
        // obey `tokio::time::pause`/`advance` in tests; the two `Instant`
        // types otherwise agree.
        tokio::time::Instant::now().into()
    }

    fn sleep(&self, dur: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(dur))
    }
}
