use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct Inner {
    size: AtomicU32,
    max_size: u32,
}

/// Tracks `total = |entries not CLOSED| + creating` against `max_connections`,
/// reserving a slot with a single atomic op so the pool lock never has to be
/// held across a factory call. The guard owns its state via `Arc` so a
/// reservation can be carried across an `.await` without borrowing from
/// the pool's own lock guard.
#[derive(Clone)]
pub(crate) struct PoolSize(Arc<Inner>);

pub(crate) struct IncreaseGuard(DecreaseOnDrop);

pub(crate) struct DecreaseOnDrop {
    inner: Arc<Inner>,
    dropped: bool,
}

impl PoolSize {
    pub fn new(max_size: u32) -> Self {
        PoolSize(Arc::new(Inner {
            size: AtomicU32::new(0),
            max_size,
        }))
    }

    pub fn current(&self) -> u32 {
        self.0.size.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u32 {
        self.0.max_size
    }

    /// Reserve one slot, returning `None` if the pool is already at
    /// `max_size`.
    pub fn try_increase(&self) -> Option<IncreaseGuard> {
        let mut size = self.current();

        while size < self.0.max_size {
            match self.0.size.compare_exchange_weak(
                size,
                size + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(IncreaseGuard(self.decrease_on_drop())),
                Err(observed) => size = observed,
            }
        }

        None
    }

    /// Manually account for the destruction of an entry whose reservation
    /// was already `commit()`-ed (and so is no longer tracked by a guard).
    pub fn release_one(&self) {
        self.0.size.fetch_sub(1, Ordering::AcqRel);
    }

    fn decrease_on_drop(&self) -> DecreaseOnDrop {
        DecreaseOnDrop {
            inner: Arc::clone(&self.0),
            dropped: false,
        }
    }
}

impl IncreaseGuard {
    /// The reservation is now backed by a real entry in the map; cancel the
    /// automatic decrement (the entry's own destruction will call
    /// [`PoolSize::release_one`] instead).
    pub fn commit(self) {
        self.0.cancel();
    }
}

impl DecreaseOnDrop {
    fn cancel(mut self) {
        self.dropped = true;
        mem::forget(self);
    }
}

impl Drop for DecreaseOnDrop {
    fn drop(&mut self) {
        assert!(!self.dropped, "double-dropped PoolSize guard");
        self.dropped = true;
        self.inner.size.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserves_up_to_max_and_releases_on_drop() {
        let size = PoolSize::new(2);
        let a = size.try_increase().unwrap();
        let b = size.try_increase().unwrap();
        assert_eq!(size.current(), 2);
        assert!(size.try_increase().is_none());

        drop(a);
        assert_eq!(size.current(), 1);

        b.commit();
        assert_eq!(size.current(), 1);
    }
}
