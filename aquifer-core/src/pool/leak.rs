use super::entry::EntryId;
use crate::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Arms a one-shot timer on acquire; if it fires before the matching
/// [`LeakGuard`] is dropped (i.e. before release), a diagnostic is logged.
/// Never forcibly reclaims the entry.
pub(crate) struct LeakDetector {
    threshold: Option<Duration>,
}

impl LeakDetector {
    pub fn new(threshold: Option<Duration>) -> Self {
        LeakDetector { threshold }
    }

    /// Arm the timer for a freshly granted lease. Returns `None` when leak
    /// detection is disabled (the default).
    pub fn arm(&self, entry_id: EntryId, clock: &Arc<dyn Clock>) -> Option<LeakGuard> {
        let threshold = self.threshold?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let task_cancelled = Arc::clone(&cancelled);
        let sleep = clock.sleep(threshold);

        tokio::spawn(async move {
            sleep.await;
            if !task_cancelled.load(Ordering::Acquire) {
                log::warn!(
                    "connection leak detected: entry {entry_id} has been leased for at least \
                     {threshold:?} without being released"
                );
            }
        });

        Some(LeakGuard { cancelled })
    }
}

/// Dropped when the lease releases; suppresses the leak diagnostic if the
/// timer has not fired yet.
pub(crate) struct LeakGuard {
    cancelled: Arc<AtomicBool>,
}

impl Drop for LeakGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
