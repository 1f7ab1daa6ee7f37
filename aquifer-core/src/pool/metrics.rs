use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which phase of `acquire` a metrics event pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquirePhase {
    /// Parked behind the waiter queue.
    Waiting,
    /// Running the validator against a candidate entry.
    Validating,
    /// Waiting on the factory to establish a new connection.
    Connecting,
    /// Waiting on the circuit breaker's backoff window.
    Backoff,
}

/// Pluggable observer invoked at each phase of `acquire`. The pool always
/// has one installed (a no-op `()` by default); `SimplePoolMetrics`
/// provides an EWMA-based implementation good enough for most
/// applications without requiring a full metrics backend.
pub trait PoolMetricsCollector: Send + Sync + 'static {
    fn acquire_called(&self) {}
    fn permit_wait_time(&self, _wait: Duration) {}
    fn acquire_timed_out(&self, _phase: AcquirePhase) {}
    fn connection_acquired(&self, _total_time: Duration) {}
    fn connection_created(&self) {}
    fn connection_destroyed(&self) {}
    fn validation_failed(&self) {}
}

impl PoolMetricsCollector for () {}

impl<T: PoolMetricsCollector + ?Sized> PoolMetricsCollector for Arc<T> {
    fn acquire_called(&self) {
        (**self).acquire_called();
    }
    fn permit_wait_time(&self, wait: Duration) {
        (**self).permit_wait_time(wait);
    }
    fn acquire_timed_out(&self, phase: AcquirePhase) {
        (**self).acquire_timed_out(phase);
    }
    fn connection_acquired(&self, total_time: Duration) {
        (**self).connection_acquired(total_time);
    }
    fn connection_created(&self) {
        (**self).connection_created();
    }
    fn connection_destroyed(&self) {
        (**self).connection_destroyed();
    }
    fn validation_failed(&self) {
        (**self).validation_failed();
    }
}

/// A point-in-time read of the pool's counters, gauges, and acquisition
/// latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetricsSnapshot {
    pub total_created: u64,
    pub total_destroyed: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_timeouts: u64,
    pub total_validation_failures: u64,
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
    pub acquire_latency: LatencySummary,
}

/// EWMA-smoothed latency summary (min/avg/max), computed the same way
/// regardless of which percentile is requested since a single exponential
/// average is tracked rather than a full histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySummary {
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
}

/// Lock-free counters backing [`PoolMetricsSnapshot`], plus an
/// EWMA-smoothed acquisition-latency tracker.
pub(crate) struct SimplePoolMetrics {
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
    total_acquired: AtomicU64,
    total_released: AtomicU64,
    total_timeouts: AtomicU64,
    total_validation_failures: AtomicU64,
    active: AtomicU64,
    idle: AtomicU64,
    waiting: AtomicU64,
    latency: AtomicTiming,
}

/// EWMA coefficient: each new sample contributes 1/8th of the weight,
/// matching the smoothing used for TCP RTT estimation — responsive enough
/// to reflect recent load without being noisy on a single slow acquire.
const EMA_COEFFICIENT: f64 = 0.125;

struct AtomicTiming {
    min_nanos: AtomicU64,
    avg_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl AtomicTiming {
    fn new() -> Self {
        AtomicTiming {
            min_nanos: AtomicU64::new(u64::MAX),
            avg_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
        }
    }

    fn record(&self, sample: Duration) {
        let nanos = u64::try_from(sample.as_nanos()).unwrap_or(u64::MAX);

        let _ = self
            .min_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.min(nanos))
            });
        let _ = self
            .max_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.max(nanos))
            });
        let _ = self
            .avg_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                // EWMA in floating point, clamped back into range: the
                // inputs are nanosecond durations, always non-negative and
                // far below u64::MAX, so this never actually saturates.
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let blended = (cur as f64 + EMA_COEFFICIENT * (nanos as f64 - cur as f64)) as u64;
                Some(blended)
            });
    }

    fn summary(&self) -> LatencySummary {
        let min = self.min_nanos.load(Ordering::Acquire);
        LatencySummary {
            min: Duration::from_nanos(if min == u64::MAX { 0 } else { min }),
            avg: Duration::from_nanos(self.avg_nanos.load(Ordering::Acquire)),
            max: Duration::from_nanos(self.max_nanos.load(Ordering::Acquire)),
        }
    }
}

impl SimplePoolMetrics {
    pub fn new() -> Self {
        SimplePoolMetrics {
            total_created: AtomicU64::new(0),
            total_destroyed: AtomicU64::new(0),
            total_acquired: AtomicU64::new(0),
            total_released: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
            total_validation_failures: AtomicU64::new(0),
            active: AtomicU64::new(0),
            idle: AtomicU64::new(0),
            waiting: AtomicU64::new(0),
            latency: AtomicTiming::new(),
        }
    }

    pub fn on_created(&self) {
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_destroyed(&self) {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_acquired(&self, latency: Duration) {
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        self.latency.record(latency);
    }

    pub fn on_released(&self) {
        self.total_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_timeout(&self) {
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_validation_failed(&self) {
        self.total_validation_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_gauges(&self, active: u32, idle: u32, waiting: u32) {
        self.active.store(u64::from(active), Ordering::Relaxed);
        self.idle.store(u64::from(idle), Ordering::Relaxed);
        self.waiting.store(u64::from(waiting), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            total_validation_failures: self.total_validation_failures.load(Ordering::Relaxed),
            active: u32::try_from(self.active.load(Ordering::Relaxed)).unwrap_or(u32::MAX),
            idle: u32::try_from(self.idle.load(Ordering::Relaxed)).unwrap_or(u32::MAX),
            waiting: u32::try_from(self.waiting.load(Ordering::Relaxed)).unwrap_or(u32::MAX),
            acquire_latency: self.latency.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_min_avg_max() {
        let timing = AtomicTiming::new();
        timing.record(Duration::from_millis(10));
        timing.record(Duration::from_millis(30));
        timing.record(Duration::from_millis(20));

        let summary = timing.summary();
        assert_eq!(summary.min, Duration::from_millis(10));
        assert_eq!(summary.max, Duration::from_millis(30));
        assert!(summary.avg >= Duration::from_millis(10) && summary.avg <= Duration::from_millis(30));
    }
}
