//! A [`PoolMetricsCollector`] that records every event instead of
//! summarizing it, so the integration suite can assert on exact call
//! counts and phases rather than on `SimplePoolMetrics`'s smoothed
//! snapshot.

use aquifer_core::{AcquirePhase, PoolMetricsCollector};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct RecordingMetrics {
    acquire_called: AtomicU64,
    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    validation_failures: AtomicU64,
    timeouts: Mutex<Vec<AcquirePhase>>,
    acquire_latencies: Mutex<Vec<Duration>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_called_count(&self) -> u64 {
        self.acquire_called.load(Ordering::Relaxed)
    }

    pub fn connections_created(&self) -> u64 {
        self.connections_created.load(Ordering::Relaxed)
    }

    pub fn connections_destroyed(&self) -> u64 {
        self.connections_destroyed.load(Ordering::Relaxed)
    }

    pub fn validation_failures(&self) -> u64 {
        self.validation_failures.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> Vec<AcquirePhase> {
        self.timeouts.lock().unwrap().clone()
    }

    pub fn acquire_latencies(&self) -> Vec<Duration> {
        self.acquire_latencies.lock().unwrap().clone()
    }
}

impl PoolMetricsCollector for RecordingMetrics {
    fn acquire_called(&self) {
        self.acquire_called.fetch_add(1, Ordering::Relaxed);
    }

    fn acquire_timed_out(&self, phase: AcquirePhase) {
        self.timeouts.lock().unwrap().push(phase);
    }

    fn connection_acquired(&self, total_time: Duration) {
        self.acquire_latencies.lock().unwrap().push(total_time);
    }

    fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn validation_failed(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }
}
