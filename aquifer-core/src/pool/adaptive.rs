//! Adaptive sizing: widens or narrows the idle eviction floor between
//! `min_connections` and `max_connections` based on an EWMA of the
//! waiter-queue depth observed on each housekeeping tick. Only the floor
//! moves here — creation stays lazy (driven by the normal acquire path
//! and `maybe_replenish`) and destruction stays deferred to idle eviction.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Same smoothing coefficient used for acquisition-latency tracking in
/// `metrics.rs`: each sample contributes 1/8th of the weight.
const EMA_COEFFICIENT: f64 = 0.125;

/// Grow the floor while the smoothed waiter count is at or above this
/// (sustained contention); shrink it back down once it falls below and
/// there is idle surplus above the current floor.
const GROW_THRESHOLD: f64 = 0.5;

pub(crate) struct AdaptiveSizing {
    ewma_waiting_bits: AtomicU64,
    floor: AtomicU32,
}

impl AdaptiveSizing {
    pub fn new(min_connections: u32) -> Self {
        AdaptiveSizing {
            ewma_waiting_bits: AtomicU64::new(0f64.to_bits()),
            floor: AtomicU32::new(min_connections),
        }
    }

    /// The current target floor. Reads back the min/max bounds each call so
    /// a configuration change (there is none at runtime today, but this
    /// keeps the invariant self-evidently true) can never leave it
    /// out-of-range.
    pub fn floor(&self, min_connections: u32, max_connections: u32) -> u32 {
        self.floor
            .load(Ordering::Relaxed)
            .clamp(min_connections, max_connections)
    }

    /// Observe one housekeeping tick's waiter/idle/active counts and
    /// retarget. Only called when `adaptive_sizing` is enabled.
    pub fn tick(
        &self,
        waiting: u32,
        idle: u32,
        active: u32,
        min_connections: u32,
        max_connections: u32,
    ) -> u32 {
        let prev = f64::from_bits(self.ewma_waiting_bits.load(Ordering::Relaxed));
        let sample = f64::from(waiting);
        let ewma = prev + EMA_COEFFICIENT * (sample - prev);
        self.ewma_waiting_bits.store(ewma.to_bits(), Ordering::Relaxed);

        let mut floor = self.floor(min_connections, max_connections);

        if ewma >= GROW_THRESHOLD && floor < max_connections {
            floor += 1;
        } else if ewma < GROW_THRESHOLD && floor > min_connections {
            // Only shrink while there's actually idle surplus above the
            // floor we'd be relaxing to — otherwise we'd chase the target
            // down while the pool is still under light, steady use.
            let wanted = floor.saturating_sub(1).saturating_sub(active);
            if idle > wanted {
                floor -= 1;
            }
        }

        let floor = floor.clamp(min_connections, max_connections);
        self.floor.store(floor, Ordering::Relaxed);
        floor
    }
}
