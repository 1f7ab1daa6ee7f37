use std::time::{Duration, Instant};

const INITIAL_OPEN_DELAY: Duration = Duration::from_secs(30);
const MAX_OPEN_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Three-state failure gate guarding the factory against cascading
/// failure: CLOSED allows creation; after `failure_threshold` consecutive
/// failures it trips OPEN, rejecting creation attempts without touching
/// the factory; after `open_delay` it allows a single HALF_OPEN probe.
pub(crate) struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    failure_threshold: u32,
    opened_at: Option<Instant>,
    next_retry_at: Option<Instant>,
    open_delay: Duration,
    half_open_probe_in_flight: bool,
}

/// What the pool should do right now, per the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakerDecision {
    /// Proceed with a normal creation attempt.
    Permit,
    /// Proceed, but this attempt is the sole HALF_OPEN probe; its outcome
    /// drives the next transition.
    PermitProbe,
    /// Refuse; fail the caller with `CircuitOpen` without calling the
    /// factory.
    Reject,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerSnapshot {
    pub state: &'static str,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub next_retry_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32) -> Self {
        CircuitBreaker {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            opened_at: None,
            next_retry_at: None,
            open_delay: INITIAL_OPEN_DELAY,
            half_open_probe_in_flight: false,
        }
    }

    /// Called under the pool lock before attempting a creation.
    pub fn decide(&mut self, now: Instant) -> BreakerDecision {
        match self.state {
            BreakerState::Closed => BreakerDecision::Permit,
            BreakerState::Open => {
                let ready = self.next_retry_at.is_some_and(|t| now >= t);
                if !ready {
                    return BreakerDecision::Reject;
                }
                self.state = BreakerState::HalfOpen;
                self.half_open_probe_in_flight = true;
                BreakerDecision::PermitProbe
            }
            BreakerState::HalfOpen => {
                if self.half_open_probe_in_flight {
                    BreakerDecision::Reject
                } else {
                    // Re-entered HALF_OPEN without an in-flight probe
                    // (shouldn't normally happen, but stay safe).
                    self.half_open_probe_in_flight = true;
                    BreakerDecision::PermitProbe
                }
            }
        }
    }

    /// Creation (or probe) succeeded: reset to CLOSED.
    pub fn on_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.next_retry_at = None;
        self.open_delay = INITIAL_OPEN_DELAY;
        self.half_open_probe_in_flight = false;
    }

    /// Creation (or probe) failed. Callers skip this entirely for
    /// permanent failures (bad credentials, unknown database) so a
    /// misconfigured factory doesn't trip the breaker and mask the
    /// underlying error behind `CircuitOpen` on every subsequent acquire.
    pub fn on_failure(&mut self, now: Instant) {
        match self.state {
            BreakerState::HalfOpen => {
                self.half_open_probe_in_flight = false;
                self.open_delay = (self.open_delay * 2).min(MAX_OPEN_DELAY);
                self.trip(now);
            }
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.trip(now);
                }
            }
            BreakerState::Open => {
                // Another failure while open (e.g. a stray direct call);
                // no-op, the existing backoff window still applies.
            }
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.next_retry_at = Some(now + self.open_delay);
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: match self.state {
                BreakerState::Closed => "CLOSED",
                BreakerState::Open => "OPEN",
                BreakerState::HalfOpen => "HALF_OPEN",
            },
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
            next_retry_at: self.next_retry_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_and_reopens_on_schedule() {
        let mut breaker = CircuitBreaker::new(5);
        let t0 = Instant::now();

        for _ in 0..4 {
            assert_eq!(breaker.decide(t0), BreakerDecision::Permit);
            breaker.on_failure(t0);
        }
        assert_eq!(breaker.decide(t0), BreakerDecision::Permit);
        breaker.on_failure(t0);

        assert_eq!(breaker.decide(t0), BreakerDecision::Reject);

        let t1 = t0 + INITIAL_OPEN_DELAY;
        assert_eq!(breaker.decide(t1), BreakerDecision::PermitProbe);
        // A second concurrent attempt must not also get a probe slot.
        assert_eq!(breaker.decide(t1), BreakerDecision::Reject);

        breaker.on_success();
        assert_eq!(breaker.decide(t1), BreakerDecision::Permit);
    }

    #[test]
    fn doubles_delay_on_failed_probe_up_to_cap() {
        let mut breaker = CircuitBreaker::new(1);
        let mut now = Instant::now();
        breaker.decide(now);
        breaker.on_failure(now);

        for _ in 0..10 {
            now = breaker.next_retry_at.unwrap_or(now);
            assert_eq!(breaker.decide(now), BreakerDecision::PermitProbe);
            breaker.on_failure(now);
        }

        assert_eq!(breaker.open_delay, MAX_OPEN_DELAY);
    }
}
