use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, calls pass through.
    Closed,
    /// Tripped; calls are rejected without touching the transport.
    Open,
    /// Probing recovery with a bounded number of calls.
    HalfOpen,
}

/// Tuning for a single per-host breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Minimum completed requests in the current interval before the
    /// trip condition is evaluated. Default 20.
    pub request_threshold: u32,
    /// Failure rate at or above which the breaker trips. Default 0.5.
    pub failure_rate_threshold: f64,
    /// How long an open breaker waits before probing. Default 45s.
    pub open_timeout: Duration,
    /// Probe budget in half-open state. Default 3.
    pub half_open_max: u32,
    /// Closed-state counters roll over after this interval. Default 30s.
    pub interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            request_threshold: 20,
            failure_rate_threshold: 0.5,
            open_timeout: Duration::from_secs(45),
            half_open_max: 3,
            interval: Duration::from_secs(30),
        }
    }
}

/// Snapshot of a breaker's counters for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    /// Current state.
    pub state: BreakerState,
    /// Completed requests in the current interval.
    pub requests: u32,
    /// Failures in the current interval.
    pub failures: u32,
    /// Failure rate over the current interval, 0.0 when idle.
    pub failure_rate: f64,
}

struct BreakerInner {
    state: BreakerState,
    requests: u32,
    failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    changed_at: Instant,
    interval_start: Instant,
}

/// Per-key circuit breaker guarding one `(method, host)` target.
///
/// One guarded execution equals one acquire/record pair: the resilient
/// layer acquires before running its retry loop and records the loop's
/// single outcome afterwards.
pub(crate) struct Breaker {
    inner: Mutex<BreakerInner>,
    config: BreakerConfig,
    name: String,
}

impl Breaker {
    pub(crate) fn new(name: String, config: BreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                requests: 0,
                failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                changed_at: now,
                interval_start: now,
            }),
            config,
            name,
        }
    }

    /// Whether a call may proceed. Open breakers refuse immediately;
    /// half-open breakers admit a bounded number of probes.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => {
                if now.duration_since(inner.interval_start) >= self.config.interval {
                    inner.requests = 0;
                    inner.failures = 0;
                    inner.interval_start = now;
                }
                true
            }
            BreakerState::Open => {
                if now.duration_since(inner.changed_at) >= self.config.open_timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen, now);
                    inner.half_open_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub(crate) fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => {
                inner.requests += 1;
            }
            BreakerState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.half_open_max {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub(crate) fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => {
                inner.requests += 1;
                inner.failures += 1;
                let rate = inner.failures as f64 / inner.requests as f64;
                if inner.requests >= self.config.request_threshold
                    && rate >= self.config.failure_rate_threshold
                {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open, now);
            }
            BreakerState::Open => {}
        }
    }

    pub(crate) fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Counter snapshot for the current interval.
    pub(crate) fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        let failure_rate = if inner.requests > 0 {
            inner.failures as f64 / inner.requests as f64
        } else {
            0.0
        };
        BreakerMetrics {
            state: inner.state,
            requests: inner.requests,
            failures: inner.failures,
            failure_rate,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState, now: Instant) {
        debug!(breaker = %self.name, from = ?inner.state, to = ?to, "breaker state transition");
        inner.state = to;
        inner.changed_at = now;
        inner.requests = 0;
        inner.failures = 0;
        inner.interval_start = now;
        if to != BreakerState::HalfOpen {
            inner.half_open_in_flight = 0;
        }
        inner.consecutive_successes = 0;
    }
}
