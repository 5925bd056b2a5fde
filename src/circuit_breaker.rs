//! Circuit breaker (capability hook, §9): wraps store/outbox/projection critical calls so a
//! persistently failing dependency fails fast instead of piling up retries. Kept intentionally
//! small — none of the sibling examples pull in a dedicated circuit-breaker crate, so this is a
//! hand-rolled sliding-window implementation rather than a full feature.

use std::sync::Mutex;
use std::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a circuit is open and refusing calls, used by callers to decide whether to attempt an
/// operation at all.
pub trait CircuitBreaker: Send + Sync {
    fn allow_call(&self) -> bool;
    fn record_success(&self);
    fn record_failure(&self);
    fn state(&self) -> CircuitState;
}

struct Window {
    calls: Vec<(Instant, bool)>,
}

/// A fixed-size sliding window of recent call outcomes, transitioning Closed → Open when the
/// failure rate over the window exceeds the configured threshold, and Open → HalfOpen after
/// `wait_duration_in_open_state` elapses.
pub struct SlidingWindowCircuitBreaker {
    config: CircuitBreakerConfig,
    window: Mutex<Window>,
    opened_at: Mutex<Option<Instant>>,
}

impl SlidingWindowCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window { calls: Vec::new() }),
            opened_at: Mutex::new(None),
        }
    }

    fn prune(&self, window: &mut Window, now: Instant) {
        let cutoff = self.config.sliding_window_size();
        window.calls.retain(|(at, _)| now.duration_since(*at) <= cutoff);
    }

    fn failure_rate(&self, window: &Window) -> f64 {
        if window.calls.is_empty() {
            return 0.0;
        }
        let failures = window.calls.iter().filter(|(_, ok)| !ok).count();
        (failures as f64 / window.calls.len() as f64) * 100.0
    }

    fn record(&self, ok: bool) {
        if !self.config.enabled {
            return;
        }

        let now = Instant::now();
        let mut window = self.window.lock().unwrap();
        self.prune(&mut window, now);
        window.calls.push((now, ok));

        if window.calls.len() as u32 >= self.config.minimum_number_of_calls && self.failure_rate(&window) >= self.config.failure_rate_threshold {
            *self.opened_at.lock().unwrap() = Some(now);
        } else if ok {
            // A successful half-open probe closes the circuit again.
            *self.opened_at.lock().unwrap() = None;
        }
    }
}

impl CircuitBreaker for SlidingWindowCircuitBreaker {
    fn allow_call(&self) -> bool {
        if !self.config.enabled {
            return true;
        }

        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        }
    }

    fn record_success(&self) {
        self.record(true);
    }

    fn record_failure(&self) {
        self.record(false);
    }

    fn state(&self) -> CircuitState {
        let Some(opened_at) = *self.opened_at.lock().unwrap() else {
            return CircuitState::Closed;
        };

        if opened_at.elapsed() >= self.config.wait_duration_in_open_state() {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }
}

/// Always-closed breaker, used when `circuit_breaker.enabled = false` or in tests that don't care
/// about this capability.
pub struct NoopCircuitBreaker;

impl CircuitBreaker for NoopCircuitBreaker {
    fn allow_call(&self) -> bool {
        true
    }

    fn record_success(&self) {}

    fn record_failure(&self) {}

    fn state(&self) -> CircuitState {
        CircuitState::Closed
    }
}
