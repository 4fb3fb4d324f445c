//! Time source port.
//!
//! The engine reads the clock exactly once, to seed the PoH chain when
//! deterministic mode is off. Everything else derives time from ticks.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Nanosecond counter collaborator.
pub trait Clock: Send + Sync {
    fn unix_nanos(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}

/// Fixed-step clock for reproducible runs. Every read advances by `step`.
#[derive(Debug)]
pub struct SimulatedClock {
    inner: Mutex<SimulatedState>,
}

#[derive(Debug)]
struct SimulatedState {
    now: i64,
    step: i64,
}

impl SimulatedClock {
    pub fn new(start: i64, step: i64) -> Self {
        Self {
            inner: Mutex::new(SimulatedState { now: start, step }),
        }
    }
}

impl Clock for SimulatedClock {
    fn unix_nanos(&self) -> i64 {
        let mut state = self.inner.lock();
        state.now += state.step;
        state.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_clock_steps_forward() {
        let clock = SimulatedClock::new(100, 10);
        assert_eq!(clock.unix_nanos(), 110);
        assert_eq!(clock.unix_nanos(), 120);
    }

    #[test]
    fn system_clock_is_nonzero() {
        assert!(SystemClock.unix_nanos() > 0);
    }
}
