//! Wall-clock tick driver
//!
//! Produces elapsed-seconds deltas for `Registry::tick`. Timers advance
//! only through ticks, never through load or release calls, so eviction
//! timing stays independent of call-site frequency. Tests bypass this
//! and feed synthetic deltas straight into `tick`.

use std::time::Instant;

/// Measures real elapsed time between pump iterations
pub struct TickDriver {
    last: Instant,
}

impl TickDriver {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Seconds since the previous call (or construction)
    pub fn delta(&mut self) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        dt
    }
}

impl Default for TickDriver {
    fn default() -> Self {
        Self::new()
    }
}
