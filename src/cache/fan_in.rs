//! Fan-in aggregation for dependency loads
//!
//! A pack load waits for its own image fetch plus one slot per
//! dependency. The group fires exactly once, after every slot has
//! signaled, with the AND of all results. It deliberately keeps
//! accepting signals after an early failure: firing early would leave
//! in-flight dependency loads completing into a dead group.
//!
//! No locking: all signals are delivered on the registry thread.

/// Counter-based fan-in over a fixed number of slots
#[derive(Debug)]
pub struct FanIn {
    expected: usize,
    received: usize,
    all_ok: bool,
    signaled: Vec<bool>,
}

impl FanIn {
    /// Create a group expecting `expected` signals
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            received: 0,
            all_ok: true,
            signaled: vec![false; expected],
        }
    }

    /// Record the result for one slot.
    ///
    /// Returns `Some(aggregate)` when this was the final outstanding
    /// slot, `None` otherwise. Signaling the same slot twice is a
    /// programming defect, not an expected failure.
    pub fn signal(&mut self, slot: usize, success: bool) -> Option<bool> {
        debug_assert!(slot < self.expected, "fan-in slot {} out of range", slot);
        debug_assert!(!self.signaled[slot], "fan-in slot {} signaled twice", slot);

        self.signaled[slot] = true;
        self.received += 1;
        self.all_ok &= success;

        if self.received == self.expected {
            Some(self.all_ok)
        } else {
            None
        }
    }

    /// Whether every slot has signaled
    pub fn is_complete(&self) -> bool {
        self.received == self.expected
    }

    /// Number of slots still outstanding
    pub fn outstanding(&self) -> usize {
        self.expected - self.received
    }
}
