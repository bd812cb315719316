//! Countdown to the next random event.

use serde::{Deserialize, Serialize};

/// Default number of world-advancing actions between random events.
pub const DEFAULT_EVENT_TIMER: u32 = 3;

/// Result of advancing the counter by one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterTick {
    /// Still counting down; carries the actions left.
    Counting(u32),
    /// The countdown ran out; a random event must be resolved this turn.
    /// The counter has already been reset.
    Triggered,
}

/// Countdown that fires a random event every `reset_value` actions.
///
/// Only world-advancing actions move it. Meta queries never touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounter {
    remaining: u32,
    reset_value: u32,
}

impl EventCounter {
    /// A fresh counter starting at `reset_value` (at least 1).
    pub fn new(reset_value: u32) -> Self {
        let reset_value = reset_value.max(1);
        Self {
            remaining: reset_value,
            reset_value,
        }
    }

    /// Restore a counter from saved values.
    pub fn restore(remaining: u32, reset_value: u32) -> Self {
        Self {
            remaining,
            reset_value: reset_value.max(1),
        }
    }

    /// Actions left before the next random event.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Value the countdown restarts from.
    pub fn reset_value(&self) -> u32 {
        self.reset_value
    }

    /// Count one world-advancing action.
    pub fn advance(&mut self) -> CounterTick {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.remaining = self.reset_value;
            CounterTick::Triggered
        } else {
            CounterTick::Counting(self.remaining)
        }
    }
}

impl Default for EventCounter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_TIMER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_down_then_triggers_and_resets() {
        let mut counter = EventCounter::new(3);
        assert_eq!(counter.advance(), CounterTick::Counting(2));
        assert_eq!(counter.advance(), CounterTick::Counting(1));
        assert_eq!(counter.advance(), CounterTick::Triggered);
        assert_eq!(counter.remaining(), 3);
    }

    #[test]
    fn test_wraparound_formula() {
        for reset in 1..=6u32 {
            let mut counter = EventCounter::new(reset);
            for n in 1..=20u32 {
                counter.advance();
                let expected = (reset + reset - (n % reset) - 1) % reset + 1;
                assert_eq!(counter.remaining(), expected, "reset={reset} n={n}");
                assert!(counter.remaining() >= 1);
            }
        }
    }

    #[test]
    fn test_reset_of_one_triggers_every_action() {
        let mut counter = EventCounter::new(1);
        assert_eq!(counter.advance(), CounterTick::Triggered);
        assert_eq!(counter.advance(), CounterTick::Triggered);
    }

    #[test]
    fn test_restored_zero_triggers_immediately() {
        let mut counter = EventCounter::restore(0, 4);
        assert_eq!(counter.advance(), CounterTick::Triggered);
        assert_eq!(counter.remaining(), 4);
    }

    #[test]
    fn test_zero_reset_is_clamped() {
        assert_eq!(EventCounter::new(0).reset_value(), 1);
        assert_eq!(EventCounter::restore(2, 0).reset_value(), 1);
    }
}
