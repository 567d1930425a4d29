//! Circuit breaker over consecutive failing ticks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakerState {
    /// Ticks run normally.
    Closed { failures: u32 },
    /// Ticks are skipped until the cool-down has been slept.
    Open { opened_at: DateTime<Utc> },
    /// Cool-down slept. The counter restarts from zero on the next tick.
    HalfOpen,
}

/// Trips after `threshold` consecutive failing ticks.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: BreakerState,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: BreakerState::Closed { failures: 0 },
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }

    /// Consecutive failures counted toward the threshold.
    pub fn consecutive_failures(&self) -> u32 {
        match self.state {
            BreakerState::Closed { failures } => failures,
            BreakerState::Open { .. } => self.threshold,
            BreakerState::HalfOpen => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self.state {
            BreakerState::Closed { .. } => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    /// Record a tick's result. Returns true when this call tripped the breaker.
    pub fn record(&mut self, failed: bool, now: DateTime<Utc>) -> bool {
        match (self.state, failed) {
            (BreakerState::Closed { .. }, false) => {
                self.state = BreakerState::Closed { failures: 0 };
                false
            }
            (BreakerState::Closed { failures }, true) => {
                let failures = failures + 1;
                if failures >= self.threshold {
                    warn!(failures, "Circuit breaker opened");
                    self.state = BreakerState::Open { opened_at: now };
                    true
                } else {
                    self.state = BreakerState::Closed { failures };
                    false
                }
            }
            (BreakerState::HalfOpen, false) => {
                info!("Circuit breaker closed");
                self.state = BreakerState::Closed { failures: 0 };
                false
            }
            (BreakerState::HalfOpen, true) => {
                // A fresh run of failures is needed to trip again.
                let tripped = self.threshold <= 1;
                if tripped {
                    warn!("Circuit breaker opened");
                    self.state = BreakerState::Open { opened_at: now };
                } else {
                    self.state = BreakerState::Closed { failures: 1 };
                }
                tripped
            }
            // Ticks do not run while open.
            (BreakerState::Open { .. }, _) => false,
        }
    }

    /// Move from open to half-open once the cool-down has been slept.
    pub fn cooled_down(&mut self) {
        if self.is_open() {
            self.state = BreakerState::HalfOpen;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(3600))
    }

    #[test]
    fn test_counts_failures_until_threshold() {
        let mut b = breaker();
        let now = Utc::now();
        for expected in 1..=4 {
            assert!(!b.record(true, now));
            assert_eq!(b.consecutive_failures(), expected);
        }
        assert!(b.record(true, now));
        assert!(b.is_open());
        assert_eq!(b.state(), BreakerState::Open { opened_at: now });
    }

    #[test]
    fn test_success_resets_counter() {
        let mut b = breaker();
        let now = Utc::now();
        b.record(true, now);
        b.record(true, now);
        b.record(false, now);
        assert_eq!(b.consecutive_failures(), 0);
        assert_eq!(b.label(), "closed");
    }

    #[test]
    fn test_half_open_transitions() {
        let mut b = CircuitBreaker::new(1, Duration::from_secs(60));
        let now = Utc::now();

        assert!(b.record(true, now));
        b.cooled_down();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.consecutive_failures(), 0);

        // With a threshold of one, a single failure trips again.
        assert!(b.record(true, now));
        assert!(b.is_open());

        b.cooled_down();
        assert!(!b.record(false, now));
        assert_eq!(b.state(), BreakerState::Closed { failures: 0 });
    }

    #[test]
    fn test_failure_after_cooldown_starts_a_fresh_count() {
        let mut b = breaker();
        let now = Utc::now();
        for _ in 0..5 {
            b.record(true, now);
        }
        b.cooled_down();

        assert!(!b.record(true, now));
        assert_eq!(b.state(), BreakerState::Closed { failures: 1 });
        for expected in 2..=4 {
            assert!(!b.record(true, now));
            assert_eq!(b.consecutive_failures(), expected);
        }
        assert!(b.record(true, now));
        assert!(b.is_open());
    }

    #[test]
    fn test_cooled_down_only_from_open() {
        let mut b = breaker();
        b.cooled_down();
        assert_eq!(b.state(), BreakerState::Closed { failures: 0 });
    }

    #[test]
    fn test_zero_threshold_is_raised() {
        let mut b = CircuitBreaker::new(0, Duration::from_secs(1));
        assert!(b.record(true, Utc::now()));
    }
}
