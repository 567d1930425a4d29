//! Virtual clock for driving the control loop in tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Mutex;
use std::time::Duration;

use crate::orchestrator::Clock;

/// Clock whose time only moves when something sleeps on it.
///
/// Sleeping advances the virtual time immediately and records the
/// duration, so cool-downs and idle waits finish instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::starting_at(start)
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::from_std(duration).unwrap_or_default();
        }
    }

    /// Every sleep requested so far, in order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total_slept(&self) -> Duration {
        self.recorded_sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
