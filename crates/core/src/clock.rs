//! Time source abstraction.
//!
//! Everything that compares against "now" (schedule validation, promotion,
//! backoff) reads the time through a [`Clock`] so tests can drive it by hand.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

/// Source of the current wall-clock instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Real system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Cloning shares the underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Clock starting at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += by;
        }
    }

    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_shared_instant() {
        let clock = ManualClock::starting_now();
        let other = clock.clone();
        let start = clock.now();

        other.advance_ms(1500);

        assert_eq!(clock.now() - start, Duration::milliseconds(1500));
    }

    #[test]
    fn system_clock_is_monotone_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
