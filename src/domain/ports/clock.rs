//! Kernel clock port.
//!
//! A single logical clock drives every timestamp the kernel writes.
//! `utc_now` never goes backwards in-process, so entity `updated_at`
//! fields and journal `occurred_at` stamps are monotonic.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Timezone-aware UTC time source.
pub trait Clock: Send + Sync {
    /// Current UTC time, clamped so repeated calls never go backwards.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation with a monotonic clamp.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let clamped = match *last {
            Some(prev) if now < prev => prev,
            _ => now,
        };
        *last = Some(clamped);
        clamped
    }
}

/// Hand-advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if to > *now {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let mut prev = clock.utc_now();
        for _ in 0..1000 {
            let next = clock.utc_now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::starting_at(start);
        assert_eq!(clock.utc_now(), start);
        clock.advance(Duration::seconds(61));
        assert_eq!(clock.utc_now(), start + Duration::seconds(61));
    }

    #[test]
    fn test_manual_clock_set_never_rewinds() {
        let start = Utc::now();
        let clock = ManualClock::starting_at(start);
        clock.set(start - Duration::seconds(10));
        assert_eq!(clock.utc_now(), start);
    }
}
