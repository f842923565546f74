//! Shared time base

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Local wall clock in seconds since the UNIX epoch
#[must_use]
pub fn local_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Wall clock corrected by a measured skew
///
/// Both peers express meeting times in this time base, so two hosts with
/// different local clocks still start punching at the same instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncedClock {
    skew_ms: f64,
}

impl SyncedClock {
    /// Clock corrected by `skew_ms` (local minus reference)
    #[must_use]
    pub const fn new(skew_ms: f64) -> Self {
        Self { skew_ms }
    }

    /// Uncorrected clock, for peers that share a host
    #[must_use]
    pub const fn local() -> Self {
        Self::new(0.0)
    }

    /// Measured skew in milliseconds
    #[must_use]
    pub const fn skew_ms(&self) -> f64 {
        self.skew_ms
    }

    /// Current time in the shared time base
    #[must_use]
    pub fn now(&self) -> f64 {
        local_now() - self.skew_ms / 1000.0
    }

    /// Time left until `at`, zero if it already passed
    #[must_use]
    pub fn until(&self, at: f64) -> Duration {
        let left = at - self.now();
        if left.is_finite() && left > 0.0 {
            Duration::from_secs_f64(left)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_applied() {
        let ahead = SyncedClock::new(2000.0);
        let local = SyncedClock::local();
        let diff = local.now() - ahead.now();
        assert!((diff - 2.0).abs() < 0.1, "diff {diff}");
    }

    #[test]
    fn test_until() {
        let clock = SyncedClock::local();
        assert_eq!(clock.until(clock.now() - 5.0), Duration::ZERO);
        let left = clock.until(clock.now() + 1.0);
        assert!(left > Duration::from_millis(900) && left <= Duration::from_secs(1));
    }
}
