//! Rolling sample-rate accounting.

use tokio::time::Instant;

/// Running mean of the instantaneous rate `1000 / dt_ms` between accepted
/// samples. Frames dropped by the filter do not count.
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    rate_hz: f64,
    samples: u64,
    last: Option<Instant>,
}

impl RateTracker {
    /// A tracker with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample accepted at `now`.
    pub fn record(&mut self, now: Instant) {
        if let Some(last) = self.last {
            let dt_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            if dt_ms > 0.0 {
                let n = self.samples as f64;
                self.rate_hz = ((self.rate_hz * n) + 1000.0 / dt_ms) / (n + 1.0);
                self.samples += 1;
            }
        }
        self.last = Some(now);
    }

    /// Current mean rate, 0 until two samples have been recorded.
    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    /// Forget all history, e.g. on entering `Ready`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_steady_rate() {
        let start = Instant::now();
        let mut tracker = RateTracker::new();
        for i in 0..11 {
            tracker.record(start + Duration::from_millis(100 * i));
        }
        assert!((tracker.rate_hz() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_of_intervals() {
        let start = Instant::now();
        let mut tracker = RateTracker::new();
        tracker.record(start);
        tracker.record(start + Duration::from_millis(100)); // 10 Hz
        tracker.record(start + Duration::from_millis(300)); // 5 Hz
        assert!((tracker.rate_hz() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_and_duplicate_instants() {
        let start = Instant::now();
        let mut tracker = RateTracker::new();
        tracker.record(start);
        tracker.record(start);
        assert_eq!(tracker.rate_hz(), 0.0);

        tracker.record(start + Duration::from_millis(50));
        assert!(tracker.rate_hz() > 0.0);
        tracker.reset();
        assert_eq!(tracker.rate_hz(), 0.0);
    }
}
