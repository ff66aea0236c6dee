//! Smoothed throughput estimation for a single destination port.
//!
//! Feeds one byte count per delivery cycle and keeps an exponentially
//! weighted bytes/second figure. Cycles that arrive closer together than
//! [`MIN_UPDATE_SECS`] are folded into the next update so bursts of tiny
//! cycles do not inflate the instantaneous rate.

use std::time::Instant;

use crate::config;

/// Shortest interval folded into a single smoothing step (seconds).
pub const MIN_UPDATE_SECS: f64 = 1e-3;

/// Exponentially smoothed bytes/second estimator.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    tau_secs: f64,
    smoothed_bps: f64,
    pending_bytes: u64,
    last_update: Instant,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(config::RATE_SMOOTHING_SECS)
    }
}

impl RateEstimator {
    pub fn new(tau_secs: f64) -> Self {
        Self::starting_at(tau_secs, Instant::now())
    }

    pub fn starting_at(tau_secs: f64, start: Instant) -> Self {
        Self {
            tau_secs,
            smoothed_bps: 0.0,
            pending_bytes: 0,
            last_update: start,
        }
    }

    /// Record `bytes` delivered now and return the updated estimate.
    pub fn new_packet(&mut self, bytes: usize) -> f64 {
        self.new_packet_at(bytes, Instant::now())
    }

    /// Record `bytes` delivered at `now` and return the updated estimate.
    pub fn new_packet_at(&mut self, bytes: usize, now: Instant) -> f64 {
        self.pending_bytes += bytes as u64;

        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        if dt < MIN_UPDATE_SECS {
            return self.smoothed_bps;
        }

        let alpha = 1.0 - (-dt / self.tau_secs).exp();
        let inst = self.pending_bytes as f64 / dt;
        self.smoothed_bps = self.smoothed_bps * (1.0 - alpha) + inst * alpha;
        self.pending_bytes = 0;
        self.last_update = now;
        self.smoothed_bps
    }

    /// Current estimate without recording anything.
    pub fn rate(&self) -> f64 {
        self.smoothed_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_steady_input_converges_to_true_rate() {
        let t0 = Instant::now();
        let mut est = RateEstimator::starting_at(1.0, t0);
        let mut rate = 0.0;
        for i in 1..=20 {
            rate = est.new_packet_at(1000, t0 + Duration::from_millis(500 * i));
        }
        // 1000 bytes every 0.5s = 2000 B/s
        assert!((rate - 2000.0).abs() < 1.0, "rate was {rate}");
    }

    #[test]
    fn test_zero_bytes_decays_monotonically() {
        let t0 = Instant::now();
        let mut est = RateEstimator::starting_at(1.0, t0);
        let mut prev = est.new_packet_at(4096, t0 + Duration::from_millis(100));
        assert!(prev > 0.0);
        for i in 2..=30 {
            let r = est.new_packet_at(0, t0 + Duration::from_secs(i));
            assert!(r <= prev, "rate increased from {prev} to {r}");
            prev = r;
        }
        assert!(prev < 1.0);
    }

    #[test]
    fn test_never_fed_bytes_stays_zero() {
        let t0 = Instant::now();
        let mut est = RateEstimator::starting_at(1.0, t0);
        for i in 1..=5 {
            assert_eq!(est.new_packet_at(0, t0 + Duration::from_secs(i)), 0.0);
        }
    }

    #[test]
    fn test_sub_millisecond_cycles_are_folded() {
        let t0 = Instant::now();
        let mut est = RateEstimator::starting_at(1.0, t0);
        let first = est.new_packet_at(500, t0 + Duration::from_micros(100));
        assert_eq!(first, 0.0);
        assert_eq!(est.rate(), 0.0);

        // The folded 500 bytes count toward the next real update.
        let folded = est.new_packet_at(500, t0 + Duration::from_secs(1));
        let mut fresh = RateEstimator::starting_at(1.0, t0);
        let single = fresh.new_packet_at(1000, t0 + Duration::from_secs(1));
        assert!((folded - single).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_does_not_drop_to_zero_instantly() {
        let t0 = Instant::now();
        let mut est = RateEstimator::starting_at(5.0, t0);
        let r1 = est.new_packet_at(1000, t0 + Duration::from_secs(1));
        let r2 = est.new_packet_at(0, t0 + Duration::from_secs(2));
        assert!(r1 > r2);
        assert!(r2 > 0.0);
    }
}
