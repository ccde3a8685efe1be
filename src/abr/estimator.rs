//! Exponentially weighted throughput estimate.

use std::time::Duration;

/// Smoothed per-client throughput in kbit/s.
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    alpha: f64,
    avg_kbps: f64,
    samples: u64,
}

impl ThroughputEstimator {
    /// `alpha` weights the newest sample; it is expected in `(0, 1]`.
    pub fn new(alpha: f64, initial_kbps: f64) -> Self {
        Self {
            alpha,
            avg_kbps: initial_kbps,
            samples: 0,
        }
    }

    /// Fold one completed transfer into the estimate.
    ///
    /// Returns the sample in kbit/s, or `None` when `elapsed` is zero and
    /// the sample was ignored.
    pub fn record_sample(&mut self, bytes: u64, elapsed: Duration) -> Option<f64> {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }

        let sample_kbps = (bytes as f64 * 8.0) / secs / 1000.0;
        self.avg_kbps = self.alpha * sample_kbps + (1.0 - self.alpha) * self.avg_kbps;
        self.samples += 1;
        Some(sample_kbps)
    }

    pub fn average_kbps(&self) -> f64 {
        self.avg_kbps
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_kilobits_per_second() {
        let mut est = ThroughputEstimator::new(1.0, 0.0);
        // 250 000 bytes in one second = 2000 kbit/s
        let sample = est.record_sample(250_000, Duration::from_secs(1)).unwrap();
        assert!((sample - 2000.0).abs() < 1e-9);
        assert!((est.average_kbps() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_is_ignored() {
        let mut est = ThroughputEstimator::new(0.5, 1000.0);
        assert_eq!(est.record_sample(1_000_000, Duration::ZERO), None);
        assert_eq!(est.average_kbps(), 1000.0);
        assert_eq!(est.samples(), 0);
    }

    #[test]
    fn average_stays_between_previous_and_sample() {
        let cases = [
            (0.1, 1000.0, 500_000u64, 2u64),
            (0.5, 1000.0, 10_000, 1),
            (0.9, 0.0, 1_000_000, 3),
            (1.0, 5000.0, 12_500, 1),
        ];

        for (alpha, initial, bytes, secs) in cases {
            let mut est = ThroughputEstimator::new(alpha, initial);
            let sample = est.record_sample(bytes, Duration::from_secs(secs)).unwrap();
            let (lo, hi) = if sample < initial { (sample, initial) } else { (initial, sample) };
            let avg = est.average_kbps();
            assert!(avg >= lo - 1e-9 && avg <= hi + 1e-9, "alpha={alpha} avg={avg}");
        }
    }
}
