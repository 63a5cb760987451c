//! Signal smoothing and distance estimation.
//!
//! Raw signal-strength readings are noisy sample-to-sample. An exponential
//! moving average trades a little responsiveness for stability with O(1)
//! state per peer and no history buffer.

/// Default smoothing factor α.
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.35;

/// Default reference power at one meter, in dBm.
pub const DEFAULT_REFERENCE_POWER_DBM: f64 = -59.0;

/// Default path-loss exponent (free-space ≈ 2.0).
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;

/// Exponential moving average over raw signal samples.
///
/// The first sample seeds the average; every later sample folds in as
/// `smoothed = α·sample + (1−α)·smoothed_prev`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Fold in one raw sample and return the new smoothed value.
    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.value = Some(next);
        next
    }

    /// Current smoothed value, if at least one sample arrived.
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Approximate distance in meters from a smoothed signal value, using the
/// log-distance path-loss model.
///
/// This is an estimate, not a measurement: ambient interference, antenna
/// orientation, and obstacles all shift the real relationship. Treat the
/// result as a relative ordering hint, not a range reading.
pub fn approx_distance_m(smoothed_dbm: f64, reference_power_dbm: f64, path_loss_exponent: f64) -> f64 {
    10f64.powf((reference_power_dbm - smoothed_dbm) / (10.0 * path_loss_exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_the_average() {
        let mut ema = Ema::new(DEFAULT_SMOOTHING_ALPHA);
        assert_eq!(ema.value(), None);
        assert_eq!(ema.update(-47.0), -47.0);
        assert_eq!(ema.value(), Some(-47.0));
    }

    #[test]
    fn recurrence_holds_for_any_sample_sequence() {
        let samples = [-47.0, -52.0, -44.5, -80.0, -61.2, -47.0];
        let mut ema = Ema::new(0.35);
        let mut expected = samples[0];
        ema.update(samples[0]);

        for &s in &samples[1..] {
            expected = 0.35 * s + 0.65 * expected;
            let got = ema.update(s);
            assert!((got - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn smoothing_dampens_an_outlier() {
        let mut ema = Ema::new(0.35);
        ema.update(-50.0);
        let after_spike = ema.update(-90.0);
        // One bad reading moves the average only 35% of the way.
        assert!((after_spike - (-64.0)).abs() < 1e-9);
    }

    #[test]
    fn distance_at_reference_power_is_one_meter() {
        let d = approx_distance_m(
            DEFAULT_REFERENCE_POWER_DBM,
            DEFAULT_REFERENCE_POWER_DBM,
            DEFAULT_PATH_LOSS_EXPONENT,
        );
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn weaker_signal_means_farther_away() {
        let near = approx_distance_m(-50.0, -59.0, 2.0);
        let far = approx_distance_m(-80.0, -59.0, 2.0);
        assert!(near < far);
        // 20 dB below reference at exponent 2.0 is one decade of distance.
        let decade = approx_distance_m(-79.0, -59.0, 2.0);
        assert!((decade - 10.0).abs() < 1e-9);
    }
}
