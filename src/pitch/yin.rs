//! YIN fundamental-frequency estimation.
//!
//! For a window of `2W` samples the difference function is
//! `d(t) = sum_{i<W} (x_i - x_{i+t})^2` for `t` in `0..W`. It is normalised
//! by its cumulative mean, `d'(0) = 1` and `d'(t) = d(t) / ((1/t) sum_{k=1..t} d(k))`,
//! and the first dip below the threshold, followed down to its local
//! minimum and refined with a parabola, gives the period.
//!
//! `d(t)` is evaluated as `p(0) + p(t) - 2 r(t)`, where `p(t)` is the energy
//! of `x[t..t+W]` and `r` the windowed autocorrelation obtained with an FFT.

use rustfft::{num_complex::Complex, FftPlanner};

use super::FundamentalEstimator;
use crate::audio::features::WaveId;
use crate::error::{PitchError, Result};

pub struct YinEstimator {
    sample_rate: u32,
    threshold: f32,
    planner: FftPlanner<f32>,
}

impl YinEstimator {
    pub fn new(sample_rate: u32, threshold: f32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PitchError::config("sample rate must be positive"));
        }
        if !(threshold > 0.0) || !threshold.is_finite() {
            return Err(PitchError::config(format!(
                "YIN threshold must be a positive number, got {}",
                threshold
            )));
        }
        Ok(Self {
            sample_rate,
            threshold,
            planner: FftPlanner::new(),
        })
    }
}

impl FundamentalEstimator for YinEstimator {
    fn name(&self) -> &'static str {
        "yin"
    }

    fn extract(&mut self, window: &[f32]) -> WaveId {
        let half = window.len() / 2;
        if half < 3 {
            return WaveId::new(0.0, 1.0);
        }

        let diff = difference_function(&window[..2 * half], half, &mut self.planner);
        let normalized = cumulative_mean_normalized(&diff);

        match first_dip(&normalized, self.threshold) {
            Some(lag) => {
                let period = refine_lag(&normalized, lag);
                WaveId::new(self.sample_rate as f32 / period, 1.0)
            }
            None => WaveId::new(0.0, 1.0),
        }
    }
}

/// `d(t)` for `t` in `0..window_size`. `signal` must hold at least
/// `2 * window_size` samples.
pub fn difference_function(
    signal: &[f32],
    window_size: usize,
    planner: &mut FftPlanner<f32>,
) -> Vec<f32> {
    let n = signal.len();
    let fft = planner.plan_fft_forward(n);
    let inv_fft = planner.plan_fft_inverse(n);

    let mut full: Vec<Complex<f32>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
    let mut head: Vec<Complex<f32>> = signal[..window_size]
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(n)
        .collect();

    fft.process(&mut full);
    fft.process(&mut head);

    // Cross-correlation with the head; rustfft leaves both transforms unnormalised.
    let scale = 1.0 / n as f32;
    full.iter_mut()
        .zip(head.iter())
        .for_each(|(a, b)| *a = *a * b.conj() * scale);
    inv_fft.process(&mut full);

    let head_power: f32 = signal[..window_size].iter().map(|s| s * s).sum();
    let mut lagged_power = head_power;

    (0..window_size)
        .map(|lag| {
            let d = (head_power + lagged_power - 2.0 * full[lag].re).max(0.0);
            lagged_power += signal[lag + window_size] * signal[lag + window_size]
                - signal[lag] * signal[lag];
            d
        })
        .collect()
}

/// Cumulative-mean-normalised difference. Lags whose running sum is still
/// zero (silence) normalise to 1.
pub fn cumulative_mean_normalized(diff: &[f32]) -> Vec<f32> {
    let mut running = 0.0f32;
    diff.iter()
        .enumerate()
        .map(|(lag, &d)| {
            if lag == 0 {
                return 1.0;
            }
            running += d;
            if running > f32::EPSILON {
                d * lag as f32 / running
            } else {
                1.0
            }
        })
        .collect()
}

/// First lag below `threshold`, advanced while the curve keeps falling.
pub fn first_dip(normalized: &[f32], threshold: f32) -> Option<usize> {
    let mut lag = (1..normalized.len()).find(|&lag| normalized[lag] < threshold)?;
    while lag + 1 < normalized.len() && normalized[lag + 1] < normalized[lag] {
        lag += 1;
    }
    Some(lag)
}

/// Parabolic interpolation through the dip and its two neighbours.
pub fn refine_lag(normalized: &[f32], lag: usize) -> f32 {
    if lag <= 1 || lag + 1 >= normalized.len() {
        return lag as f32;
    }
    let (prev, mid, next) = (normalized[lag - 1], normalized[lag], normalized[lag + 1]);
    let denominator = prev - 2.0 * mid + next;
    if denominator.abs() <= f32::EPSILON {
        return lag as f32;
    }
    lag as f32 + 0.5 * (prev - next) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn difference_function_matches_direct_sum() {
        let signal: Vec<f32> = vec![0.0, 1.0, 2.0, 0.0, -1.0, -2.0, 0.5, 1.5];
        let window_size = 4;
        let expected: Vec<f32> = (0..window_size)
            .map(|lag| {
                (0..window_size)
                    .map(|i| (signal[i] - signal[i + lag]).powi(2))
                    .sum()
            })
            .collect();

        let computed = difference_function(&signal, window_size, &mut FftPlanner::new());
        for (e, c) in expected.iter().zip(&computed) {
            assert!((e - c).abs() < 1e-3, "expected {:?} got {:?}", expected, computed);
        }
    }

    #[test]
    fn normalisation_follows_cumulative_mean() {
        let normalized = cumulative_mean_normalized(&[0.0, 6.0, 14.0]);
        assert_eq!(normalized[0], 1.0);
        assert!((normalized[1] - 1.0).abs() < 1e-6);
        assert!((normalized[2] - 2.0 * 14.0 / 20.0).abs() < 1e-6);
    }

    #[test]
    fn dip_follows_descent_to_local_minimum() {
        let curve = [1.0, 0.9, 0.08, 0.05, 0.02, 0.04, 0.5];
        assert_eq!(first_dip(&curve, 0.1), Some(4));
        assert_eq!(first_dip(&curve, 0.01), None);
    }

    #[test]
    fn sine_periods_within_one_percent() {
        let sample_rate = 44100;
        let mut estimator = YinEstimator::new(sample_rate, 0.1).unwrap();
        for freq in [100.0, 220.0, 440.0, 1000.0] {
            let wave = estimator.extract(&sine(freq, sample_rate, 2048));
            assert!(
                (wave.frequency - freq).abs() / freq < 0.01,
                "expected {} got {}",
                freq,
                wave.frequency
            );
            assert_eq!(wave.amplitude, 1.0);
        }
    }

    #[test]
    fn silence_reports_no_pitch() {
        let mut estimator = YinEstimator::new(44100, 0.1).unwrap();
        let wave = estimator.extract(&vec![0.0; 1024]);
        assert_eq!(wave.frequency, 0.0);
        assert_eq!(wave.amplitude, 1.0);
        assert!(!wave.is_voiced());
    }

    #[test]
    fn rejects_non_positive_threshold() {
        assert!(YinEstimator::new(44100, 0.0).is_err());
        assert!(YinEstimator::new(44100, -0.2).is_err());
    }
}
