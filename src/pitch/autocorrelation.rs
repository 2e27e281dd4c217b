use rustfft::{num_complex::Complex, FftPlanner};

use super::FundamentalEstimator;
use crate::audio::features::WaveId;
use crate::error::{PitchError, Result};

/// Strongest autocorrelation lag within the periods allowed by the band.
pub struct AutocorrelationEstimator {
    sample_rate: u32,
    min_frequency: f32,
    max_frequency: f32,
    planner: FftPlanner<f32>,
}

impl AutocorrelationEstimator {
    pub fn new(sample_rate: u32, min_frequency: f32, max_frequency: f32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PitchError::config("sample rate must be positive"));
        }
        if !(min_frequency > 0.0) || !(min_frequency < max_frequency) {
            return Err(PitchError::config(format!(
                "autocorrelation band {}..{} Hz is empty",
                min_frequency, max_frequency
            )));
        }
        Ok(Self {
            sample_rate,
            min_frequency,
            max_frequency,
            planner: FftPlanner::new(),
        })
    }

    /// Inclusive lag range, or `None` when the window is too short for it.
    fn lag_range(&self, window_len: usize) -> Option<(usize, usize)> {
        let sr = self.sample_rate as f32;
        let min_lag = ((sr / self.max_frequency).ceil() as usize).max(1);
        let max_lag = ((sr / self.min_frequency).floor() as usize).min(window_len.saturating_sub(1));
        (min_lag < max_lag).then_some((min_lag, max_lag))
    }
}

impl FundamentalEstimator for AutocorrelationEstimator {
    fn name(&self) -> &'static str {
        "autocorrelation"
    }

    fn extract(&mut self, window: &[f32]) -> WaveId {
        let Some((min_lag, max_lag)) = self.lag_range(window.len()) else {
            return WaveId::NO_PITCH;
        };

        let mean = window.iter().sum::<f32>() / window.len() as f32;
        let centered: Vec<f32> = window.iter().map(|s| s - mean).collect();
        let correlation = autocorrelation(&centered, &mut self.planner);

        let energy = correlation[0];
        if !(energy > f32::EPSILON) {
            return WaveId::NO_PITCH;
        }

        let mut best = min_lag;
        for lag in min_lag + 1..=max_lag {
            if correlation[lag] > correlation[best] {
                best = lag;
            }
        }
        if correlation[best] <= 0.0 {
            return WaveId::NO_PITCH;
        }

        let rms = (energy / window.len() as f32).sqrt();
        WaveId::new(self.sample_rate as f32 / best as f32, rms)
    }
}

/// Linear autocorrelation `r(k) = sum_i x_i x_{i+k}` for `k` in `0..len`,
/// zero-padded to avoid circular wrap.
pub fn autocorrelation(signal: &[f32], planner: &mut FftPlanner<f32>) -> Vec<f32> {
    let n = signal.len();
    let padded = 2 * n;
    let fft = planner.plan_fft_forward(padded);
    let inv_fft = planner.plan_fft_inverse(padded);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(padded)
        .collect();

    fft.process(&mut buffer);
    buffer
        .iter_mut()
        .for_each(|c| *c = Complex::new(c.norm_sqr(), 0.0));
    inv_fft.process(&mut buffer);

    let scale = 1.0 / padded as f32;
    buffer[..n].iter().map(|c| c.re * scale).collect()
}
