use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use rustfft::{num_complex::Complex, Fft, FftDirection, FftPlanner};
use serde::Deserialize;

use crate::error::Result;

/// Band-limited resampling back end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleMethod {
    /// Spectral (periodic sinc) resampling of the whole window
    #[default]
    Fft,
    /// Windowed-sinc interpolation with delay compensation
    Sinc,
}

/// Stretches a window by `detected / target`, which raises or lowers its
/// pitch by the same ratio once played back at the original rate.
pub struct PitchResampler {
    method: ResampleMethod,
    spectral: FftResampler,
}

impl PitchResampler {
    pub fn new(method: ResampleMethod) -> Self {
        Self {
            method,
            spectral: FftResampler::default(),
        }
    }

    /// Returns the window unchanged when either frequency is unusable.
    pub fn shift(&mut self, window: &[f32], detected: f32, target: f32) -> Result<Vec<f32>> {
        if !(detected > 0.0) || !(target > 0.0) || !detected.is_finite() || !target.is_finite() {
            return Ok(window.to_vec());
        }
        self.resample(window, detected / target)
    }

    /// Resamples to `round(len * factor)` samples.
    pub fn resample(&mut self, input: &[f32], factor: f32) -> Result<Vec<f32>> {
        let output_len = (input.len() as f64 * factor as f64).round() as usize;
        if output_len == input.len() {
            return Ok(input.to_vec());
        }
        if input.is_empty() || output_len == 0 {
            return Ok(Vec::new());
        }
        match self.method {
            ResampleMethod::Fft => Ok(self.spectral.resample(input, output_len)),
            ResampleMethod::Sinc => sinc_resample(input, output_len),
        }
    }
}

/// A single FFT plan, replanned only when a different length is asked for.
///
/// The output length follows the detected pitch and changes almost every
/// chunk, so plans are not accumulated in a long-lived planner.
#[derive(Default)]
struct PlanSlot {
    plan: Option<Arc<dyn Fft<f32>>>,
}

impl PlanSlot {
    fn get(&mut self, len: usize, direction: FftDirection) -> Arc<dyn Fft<f32>> {
        match &self.plan {
            Some(plan) if plan.len() == len => Arc::clone(plan),
            _ => {
                let plan = FftPlanner::new().plan_fft(len, direction);
                self.plan = Some(Arc::clone(&plan));
                plan
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> Option<usize> {
        self.plan.as_ref().map(|p| p.len())
    }
}

/// Spectral resampling: keep the bins both lengths share, splitting or
/// folding the Nyquist bin when the shorter length is even.
#[derive(Default)]
pub struct FftResampler {
    forward: PlanSlot,
    inverse: PlanSlot,
}

impl FftResampler {
    pub fn resample(&mut self, input: &[f32], output_len: usize) -> Vec<f32> {
        let n = input.len();
        let m = output_len;
        let zero = Complex::new(0.0f32, 0.0);

        let mut spectrum: Vec<Complex<f32>> = input.iter().map(|&s| Complex::new(s, 0.0)).collect();
        self.forward.get(n, FftDirection::Forward).process(&mut spectrum);

        let mut resized = vec![zero; m];
        let shared = n.min(m);
        let positive = (shared + 1) / 2;

        resized[..positive].copy_from_slice(&spectrum[..positive]);
        for k in 1..positive {
            resized[m - k] = spectrum[n - k];
        }

        if shared % 2 == 0 {
            let nyquist = shared / 2;
            if m < n {
                resized[nyquist] = spectrum[nyquist] + spectrum[n - nyquist];
            } else if m > n {
                let half = spectrum[nyquist] * 0.5;
                resized[nyquist] = half;
                resized[m - nyquist] = half.conj();
            } else {
                resized[nyquist] = spectrum[nyquist];
            }
        }

        self.inverse.get(m, FftDirection::Inverse).process(&mut resized);

        let scale = 1.0 / n as f32;
        resized.iter().map(|c| c.re * scale).collect()
    }

    /// `(forward, inverse)` lengths currently planned.
    #[cfg(test)]
    fn planned_lengths(&self) -> (Option<usize>, Option<usize>) {
        (self.forward.len(), self.inverse.len())
    }
}

const SINC_LEN: usize = 128;
const MAX_FLUSHES: usize = 8;

/// Windowed-sinc resampling through rubato, trimmed of the filter delay.
pub fn sinc_resample(input: &[f32], output_len: usize) -> Result<Vec<f32>> {
    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = output_len as f64 / input.len() as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input.len(), 1)?;
    let delay = resampler.output_delay();

    let wave_in = vec![input.to_vec()];
    let mut output = resampler
        .process(&wave_in, None)?
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut flushes = 0;
    while output.len() < delay + output_len && flushes < MAX_FLUSHES {
        let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        output.extend(tail.into_iter().next().unwrap_or_default());
        flushes += 1;
    }

    Ok(output
        .into_iter()
        .skip(delay)
        .chain(std::iter::repeat(0.0))
        .take(output_len)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::yin::YinEstimator;
    use crate::pitch::FundamentalEstimator;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn unit_factor_is_identity() {
        let input = sine(440.0, 44100, 1024);
        for method in [ResampleMethod::Fft, ResampleMethod::Sinc] {
            let mut resampler = PitchResampler::new(method);
            let output = resampler.shift(&input, 440.0, 440.0).unwrap();
            assert_eq!(output.len(), input.len());
            for (a, b) in input.iter().zip(&output) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn output_length_is_rounded_product() {
        let input = sine(300.0, 44100, 1000);
        for method in [ResampleMethod::Fft, ResampleMethod::Sinc] {
            let mut resampler = PitchResampler::new(method);
            assert_eq!(resampler.resample(&input, 1.5).unwrap().len(), 1500);
            assert_eq!(resampler.resample(&input, 0.5).unwrap().len(), 500);
            assert_eq!(resampler.resample(&input, 1.001).unwrap().len(), 1001);
        }
    }

    #[test]
    fn fft_resample_to_same_length_round_trips() {
        // 441 samples of a 1 kHz tone hold an integer number of periods
        let input = sine(1000.0, 44100, 441);
        let output = FftResampler::default().resample(&input, 441);
        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn stretching_lowers_the_played_back_pitch() {
        let sample_rate = 44100;
        let input = sine(440.0, sample_rate, 4096);
        for method in [ResampleMethod::Fft, ResampleMethod::Sinc] {
            let mut resampler = PitchResampler::new(method);
            // detected 440, target 220 -> twice as long, half the frequency
            let output = resampler.shift(&input, 440.0, 220.0).unwrap();
            assert_eq!(output.len(), 8192);

            let mut yin = YinEstimator::new(sample_rate, 0.1).unwrap();
            let middle = &output[2048..6144];
            let wave = yin.extract(middle);
            assert!(
                (wave.frequency - 220.0).abs() < 220.0 * 0.02,
                "{:?}: got {}",
                method,
                wave.frequency
            );
        }
    }

    #[test]
    fn unusable_frequencies_pass_through() {
        let input = sine(440.0, 44100, 512);
        let mut resampler = PitchResampler::new(ResampleMethod::Fft);
        assert_eq!(resampler.shift(&input, 0.0, 440.0).unwrap(), input);
        assert_eq!(resampler.shift(&input, 440.0, 0.0).unwrap(), input);
    }

    #[test]
    fn drifting_ratios_keep_one_plan_per_direction() {
        let window = sine(440.0, 44100, 14848);
        let mut resampler = PitchResampler::new(ResampleMethod::Fft);
        let mut last_len = 0;
        for step in 1..=50 {
            let detected = 440.0 + step as f32 * 0.37;
            last_len = resampler.shift(&window, detected, 440.0).unwrap().len();
            assert!(last_len > 14848);
        }
        assert_eq!(
            resampler.spectral.planned_lengths(),
            (Some(14848), Some(last_len))
        );
    }

    #[test]
    fn fft_resample_preserves_dc_level() {
        let input = vec![0.25f32; 64];
        for len in [32, 100, 129] {
            let output = FftResampler::default().resample(&input, len);
            assert_eq!(output.len(), len);
            assert!(output.iter().all(|s| (s - 0.25).abs() < 1e-4));
        }
    }
}
