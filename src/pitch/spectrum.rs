use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::audio::features::SpectralAnalytics;
use crate::error::{PitchError, Result};

/// Band edges and bin frequencies for one window length. Only valid while
/// the window length stays the same.
struct BandCache {
    window_size: usize,
    min_index: usize,
    max_index: usize,
    frequency_range: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

/// Real-input magnitude spectrum restricted to `[min_freq, max_freq)`.
pub struct SpectralAnalyzer {
    sample_rate: u32,
    min_freq: f32,
    max_freq: f32,
    planner: FftPlanner<f32>,
    cache: Option<BandCache>,
}

impl SpectralAnalyzer {
    pub fn new(sample_rate: u32, min_freq: f32, max_freq: f32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PitchError::config("sample rate must be positive"));
        }
        if !(min_freq >= 0.0) || !max_freq.is_finite() {
            return Err(PitchError::config(format!(
                "invalid frequency band {}..{} Hz",
                min_freq, max_freq
            )));
        }
        if min_freq >= max_freq {
            return Err(PitchError::config(format!(
                "min frequency {} Hz must be below max frequency {} Hz",
                min_freq, max_freq
            )));
        }
        Ok(Self {
            sample_rate,
            min_freq,
            max_freq,
            planner: FftPlanner::new(),
            cache: None,
        })
    }

    fn band_for(&mut self, window_size: usize) -> &BandCache {
        if self
            .cache
            .as_ref()
            .is_some_and(|cache| cache.window_size != window_size)
        {
            self.cache = None;
        }

        let (sample_rate, min_freq, max_freq) = (self.sample_rate, self.min_freq, self.max_freq);
        let planner = &mut self.planner;

        self.cache.get_or_insert_with(|| {
            let all_bins = rfft_frequencies(window_size, sample_rate);
            let min_index = all_bins.partition_point(|&f| f < min_freq);
            let max_index = all_bins.partition_point(|&f| f < max_freq);
            log::debug!(
                "Spectral band for window {}: bins {}..{} ({} Hz resolution)",
                window_size,
                min_index,
                max_index,
                sample_rate as f32 / window_size as f32
            );
            BandCache {
                window_size,
                min_index,
                max_index,
                frequency_range: all_bins[min_index..max_index].to_vec(),
                fft: planner.plan_fft_forward(window_size),
            }
        })
    }

    pub fn analyse(&mut self, window: &[f32]) -> SpectralAnalytics {
        let sample_rate = self.sample_rate;
        if window.is_empty() {
            return SpectralAnalytics {
                chunk_size: 0,
                sample_rate,
                frequency_range: Vec::new(),
                complex_spectrum: Vec::new(),
                magnitudes: Vec::new(),
            };
        }

        let band = self.band_for(window.len());

        let mut buffer: Vec<Complex<f32>> =
            window.iter().map(|&s| Complex::new(s, 0.0)).collect();
        band.fft.process(&mut buffer);

        let complex_spectrum = buffer[band.min_index..band.max_index].to_vec();
        let magnitudes = complex_spectrum.iter().map(|c| c.norm()).collect();

        SpectralAnalytics {
            chunk_size: window.len(),
            sample_rate,
            frequency_range: band.frequency_range.clone(),
            complex_spectrum,
            magnitudes,
        }
    }
}

/// Bin frequencies `k * sample_rate / n` for `k = 0..=n/2`.
pub fn rfft_frequencies(window_size: usize, sample_rate: u32) -> Vec<f32> {
    let spacing = sample_rate as f64 / window_size as f64;
    (0..=window_size / 2)
        .map(|k| (k as f64 * spacing) as f32)
        .collect()
}
