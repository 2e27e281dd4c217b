//! Pitch tracking and pitch shifting.

pub mod autocorrelation;
pub mod overlap;
pub mod shift;
pub mod spectral;
pub mod spectrum;
pub mod target;
pub mod yin;

use serde::Deserialize;

use crate::audio::features::WaveId;
use crate::error::{PitchError, Result};
use autocorrelation::AutocorrelationEstimator;
use shift::ResampleMethod;
use spectral::{HarmonicSpectralEstimator, SimpleSpectralEstimator};
use spectrum::SpectralAnalyzer;
use target::{FixedTarget, NearestInTable, Scale, TargetSelector};
use yin::YinEstimator;

/// Extracts the dominant frequency of one analysis window.
///
/// Silence and unvoiced input produce a zero frequency, never an error.
pub trait FundamentalEstimator {
    fn name(&self) -> &'static str;
    fn extract(&mut self, window: &[f32]) -> WaveId;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Time-domain YIN
    #[default]
    Yin,
    /// Loudest spectral bin
    Simple,
    /// Loudest harmonic of the loudest harmonic group
    Harmonic,
    /// Strongest autocorrelation lag
    Autocorrelation,
}

/// Where detected pitches are moved to.
#[derive(Clone, Debug, PartialEq)]
pub enum TargetSpec {
    Fixed(f32),
    Scale(Scale),
}

/// Every parameter of the pitch engine, checked once before anything is built.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub threshold: f32,
    pub frequency_resolution: u32,
    pub min_freq: f32,
    pub max_freq: f32,
    pub lenience: f32,
    pub detector: DetectorKind,
    pub target: TargetSpec,
    pub resampler: ResampleMethod,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            chunk_size: 512,
            threshold: 0.1,
            frequency_resolution: 3,
            min_freq: 85.0,
            max_freq: 1100.0,
            lenience: 1.0,
            detector: DetectorKind::Yin,
            target: TargetSpec::Scale(Scale::Chromatic),
            resampler: ResampleMethod::Fft,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PitchError::config("sample rate must be positive"));
        }
        if self.chunk_size == 0 {
            return Err(PitchError::config("chunk size must be positive"));
        }
        if self.frequency_resolution == 0 {
            return Err(PitchError::config("frequency resolution must be positive"));
        }
        if !(self.min_freq >= 0.0) || !(self.min_freq < self.max_freq) {
            return Err(PitchError::config(format!(
                "min frequency {} Hz must be below max frequency {} Hz",
                self.min_freq, self.max_freq
            )));
        }
        if !(self.lenience >= 0.0) {
            return Err(PitchError::config("harmonic lenience cannot be negative"));
        }
        if !(self.threshold > 0.0) {
            return Err(PitchError::config("detection threshold must be positive"));
        }
        if let TargetSpec::Fixed(frequency) = self.target {
            FixedTarget::new(frequency)?;
        }
        Ok(())
    }

    pub fn build_estimator(&self) -> Result<Box<dyn FundamentalEstimator>> {
        let estimator: Box<dyn FundamentalEstimator> = match self.detector {
            DetectorKind::Yin => Box::new(YinEstimator::new(self.sample_rate, self.threshold)?),
            DetectorKind::Simple => Box::new(SimpleSpectralEstimator::new(SpectralAnalyzer::new(
                self.sample_rate,
                self.min_freq,
                self.max_freq,
            )?)),
            DetectorKind::Harmonic => Box::new(HarmonicSpectralEstimator::new(
                SpectralAnalyzer::new(self.sample_rate, self.min_freq, self.max_freq)?,
                self.lenience,
            )),
            DetectorKind::Autocorrelation => Box::new(AutocorrelationEstimator::new(
                self.sample_rate,
                self.min_freq.max(1.0),
                self.max_freq,
            )?),
        };
        Ok(estimator)
    }

    pub fn build_selector(&self) -> Result<Box<dyn TargetSelector>> {
        let selector: Box<dyn TargetSelector> = match &self.target {
            TargetSpec::Fixed(frequency) => Box::new(FixedTarget::new(*frequency)?),
            TargetSpec::Scale(scale) => Box::new(NearestInTable::new(scale.frequencies())?),
        };
        Ok(selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = EngineSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.build_estimator().unwrap().name(), "yin");
        assert_eq!(settings.build_selector().unwrap().select(446.0), 440.0);
    }

    #[test]
    fn every_detector_builds() {
        for (kind, name) in [
            (DetectorKind::Yin, "yin"),
            (DetectorKind::Simple, "simple"),
            (DetectorKind::Harmonic, "harmonic"),
            (DetectorKind::Autocorrelation, "autocorrelation"),
        ] {
            let settings = EngineSettings {
                detector: kind,
                ..EngineSettings::default()
            };
            assert_eq!(settings.build_estimator().unwrap().name(), name);
        }
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let cases = [
            EngineSettings { chunk_size: 0, ..EngineSettings::default() },
            EngineSettings { frequency_resolution: 0, ..EngineSettings::default() },
            EngineSettings { min_freq: 1100.0, max_freq: 85.0, ..EngineSettings::default() },
            EngineSettings { sample_rate: 0, ..EngineSettings::default() },
            EngineSettings { target: TargetSpec::Fixed(-3.0), ..EngineSettings::default() },
        ];
        for settings in cases {
            assert!(
                matches!(settings.validate(), Err(PitchError::Config(_))),
                "{:?} should be rejected",
                settings
            );
        }
    }
}
