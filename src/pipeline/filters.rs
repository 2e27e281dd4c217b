//! Butterworth pre-filters for the pitch detector.
//!
//! Each filter is one or more second-order sections in Direct Form I with
//! coefficients normalised by `a0`. Delay lines persist across chunks, so
//! filtering a signal in pieces gives the same result as filtering it whole.

use std::f64::consts::PI;

use crate::error::{PitchError, Result};

use super::ChunkProcessor;

const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn from_coefficients(b: [f64; 3], a: [f64; 3]) -> Self {
        Self {
            b0: b[0] / a[0],
            b1: b[1] / a[0],
            b2: b[2] / a[0],
            a1: a[1] / a[0],
            a2: a[2] / a[0],
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn lowpass(cutoff: f64, sample_rate: u32) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate as f64;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * BUTTERWORTH_Q);
        Self::from_coefficients(
            [(1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    fn highpass(cutoff: f64, sample_rate: u32) -> Self {
        let w0 = 2.0 * PI * cutoff / sample_rate as f64;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * BUTTERWORTH_Q);
        Self::from_coefficients(
            [(1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    #[inline]
    fn process_sample(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

fn check_cutoff(cutoff: f32, sample_rate: u32) -> Result<()> {
    if sample_rate == 0 {
        return Err(PitchError::config("sample rate must be positive"));
    }
    let nyquist = sample_rate as f32 / 2.0;
    if !(cutoff > 0.0) || !(cutoff < nyquist) {
        return Err(PitchError::config(format!(
            "cutoff {} Hz must lie between 0 and {} Hz",
            cutoff, nyquist
        )));
    }
    Ok(())
}

fn run_sections(sections: &mut [Biquad], chunk: &[f32]) -> Vec<f32> {
    chunk
        .iter()
        .map(|&s| {
            sections
                .iter_mut()
                .fold(s as f64, |acc, section| section.process_sample(acc)) as f32
        })
        .collect()
}

/// Second-order Butterworth low-pass (12 dB/oct).
pub struct LowPass {
    section: [Biquad; 1],
}

impl LowPass {
    pub fn new(cutoff: f32, sample_rate: u32) -> Result<Self> {
        check_cutoff(cutoff, sample_rate)?;
        log::debug!("Low-pass at {} Hz", cutoff);
        Ok(Self {
            section: [Biquad::lowpass(cutoff as f64, sample_rate)],
        })
    }
}

impl ChunkProcessor for LowPass {
    fn name(&self) -> &str {
        "low-pass"
    }

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        Ok(run_sections(&mut self.section, chunk))
    }
}

/// High-pass at `low` cascaded with low-pass at `high`.
pub struct BandPass {
    sections: [Biquad; 2],
}

impl BandPass {
    pub fn new(low: f32, high: f32, sample_rate: u32) -> Result<Self> {
        check_cutoff(low, sample_rate)?;
        check_cutoff(high, sample_rate)?;
        if low >= high {
            return Err(PitchError::config(format!(
                "band-pass edges {}..{} Hz are reversed",
                low, high
            )));
        }
        log::debug!("Band-pass {}..{} Hz", low, high);
        Ok(Self {
            sections: [
                Biquad::highpass(low as f64, sample_rate),
                Biquad::lowpass(high as f64, sample_rate),
            ],
        })
    }

    /// Parses `lo:hi`, e.g. `80:1200`.
    pub fn parse(spec: &str, sample_rate: u32) -> Result<Self> {
        let parse_edge = |s: &str| {
            s.trim()
                .parse::<f32>()
                .map_err(|_| PitchError::config(format!("invalid band edge '{}'", s)))
        };
        let (low, high) = spec
            .split_once(':')
            .ok_or_else(|| PitchError::config(format!("band must be 'lo:hi', got '{}'", spec)))?;
        Self::new(parse_edge(low)?, parse_edge(high)?, sample_rate)
    }
}

impl ChunkProcessor for BandPass {
    fn name(&self) -> &str {
        "band-pass"
    }

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        Ok(run_sections(&mut self.sections, chunk))
    }
}
