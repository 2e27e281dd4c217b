use rustfft::num_complex::Complex;

/// Detected fundamental for one analysis window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaveId {
    /// Frequency in Hz, 0.0 when no reliable pitch was found
    pub frequency: f32,
    /// Estimator-specific loudness, never negative
    pub amplitude: f32,
    pub phase: f32,
}

impl WaveId {
    pub const NO_PITCH: WaveId = WaveId {
        frequency: 0.0,
        amplitude: 0.0,
        phase: 0.0,
    };

    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency: frequency.max(0.0),
            amplitude: amplitude.max(0.0),
            phase: 0.0,
        }
    }

    /// True when the frequency can safely be used as a shift ratio.
    pub fn is_voiced(&self) -> bool {
        self.frequency.is_finite() && self.frequency > 0.0
    }
}

/// Band-limited magnitude spectrum of one window.
///
/// `frequency_range`, `complex_spectrum` and `magnitudes` share the same
/// length and indexing.
#[derive(Clone, Debug)]
pub struct SpectralAnalytics {
    /// Length of the analysed window in samples
    pub chunk_size: usize,
    pub sample_rate: u32,
    /// Bin centre frequencies (Hz), ascending
    pub frequency_range: Vec<f32>,
    pub complex_spectrum: Vec<Complex<f32>>,
    pub magnitudes: Vec<f32>,
}

impl SpectralAnalytics {
    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Build the wave identity for a chosen bin, normalising the magnitude
    /// by the window length. The phase is the bin's complex argument.
    pub fn wave_at(&self, index: usize) -> WaveId {
        let magnitude = self.magnitudes[index];
        if magnitude <= 0.0 || !magnitude.is_finite() {
            return WaveId::NO_PITCH;
        }
        debug_assert!(self.frequency_range[index] <= self.sample_rate as f32 / 2.0);
        WaveId {
            phase: self.complex_spectrum[index].arg(),
            ..WaveId::new(
                self.frequency_range[index],
                magnitude / self.chunk_size as f32,
            )
        }
    }
}
