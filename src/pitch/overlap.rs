use crate::error::{PitchError, Result};

/// Geometry derived from the first chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlapGeometry {
    pub chunk_size: usize,
    pub overlap_factor: usize,
    pub overlap_size: usize,
    pub window_size: usize,
}

#[derive(Debug)]
enum OverlapState {
    Unprimed,
    Primed {
        geometry: OverlapGeometry,
        buffer: Vec<f32>,
    },
}

/// Prepends the trailing samples of previous chunks so every analysis
/// window spans roughly `sample_rate / frequency_resolution` samples.
#[derive(Debug)]
pub struct OverlapWindower {
    desired_window_length: usize,
    state: OverlapState,
}

impl OverlapWindower {
    pub fn new(sample_rate: u32, frequency_resolution: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PitchError::config("sample rate must be positive"));
        }
        if frequency_resolution == 0 {
            return Err(PitchError::config("frequency resolution must be positive"));
        }
        Ok(Self {
            desired_window_length: (sample_rate / frequency_resolution) as usize,
            state: OverlapState::Unprimed,
        })
    }

    pub fn geometry(&self) -> Option<&OverlapGeometry> {
        match &self.state {
            OverlapState::Unprimed => None,
            OverlapState::Primed { geometry, .. } => Some(geometry),
        }
    }

    fn prime(&self, chunk_size: usize) -> OverlapGeometry {
        let overlap_factor = self.desired_window_length / chunk_size;
        let overlap_size = chunk_size * overlap_factor;
        log::debug!(
            "Overlap primed: chunk={}, factor={}, window={}",
            chunk_size,
            overlap_factor,
            overlap_size + chunk_size
        );
        OverlapGeometry {
            chunk_size,
            overlap_factor,
            overlap_size,
            window_size: overlap_size + chunk_size,
        }
    }

    /// Returns `buffer ++ chunk` and keeps its trailing `overlap_size`
    /// samples for the next call.
    pub fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        if chunk.is_empty() {
            return Err(PitchError::config("chunk size must be positive"));
        }

        if let OverlapState::Unprimed = self.state {
            let geometry = self.prime(chunk.len());
            let buffer = vec![0.0; geometry.overlap_size];
            self.state = OverlapState::Primed { geometry, buffer };
        }

        let OverlapState::Primed { geometry, buffer } = &mut self.state else {
            unreachable!("overlap state primed above");
        };

        if chunk.len() != geometry.chunk_size {
            return Err(PitchError::ChunkLength {
                expected: geometry.chunk_size,
                actual: chunk.len(),
            });
        }

        let mut window = Vec::with_capacity(geometry.window_size);
        window.extend_from_slice(buffer);
        window.extend_from_slice(chunk);

        buffer.clear();
        buffer.extend_from_slice(&window[window.len() - geometry.overlap_size..]);

        Ok(window)
    }
}
