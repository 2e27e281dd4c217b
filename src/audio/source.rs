use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{PitchError, Result};

/// Producer of fixed-length mono chunks at a known sample rate.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    fn chunk_size(&self) -> usize;

    /// Next chunk, or `None` once the stream has ended or been closed.
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>>;

    /// Releases the underlying resource. Safe to call more than once.
    fn close(&mut self) -> Result<()>;

    /// Number of chunks still to come, when the source knows it.
    fn chunks_remaining(&self) -> Option<usize> {
        None
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn chunk_size(&self) -> usize {
        (**self).chunk_size()
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        (**self).next_chunk()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn chunks_remaining(&self) -> Option<usize> {
        (**self).chunks_remaining()
    }
}

/// Continuous-phase sine generator.
pub struct SineSource {
    sample_rate: u32,
    chunk_size: usize,
    frequency: f64,
    amplitude: f32,
    phase: f64,
    closed: bool,
}

impl SineSource {
    pub fn new(sample_rate: u32, chunk_size: usize, frequency: f32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            chunk_size,
            frequency: frequency as f64,
            amplitude,
            phase: 0.0,
            closed: false,
        }
    }
}

impl AudioSource for SineSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if self.closed {
            return Ok(None);
        }

        let step = TAU * self.frequency / self.sample_rate as f64;
        let chunk = (0..self.chunk_size)
            .map(|_| {
                let sample = self.amplitude * self.phase.sin() as f32;
                self.phase = (self.phase + step) % TAU;
                sample
            })
            .collect();
        Ok(Some(chunk))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Seeded uniform white noise in `[-amplitude, amplitude]`.
pub struct NoiseSource {
    sample_rate: u32,
    chunk_size: usize,
    amplitude: f32,
    rng: StdRng,
    closed: bool,
}

impl NoiseSource {
    pub fn new(sample_rate: u32, chunk_size: usize, amplitude: f32, seed: u64) -> Self {
        Self {
            sample_rate,
            chunk_size,
            amplitude,
            rng: StdRng::seed_from_u64(seed),
            closed: false,
        }
    }
}

impl AudioSource for NoiseSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if self.closed {
            return Ok(None);
        }
        let amplitude = self.amplitude;
        let chunk = (0..self.chunk_size)
            .map(|_| self.rng.gen_range(-1.0f32..=1.0) * amplitude)
            .collect();
        Ok(Some(chunk))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Ends the wrapped source after a fixed number of chunks.
pub struct LimitedSource<S> {
    inner: S,
    remaining: usize,
}

impl<S: AudioSource> LimitedSource<S> {
    pub fn new(inner: S, chunks: usize) -> Self {
        Self {
            inner,
            remaining: chunks,
        }
    }

    /// Limit expressed in seconds, rounded up to whole chunks.
    pub fn for_duration(inner: S, seconds: f32) -> Result<Self> {
        if !(seconds > 0.0) || !seconds.is_finite() {
            return Err(PitchError::config(format!(
                "duration must be positive, got {}s",
                seconds
            )));
        }
        let samples = (seconds as f64 * inner.sample_rate() as f64).ceil();
        let chunks = (samples / inner.chunk_size().max(1) as f64).ceil() as usize;
        Ok(Self::new(inner, chunks))
    }
}

impl<S: AudioSource> AudioSource for LimitedSource<S> {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn chunk_size(&self) -> usize {
        self.inner.chunk_size()
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let chunk = self.inner.next_chunk()?;
        if chunk.is_some() {
            self.remaining -= 1;
        }
        Ok(chunk)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn chunks_remaining(&self) -> Option<usize> {
        Some(
            self.inner
                .chunks_remaining()
                .map_or(self.remaining, |n| n.min(self.remaining)),
        )
    }
}
