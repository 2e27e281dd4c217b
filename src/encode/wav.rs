use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::{clip, AudioSink};
use crate::error::Result;

/// Mono 16-bit PCM WAV writer.
pub struct WavSink<W: Write + Seek> {
    writer: Option<WavWriter<W>>,
    samples_written: usize,
    sample_rate: u32,
}

impl WavSink<BufWriter<File>> {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let sink = Self::new(BufWriter::new(File::create(path)?), sample_rate)?;
        log::info!("Writing {} Hz mono WAV to {}", sample_rate, path.display());
        Ok(sink)
    }
}

impl<W: Write + Seek> WavSink<W> {
    pub fn new(inner: W, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            writer: Some(WavWriter::new(inner, spec(sample_rate))?),
            samples_written: 0,
            sample_rate,
        })
    }
}

fn spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// `round(sample * 32767)` after clipping to `[-1, 1]`.
pub fn to_pcm16(sample: f32) -> i16 {
    (clip(sample) * i16::MAX as f32).round() as i16
}

impl<W: Write + Seek> AudioSink for WavSink<W> {
    fn write(&mut self, chunk: &[f32]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            log::warn!("Dropping {} samples written after finish", chunk.len());
            return Ok(());
        };
        for &sample in chunk {
            writer.write_sample(to_pcm16(sample))?;
        }
        self.samples_written += chunk.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            log::info!(
                "WAV complete: {} samples ({:.1}s)",
                self.samples_written,
                self.samples_written as f32 / self.sample_rate as f32
            );
        }
        Ok(())
    }
}
