//! Destinations for processed chunks.

pub mod wav;

use crate::error::Result;

pub trait AudioSink {
    fn write(&mut self, chunk: &[f32]) -> Result<()>;

    /// Flushes pending output. Calling it again is a no-op.
    fn finish(&mut self) -> Result<()>;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn write(&mut self, chunk: &[f32]) -> Result<()> {
        (**self).write(chunk)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Discards everything; used when neither a file nor a device is requested.
#[derive(Debug, Default)]
pub struct NullSink {
    samples: usize,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for NullSink {
    fn write(&mut self, chunk: &[f32]) -> Result<()> {
        self.samples += chunk.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::debug!("Discarded {} samples", self.samples);
        Ok(())
    }
}

/// Hard-clips into `[-1, 1]`.
pub fn clip(sample: f32) -> f32 {
    sample.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_counts_and_finishes_twice() {
        let mut sink = NullSink::new();
        sink.write(&[0.0; 64]).unwrap();
        sink.write(&[0.0; 64]).unwrap();
        sink.finish().unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.samples, 128);
    }

    #[test]
    fn boxed_sinks_delegate() {
        let mut sink: Box<dyn AudioSink> = Box::new(NullSink::new());
        sink.write(&[0.5]).unwrap();
        sink.finish().unwrap();
    }

    #[test]
    fn clip_bounds_samples() {
        assert_eq!(clip(1.5), 1.0);
        assert_eq!(clip(-3.0), -1.0);
        assert_eq!(clip(0.25), 0.25);
    }
}
