use crate::audio::decode::downmix;
use crate::encode::AudioSink;
use crate::error::{PitchError, Result};
use crate::pitch::overlap::OverlapWindower;
use crate::pitch::shift::PitchResampler;
use crate::pitch::target::TargetSelector;
use crate::pitch::{EngineSettings, FundamentalEstimator};

use super::ChunkProcessor;

/// The auto-tune stage: widen the chunk with past samples, estimate its
/// fundamental, pick a target and resample the window toward it, then cut
/// the result back to the incoming chunk length.
pub struct PitchShifter {
    windower: OverlapWindower,
    estimator: Box<dyn FundamentalEstimator>,
    selector: Box<dyn TargetSelector>,
    resampler: PitchResampler,
    trim: DecreaseWindow,
    chunk_size: usize,
    voiced: usize,
    total: usize,
}

impl PitchShifter {
    pub fn new(
        windower: OverlapWindower,
        estimator: Box<dyn FundamentalEstimator>,
        selector: Box<dyn TargetSelector>,
        resampler: PitchResampler,
        chunk_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            windower,
            estimator,
            selector,
            resampler,
            trim: DecreaseWindow::new(chunk_size)?,
            chunk_size,
            voiced: 0,
            total: 0,
        })
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        settings.validate()?;
        let shifter = Self::new(
            OverlapWindower::new(settings.sample_rate, settings.frequency_resolution)?,
            settings.build_estimator()?,
            settings.build_selector()?,
            PitchResampler::new(settings.resampler),
            settings.chunk_size,
        )?;
        log::info!(
            "Pitch shifter: {} detector, {:?} resampler, {} Hz / {} resolution",
            shifter.estimator.name(),
            settings.resampler,
            settings.sample_rate,
            settings.frequency_resolution
        );
        Ok(shifter)
    }
}

impl ChunkProcessor for PitchShifter {
    fn name(&self) -> &str {
        "pitch-shift"
    }

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        if chunk.len() != self.chunk_size {
            return Err(PitchError::ChunkLength {
                expected: self.chunk_size,
                actual: chunk.len(),
            });
        }
        let window = self.windower.process(chunk)?;
        let wave = self.estimator.extract(&window);
        self.total += 1;

        if !wave.is_voiced() {
            log::trace!("chunk {}: no pitch", self.total);
            return Ok(chunk.to_vec());
        }
        self.voiced += 1;

        let target = self.selector.select(wave.frequency);
        log::debug!(
            "chunk {}: {:.1} Hz (amplitude {:.3}, phase {:.2}) -> {:.1} Hz (stretch {:.4})",
            self.total,
            wave.frequency,
            wave.amplitude,
            wave.phase,
            target,
            wave.frequency / target
        );
        let shifted = self.resampler.shift(&window, wave.frequency, target)?;
        self.trim.process(&shifted)
    }

    fn finish(&mut self) -> Result<()> {
        log::info!(
            "Pitch shifter: {} of {} chunks voiced",
            self.voiced,
            self.total
        );
        if let Some(geometry) = self.windower.geometry() {
            log::debug!(
                "Analysis window: {} samples ({} chunks, {} carried over)",
                geometry.window_size,
                geometry.overlap_factor,
                geometry.overlap_size
            );
        }
        Ok(())
    }
}

/// Keeps only the trailing `size` samples of each chunk. Shorter chunks
/// are left-padded with zeros so every output is exactly `size` long.
pub struct DecreaseWindow {
    size: usize,
}

impl DecreaseWindow {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PitchError::config("window size must be positive"));
        }
        Ok(Self { size })
    }
}

impl ChunkProcessor for DecreaseWindow {
    fn name(&self) -> &str {
        "decrease-window"
    }

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        if chunk.len() >= self.size {
            return Ok(chunk[chunk.len() - self.size..].to_vec());
        }
        let mut out = vec![0.0; self.size - chunk.len()];
        out.extend_from_slice(chunk);
        Ok(out)
    }
}

/// Silences chunks whose mean absolute level is below the threshold.
pub struct NoiseGate {
    threshold: f32,
    gated: usize,
}

impl NoiseGate {
    pub fn new(threshold: f32) -> Result<Self> {
        if !(threshold >= 0.0) || !threshold.is_finite() {
            return Err(PitchError::config(format!(
                "gate threshold must be a non-negative number, got {}",
                threshold
            )));
        }
        Ok(Self {
            threshold,
            gated: 0,
        })
    }
}

impl ChunkProcessor for NoiseGate {
    fn name(&self) -> &str {
        "noise-gate"
    }

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        let level = chunk.iter().map(|s| s.abs()).sum::<f32>() / chunk.len() as f32;
        if level < self.threshold {
            self.gated += 1;
            return Ok(vec![0.0; chunk.len()]);
        }
        Ok(chunk.to_vec())
    }

    fn finish(&mut self) -> Result<()> {
        log::debug!("Noise gate closed on {} chunks", self.gated);
        Ok(())
    }
}

/// Averages interleaved frames down to one channel.
pub struct MonoDownmix {
    channels: usize,
}

impl MonoDownmix {
    pub fn new(channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(PitchError::config("channel count must be positive"));
        }
        Ok(Self { channels })
    }
}

impl ChunkProcessor for MonoDownmix {
    fn name(&self) -> &str {
        "mono-downmix"
    }

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        if chunk.len() % self.channels != 0 {
            return Err(PitchError::ChunkLength {
                expected: chunk.len() - chunk.len() % self.channels,
                actual: chunk.len(),
            });
        }
        Ok(downmix(chunk, self.channels))
    }
}

/// Forwards every chunk to a sink and passes it on unchanged.
pub struct SinkProcessor<S: AudioSink> {
    sink: S,
}

impl<S: AudioSink> SinkProcessor<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S: AudioSink> ChunkProcessor for SinkProcessor<S> {
    fn name(&self) -> &str {
        "sink"
    }

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        self.sink.write(chunk)?;
        Ok(chunk.to_vec())
    }

    fn finish(&mut self) -> Result<()> {
        self.sink.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::WaveId;
    use crate::pitch::shift::ResampleMethod;
    use crate::pitch::spectral::SimpleSpectralEstimator;
    use crate::pitch::spectrum::SpectralAnalyzer;
    use crate::pitch::target::NearestInTable;
    use crate::pitch::{DetectorKind, TargetSpec};
    use std::cell::RefCell;
    use std::f32::consts::PI;
    use std::rc::Rc;

    const SAMPLE_RATE: u32 = 44100;
    const CHUNK: usize = 512;

    fn sine_stream(freq: f32, chunks: usize) -> Vec<Vec<f32>> {
        let samples: Vec<f32> = (0..chunks * CHUNK)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect();
        samples.chunks(CHUNK).map(|c| c.to_vec()).collect()
    }

    fn simple_shifter(table: Vec<f32>) -> PitchShifter {
        PitchShifter::new(
            OverlapWindower::new(SAMPLE_RATE, 3).unwrap(),
            Box::new(SimpleSpectralEstimator::new(
                SpectralAnalyzer::new(SAMPLE_RATE, 85.0, 1100.0).unwrap(),
            )),
            Box::new(NearestInTable::new(table).unwrap()),
            PitchResampler::new(ResampleMethod::Fft),
            CHUNK,
        )
        .unwrap()
    }

    #[test]
    fn in_tune_sine_keeps_its_pitch_and_length() {
        let mut shifter = simple_shifter(vec![440.0, 493.88]);
        let mut output = Vec::new();
        for chunk in sine_stream(440.0, 40) {
            let out = shifter.process(&chunk).unwrap();
            assert_eq!(out.len(), CHUNK);
            output.extend(out);
        }
        assert_eq!((shifter.voiced, shifter.total), (40, 40));

        // re-analyse the settled tail with the same estimator
        let tail = &output[output.len() - 14 * CHUNK..];
        let mut estimator =
            SimpleSpectralEstimator::new(SpectralAnalyzer::new(SAMPLE_RATE, 85.0, 1100.0).unwrap());
        let wave = estimator.extract(tail);
        let bin_width = SAMPLE_RATE as f32 / tail.len() as f32;
        assert!(
            (wave.frequency - 440.0).abs() <= bin_width,
            "got {} Hz",
            wave.frequency
        );
    }

    #[test]
    fn silent_chunks_pass_through_unshifted() {
        let settings = EngineSettings::default();
        for detector in [
            DetectorKind::Yin,
            DetectorKind::Simple,
            DetectorKind::Harmonic,
            DetectorKind::Autocorrelation,
        ] {
            let mut shifter = PitchShifter::from_settings(&EngineSettings {
                detector,
                ..settings.clone()
            })
            .unwrap();
            let silence = vec![0.0; CHUNK];
            for _ in 0..3 {
                assert_eq!(shifter.process(&silence).unwrap(), silence);
            }
            assert_eq!((shifter.voiced, shifter.total), (0, 3));
        }
    }

    #[test]
    fn fixed_target_moves_output_pitch() {
        let settings = EngineSettings {
            detector: DetectorKind::Yin,
            target: TargetSpec::Fixed(330.0),
            ..EngineSettings::default()
        };
        let mut shifter = PitchShifter::from_settings(&settings).unwrap();
        let mut output = Vec::new();
        for chunk in sine_stream(440.0, 30) {
            output.extend(shifter.process(&chunk).unwrap());
        }
        // each trailing chunk is a resampled 330 Hz tone
        let last = &output[output.len() - CHUNK..];
        let mut yin = crate::pitch::yin::YinEstimator::new(SAMPLE_RATE, 0.1).unwrap();
        let wave = yin.extract(last);
        assert!(
            (wave.frequency - 330.0).abs() < 330.0 * 0.03,
            "got {} Hz",
            wave.frequency
        );
    }

    #[test]
    fn chunk_length_change_fails_loudly() {
        let mut shifter = simple_shifter(vec![440.0]);
        shifter.process(&vec![0.0; CHUNK]).unwrap();
        let err = shifter.process(&vec![0.0; CHUNK / 2]).unwrap_err();
        assert!(matches!(
            err,
            PitchError::ChunkLength {
                expected: 512,
                actual: 256
            }
        ));
    }

    #[test]
    fn decrease_window_keeps_tail_and_pads_short_input() {
        let mut stage = DecreaseWindow::new(2).unwrap();
        assert_eq!(stage.process(&[1.0, 2.0, 3.0]).unwrap(), vec![2.0, 3.0]);
        assert_eq!(stage.process(&[4.0]).unwrap(), vec![0.0, 4.0]);
        assert!(DecreaseWindow::new(0).is_err());
    }

    #[test]
    fn upward_shift_is_trimmed_to_chunk_length() {
        // shifting up shortens the window, the output still spans one chunk
        let mut shifter = PitchShifter::from_settings(&EngineSettings {
            target: TargetSpec::Fixed(880.0),
            ..EngineSettings::default()
        })
        .unwrap();
        for chunk in sine_stream(440.0, 10) {
            assert_eq!(shifter.process(&chunk).unwrap().len(), CHUNK);
        }
        assert!(shifter.voiced > 0);
    }

    #[test]
    fn noise_gate_silences_quiet_chunks() {
        let mut gate = NoiseGate::new(0.1).unwrap();
        assert_eq!(gate.process(&[0.05, -0.05]).unwrap(), vec![0.0, 0.0]);
        assert_eq!(gate.process(&[0.5, -0.5]).unwrap(), vec![0.5, -0.5]);
        assert!(NoiseGate::new(-1.0).is_err());
    }

    #[test]
    fn downmix_averages_frames() {
        let mut stage = MonoDownmix::new(2).unwrap();
        assert_eq!(stage.process(&[1.0, 0.0, 0.5, 0.5]).unwrap(), vec![0.5, 0.5]);
        assert!(stage.process(&[1.0, 0.0, 0.5]).is_err());
    }

    #[derive(Default)]
    struct Collected {
        samples: Vec<f32>,
        finished: bool,
    }

    struct MemorySink(Rc<RefCell<Collected>>);

    impl AudioSink for MemorySink {
        fn write(&mut self, chunk: &[f32]) -> Result<()> {
            self.0.borrow_mut().samples.extend_from_slice(chunk);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.0.borrow_mut().finished = true;
            Ok(())
        }
    }

    #[test]
    fn sink_stage_forwards_and_finishes() {
        let collected = Rc::new(RefCell::new(Collected::default()));
        let mut stage = SinkProcessor::new(MemorySink(collected.clone()));
        assert_eq!(stage.process(&[0.25, 0.5]).unwrap(), vec![0.25, 0.5]);
        stage.finish().unwrap();
        assert_eq!(collected.borrow().samples, vec![0.25, 0.5]);
        assert!(collected.borrow().finished);
    }

    #[test]
    fn unvoiced_wave_is_not_shifted() {
        assert!(!WaveId::NO_PITCH.is_voiced());
    }
}
