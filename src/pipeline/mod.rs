//! Ordered chain of stateful chunk processors.
//!
//! Every chunk pulled from a source is folded through the processors in
//! order, the output of one stage feeding the next. Stages keep their own
//! state (overlap buffers, filter memories, open files) between chunks, so a
//! pipeline must be driven from a single thread.

pub mod filters;
pub mod processors;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::audio::source::AudioSource;
use crate::error::Result;

pub trait ChunkProcessor {
    fn name(&self) -> &str;

    fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>>;

    /// Flushes buffered output and releases resources. Called once when the
    /// run ends, however it ends.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunStats {
    pub chunks: usize,
    pub samples: usize,
    pub elapsed: Duration,
    /// Set when the stop flag ended the run before the source did
    pub interrupted: bool,
}

impl RunStats {
    /// Seconds of audio processed per second of wall time.
    pub fn realtime_factor(&self, sample_rate: u32) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 || sample_rate == 0 {
            return 0.0;
        }
        self.samples as f64 / sample_rate as f64 / secs
    }
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn ChunkProcessor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl ChunkProcessor + 'static) -> Self {
        self.push(stage);
        self
    }

    pub fn push(&mut self, stage: impl ChunkProcessor + 'static) {
        self.stages.push(Box::new(stage));
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn process(&mut self, chunk: &[f32]) -> Result<Vec<f32>> {
        let mut current = chunk.to_vec();
        for stage in &mut self.stages {
            current = stage.process(&current)?;
        }
        Ok(current)
    }

    /// Finishes every stage, reporting the first failure after all have run.
    pub fn finish(&mut self) -> Result<()> {
        let mut first_error = None;
        for stage in &mut self.stages {
            if let Err(e) = stage.finish() {
                log::warn!("Stage '{}' failed to finish: {}", stage.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn run(&mut self, source: &mut dyn AudioSource, stop: &AtomicBool) -> Result<RunStats> {
        self.run_with_progress(source, stop, None)
    }

    /// Pulls chunks until the source ends or `stop` is raised. The chunk in
    /// flight when `stop` is raised is still processed. Stages are finished
    /// and the source closed on every exit path.
    pub fn run_with_progress(
        &mut self,
        source: &mut dyn AudioSource,
        stop: &AtomicBool,
        progress: Option<&ProgressBar>,
    ) -> Result<RunStats> {
        let started = Instant::now();
        let mut stats = RunStats::default();

        let outcome = self.drive(source, stop, progress, &mut stats);
        let finished = self.finish();
        let closed = source.close();
        stats.elapsed = started.elapsed();

        outcome?;
        finished?;
        closed?;

        log::info!(
            "Processed {} chunks ({:.1}s of audio) in {:.2?}{}",
            stats.chunks,
            stats.samples as f64 / source.sample_rate().max(1) as f64,
            stats.elapsed,
            if stats.interrupted { ", interrupted" } else { "" }
        );
        Ok(stats)
    }

    fn drive(
        &mut self,
        source: &mut dyn AudioSource,
        stop: &AtomicBool,
        progress: Option<&ProgressBar>,
        stats: &mut RunStats,
    ) -> Result<()> {
        loop {
            if stop.load(Ordering::Relaxed) {
                stats.interrupted = true;
                return Ok(());
            }
            let Some(chunk) = source.next_chunk()? else {
                return Ok(());
            };
            self.process(&chunk)?;
            stats.chunks += 1;
            stats.samples += chunk.len();
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }
    }
}
