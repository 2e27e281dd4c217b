mod audio;
mod cli;
mod config;
mod encode;
mod error;
mod pipeline;
mod pitch;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use audio::decode::WavSource;
use audio::source::{AudioSource, LimitedSource, NoiseSource, SineSource};
use cli::Cli;
use encode::wav::WavSink;
use encode::AudioSink;
#[cfg(not(feature = "live"))]
use encode::NullSink;
#[cfg(not(feature = "live"))]
use error::PitchError;
use pipeline::filters::{BandPass, LowPass};
use pipeline::processors::{NoiseGate, PitchShifter, SinkProcessor};
use pipeline::{Pipeline, RunStats};
use pitch::target::Scale;
use pitch::{EngineSettings, TargetSpec};

const NOISE_SEED: u64 = 0x5eed;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    configure(&mut cli);

    let mut source = open_source(&cli)?;
    if let Some(seconds) = cli.duration {
        source = Box::new(LimitedSource::for_duration(source, seconds)?);
    }
    if source.sample_rate() != cli.sample_rate {
        log::warn!(
            "Input runs at {} Hz, overriding --sample-rate {}",
            source.sample_rate(),
            cli.sample_rate
        );
    }

    let settings = engine_settings(&cli, source.sample_rate())?;
    let mut pipeline = build_pipeline(&cli, &settings)?;
    log::info!("Pipeline: {}", pipeline.names().join(" -> "));

    let stop = Arc::new(AtomicBool::new(false));
    install_interrupt(&stop);

    let pb = source.chunks_remaining().map(|chunks| {
        let pb = ProgressBar::new(chunks as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks ({eta} remaining)")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    });

    let stats = run_pipeline(&mut pipeline, source.as_mut(), &stop, pb)?;

    log::info!(
        "Done: {} chunks at {:.1}x real time{}",
        stats.chunks,
        stats.realtime_factor(settings.sample_rate),
        if stats.interrupted { " (stopped early)" } else { "" }
    );
    Ok(())
}

/// The progress bar is cleared before any error is reported.
fn run_pipeline(
    pipeline: &mut Pipeline,
    source: &mut dyn AudioSource,
    stop: &AtomicBool,
    pb: Option<ProgressBar>,
) -> Result<RunStats> {
    let result = match pb {
        Some(ref pb) => pipeline.run_with_progress(source, stop, Some(pb)),
        None => pipeline.run(source, stop),
    };
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    result.context("Processing failed")
}

/// Loads the explicit --config path, or ./autotune.toml / global config,
/// and returns the path that was applied.
fn configure(cli: &mut Cli) -> Option<PathBuf> {
    let explicit = cli.config.is_some();
    let path = cli.config.clone().or_else(config::discover_config)?;
    match config::load_config(&path) {
        Some(cfg) => {
            log::info!("Loaded config from {}", path.display());
            apply_config(cli, cfg);
            Some(path)
        }
        None => {
            if explicit {
                log::warn!("Could not load config {}, using defaults", path.display());
            }
            None
        }
    }
}

/// Config values apply only where the CLI was left at its default.
fn apply_config(cli: &mut Cli, cfg: config::Config) {
    if cli.sample_rate == 44100 { cli.sample_rate = cfg.audio.sample_rate; }
    if cli.chunk_size == 512 { cli.chunk_size = cfg.audio.chunk_size; }
    if cli.threshold == 0.1 { cli.threshold = cfg.detector.threshold; }
    if cli.resolution == 3 { cli.resolution = cfg.detector.resolution; }
    if cli.detector == pitch::DetectorKind::Yin { cli.detector = cfg.detector.kind; }
    if cli.min_freq == 85.0 { cli.min_freq = cfg.detector.min_freq; }
    if cli.max_freq == 1100.0 { cli.max_freq = cfg.detector.max_freq; }
    if cli.lenience == 1.0 { cli.lenience = cfg.detector.lenience; }
    if cli.scale == "chromatic" { cli.scale = cfg.target.scale; }
    if cli.resampler == pitch::shift::ResampleMethod::Fft { cli.resampler = cfg.target.resampler; }
    if cli.target.is_none() {
        cli.target = cfg.target.frequency;
    }
    if cli.gate.is_none() {
        cli.gate = cfg.filters.gate;
    }
    if cli.low_pass.is_none() {
        cli.low_pass = cfg.filters.low_pass;
    }
    if cli.band_pass.is_none() {
        cli.band_pass = cfg.filters.band_pass;
    }
}

fn engine_settings(cli: &Cli, sample_rate: u32) -> Result<EngineSettings> {
    let target = match cli.target {
        Some(frequency) => TargetSpec::Fixed(frequency),
        None => TargetSpec::Scale(Scale::parse(&cli.scale)?),
    };
    let settings = EngineSettings {
        sample_rate,
        chunk_size: cli.chunk_size,
        threshold: cli.threshold,
        frequency_resolution: cli.resolution,
        min_freq: cli.min_freq,
        max_freq: cli.max_freq,
        lenience: cli.lenience,
        detector: cli.detector,
        target,
        resampler: cli.resampler,
    };
    settings.validate().context("Invalid engine settings")?;
    Ok(settings)
}

fn open_source(cli: &Cli) -> Result<Box<dyn AudioSource>> {
    if let Some(ref path) = cli.input {
        let source = WavSource::open(path, cli.chunk_size)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        return Ok(Box::new(source));
    }
    if let Some(frequency) = cli.sine {
        log::info!("Generating a {} Hz sine", frequency);
        return Ok(Box::new(SineSource::new(
            cli.sample_rate,
            cli.chunk_size,
            frequency,
            0.5,
        )));
    }
    if let Some(amplitude) = cli.noise {
        log::info!("Generating white noise at amplitude {}", amplitude);
        return Ok(Box::new(NoiseSource::new(
            cli.sample_rate,
            cli.chunk_size,
            amplitude,
            NOISE_SEED,
        )));
    }
    open_microphone(cli)
}

#[cfg(feature = "live")]
fn open_microphone(cli: &Cli) -> Result<Box<dyn AudioSource>> {
    let source = audio::live::MicrophoneSource::open(cli.sample_rate, cli.chunk_size)
        .context("Failed to open microphone")?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "live"))]
fn open_microphone(_cli: &Cli) -> Result<Box<dyn AudioSource>> {
    Err(PitchError::Device("microphone capture is not built in".into()))
        .context("No input given. Pass --input, --sine or --noise, or build with --features live")
}

fn open_sink(cli: &Cli, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
    if let Some(ref path) = cli.output {
        let sink = WavSink::create(path, sample_rate)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        return Ok(Box::new(sink));
    }
    open_speakers(sample_rate)
}

#[cfg(feature = "live")]
fn open_speakers(sample_rate: u32) -> Result<Box<dyn AudioSink>> {
    let sink = audio::live::PlaybackSink::open(sample_rate).context("Failed to open speakers")?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "live"))]
fn open_speakers(_sample_rate: u32) -> Result<Box<dyn AudioSink>> {
    log::warn!("No --output given and playback is not built in, output is discarded");
    Ok(Box::new(NullSink::new()))
}

fn build_pipeline(cli: &Cli, settings: &EngineSettings) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    if let Some(threshold) = cli.gate {
        pipeline.push(NoiseGate::new(threshold)?);
    }
    if let Some(cutoff) = cli.low_pass {
        pipeline.push(LowPass::new(cutoff, settings.sample_rate)?);
    }
    if let Some(ref band) = cli.band_pass {
        pipeline.push(BandPass::parse(band, settings.sample_rate)?);
    }
    Ok(pipeline
        .with(PitchShifter::from_settings(settings)?)
        .with(SinkProcessor::new(open_sink(cli, settings.sample_rate)?)))
}

/// Ctrl-C raises the stop flag; the pipeline finishes the chunk in flight,
/// finalizes its sinks and returns.
fn install_interrupt(stop: &Arc<AtomicBool>) {
    let stop = Arc::clone(stop);
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted, finishing the current chunk");
                stop.store(true, Ordering::Relaxed);
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitch::DetectorKind;

    #[test]
    fn config_fills_only_default_flags() {
        let mut cli = Cli::parse_from(["autotune", "--chunk-size", "1024"]);
        let cfg: config::Config = toml::from_str(
            r#"
            [audio]
            chunk_size = 256
            sample_rate = 48000

            [detector]
            kind = "harmonic"

            [target]
            frequency = 220.0
            "#,
        )
        .unwrap();
        apply_config(&mut cli, cfg);

        assert_eq!(cli.chunk_size, 1024);
        assert_eq!(cli.sample_rate, 48000);
        assert_eq!(cli.detector, DetectorKind::Harmonic);
        assert_eq!(cli.target, Some(220.0));
    }

    #[test]
    fn explicit_config_is_applied_or_skipped() {
        let mut cli = Cli::parse_from(["autotune", "--config", "/nonexistent/autotune.toml"]);
        assert!(configure(&mut cli).is_none());
        assert_eq!(cli.chunk_size, 512);

        let path = std::env::temp_dir().join(format!("autotune-cfg-{}.toml", std::process::id()));
        std::fs::write(&path, "[audio]\nchunk_size = 1024\n").unwrap();
        let mut cli = Cli::parse_from(["autotune", "--config", path.to_str().unwrap()]);
        assert_eq!(configure(&mut cli), Some(path.clone()));
        assert_eq!(cli.chunk_size, 1024);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn settings_use_source_rate_and_scale() {
        let cli = Cli::parse_from(["autotune", "--scale", "c-major"]);
        let settings = engine_settings(&cli, 48000).unwrap();
        assert_eq!(settings.sample_rate, 48000);
        assert_eq!(settings.target, TargetSpec::Scale(Scale::Major(0)));

        let bad = Cli::parse_from(["autotune", "--min-freq", "2000"]);
        assert!(engine_settings(&bad, 44100).is_err());
    }

    #[test]
    fn failed_run_clears_progress_bar() {
        let cli = Cli::parse_from(["autotune", "--chunk-size", "256"]);
        let settings = engine_settings(&cli, 44100).unwrap();
        let mut pipeline = Pipeline::new().with(PitchShifter::from_settings(&settings).unwrap());
        // source chunks do not match the shifter's chunk size
        let mut source = LimitedSource::new(SineSource::new(44100, 512, 440.0, 0.5), 4);
        let pb = ProgressBar::hidden();

        let result = run_pipeline(&mut pipeline, &mut source, &AtomicBool::new(false), Some(pb.clone()));
        assert!(result.is_err());
        assert!(pb.is_finished());
    }

    #[test]
    fn sine_to_wav_end_to_end() {
        let path = std::env::temp_dir().join(format!("autotune-e2e-{}.wav", std::process::id()));
        let cli = Cli::parse_from([
            "autotune",
            "--sine",
            "440",
            "--gate",
            "0.01",
            "--output",
            path.to_str().unwrap(),
        ]);
        let mut source = LimitedSource::new(open_source(&cli).unwrap(), 20);
        let settings = engine_settings(&cli, source.sample_rate()).unwrap();
        let mut pipeline = build_pipeline(&cli, &settings).unwrap();
        assert_eq!(pipeline.names(), vec!["noise-gate", "pitch-shift", "sink"]);

        let stats = pipeline.run(&mut source, &AtomicBool::new(false)).unwrap();
        assert_eq!(stats.chunks, 20);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 20 * 512);
        std::fs::remove_file(path).ok();
    }
}
