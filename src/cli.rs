use clap::Parser;
use std::path::PathBuf;

use crate::pitch::shift::ResampleMethod;
use crate::pitch::DetectorKind;

#[derive(Parser, Debug)]
#[command(name = "autotune", about = "Real-time pitch tracking and auto-tune")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG). Defaults to the microphone.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output WAV file. Defaults to the speakers.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Use a generated sine of this frequency as input
    #[arg(long, conflicts_with = "input")]
    pub sine: Option<f32>,

    /// Use seeded white noise of this amplitude as input
    #[arg(long, conflicts_with_all = ["input", "sine"])]
    pub noise: Option<f32>,

    /// Sample rate in Hz (file inputs use their own rate)
    #[arg(long, default_value_t = 44100)]
    pub sample_rate: u32,

    /// Samples per streamed chunk
    #[arg(long, default_value_t = 512)]
    pub chunk_size: usize,

    /// YIN detection threshold
    #[arg(long, default_value_t = 0.1)]
    pub threshold: f32,

    /// Analysis window is sample_rate / resolution samples long
    #[arg(long, default_value_t = 3)]
    pub resolution: u32,

    /// Pitch detection strategy
    #[arg(long, value_enum, default_value_t = DetectorKind::Yin)]
    pub detector: DetectorKind,

    /// Lowest frequency considered by the detectors (Hz)
    #[arg(long, default_value_t = 85.0)]
    pub min_freq: f32,

    /// Highest frequency considered by the detectors (Hz, exclusive)
    #[arg(long, default_value_t = 1100.0)]
    pub max_freq: f32,

    /// Harmonic grouping tolerance (Hz)
    #[arg(long, default_value_t = 1.0)]
    pub lenience: f32,

    /// Shift every voiced chunk to this fixed frequency instead of snapping to a scale
    #[arg(long)]
    pub target: Option<f32>,

    /// Scale to snap to: chromatic, or <root>-major / <root>-minor (e.g. c-major, f#-minor)
    #[arg(long, default_value = "chromatic")]
    pub scale: String,

    /// Resampling back end used for the shift
    #[arg(long, value_enum, default_value_t = ResampleMethod::Fft)]
    pub resampler: ResampleMethod,

    /// Silence chunks whose mean level is below this value
    #[arg(long)]
    pub gate: Option<f32>,

    /// Low-pass the input at this frequency before detection (Hz)
    #[arg(long)]
    pub low_pass: Option<f32>,

    /// Band-pass the input before detection, as lo:hi in Hz
    #[arg(long)]
    pub band_pass: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f32>,

    /// Config file (defaults to ./autotune.toml or ~/.config/autotune/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
