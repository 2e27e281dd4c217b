use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::pitch::shift::ResampleMethod;
use crate::pitch::DetectorKind;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub filters: FilterConfig,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub kind: DetectorKind,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    #[serde(default = "default_min_freq")]
    pub min_freq: f32,
    #[serde(default = "default_max_freq")]
    pub max_freq: f32,
    #[serde(default = "default_lenience")]
    pub lenience: f32,
}

#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub frequency: Option<f32>,
    #[serde(default = "default_scale")]
    pub scale: String,
    #[serde(default)]
    pub resampler: ResampleMethod,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterConfig {
    pub gate: Option<f32>,
    pub low_pass: Option<f32>,
    pub band_pass: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::default(),
            threshold: default_threshold(),
            resolution: default_resolution(),
            min_freq: default_min_freq(),
            max_freq: default_max_freq(),
            lenience: default_lenience(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            frequency: None,
            scale: default_scale(),
            resampler: ResampleMethod::default(),
        }
    }
}

fn default_sample_rate() -> u32 { 44100 }
fn default_chunk_size() -> usize { 512 }
fn default_threshold() -> f32 { 0.1 }
fn default_resolution() -> u32 { 3 }
fn default_min_freq() -> f32 { 85.0 }
fn default_max_freq() -> f32 { 1100.0 }
fn default_lenience() -> f32 { 1.0 }
fn default_scale() -> String { "chromatic".into() }

/// Reads and parses a config file. A missing or malformed file is reported
/// and treated as absent.
pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Ignoring invalid config {}: {}", path.display(), e);
            None
        }
    }
}

/// `./autotune.toml`, then `~/.config/autotune/config.toml`, then the
/// platform config directory.
pub fn discover_config() -> Option<PathBuf> {
    let local = PathBuf::from("autotune.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("autotune").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    let platform = dirs::config_dir()?.join("autotune").join("config.toml");
    platform.exists().then_some(platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.chunk_size, 512);
        assert_eq!(config.detector.kind, DetectorKind::Yin);
        assert_eq!(config.target.scale, "chromatic");
        assert!(config.filters.gate.is_none());
    }

    #[test]
    fn parses_all_tables() {
        let config: Config = toml::from_str(
            r#"
            [audio]
            sample_rate = 48000

            [detector]
            kind = "autocorrelation"
            min_freq = 70.0

            [target]
            scale = "a-minor"
            resampler = "sinc"

            [filters]
            band_pass = "80:1200"
            "#,
        )
        .unwrap();
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.chunk_size, 512);
        assert_eq!(config.detector.kind, DetectorKind::Autocorrelation);
        assert_eq!(config.detector.min_freq, 70.0);
        assert_eq!(config.detector.max_freq, 1100.0);
        assert_eq!(config.target.scale, "a-minor");
        assert_eq!(config.target.resampler, ResampleMethod::Sinc);
        assert_eq!(config.filters.band_pass.as_deref(), Some("80:1200"));
    }

    #[test]
    fn missing_file_is_none() {
        assert!(load_config(Path::new("/nonexistent/autotune.toml")).is_none());
    }
}
