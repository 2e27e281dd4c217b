use std::sync::Arc;

use crate::error::{PitchError, Result};

/// Maps a detected frequency to the frequency it should be shifted to.
///
/// Callers must not pass 0 Hz: unvoiced chunks are left unshifted.
pub trait TargetSelector {
    fn select(&self, detected: f32) -> f32;
}

/// Always the same tone.
#[derive(Debug, Clone)]
pub struct FixedTarget {
    frequency: f32,
}

impl FixedTarget {
    pub fn new(frequency: f32) -> Result<Self> {
        if !(frequency > 0.0) || !frequency.is_finite() {
            return Err(PitchError::config(format!(
                "fixed target frequency must be positive, got {}",
                frequency
            )));
        }
        Ok(Self { frequency })
    }
}

impl TargetSelector for FixedTarget {
    fn select(&self, _detected: f32) -> f32 {
        self.frequency
    }
}

/// Snaps to the closest entry of a frequency table.
#[derive(Debug, Clone)]
pub struct NearestInTable {
    table: Arc<[f32]>,
}

impl NearestInTable {
    pub fn new(table: impl Into<Arc<[f32]>>) -> Result<Self> {
        let table = table.into();
        if table.is_empty() {
            return Err(PitchError::config("frequency table is empty"));
        }
        if table.iter().any(|f| !(*f > 0.0) || !f.is_finite()) {
            return Err(PitchError::config("frequency table entries must be positive"));
        }
        Ok(Self { table })
    }
}

impl TargetSelector for NearestInTable {
    fn select(&self, detected: f32) -> f32 {
        self.table[snap_nearest_index(detected, &self.table)]
    }
}

/// Index of the option closest to `value`. Scans linearly with a strict
/// comparison, so the first of two equally close options wins.
pub fn snap_nearest_index(value: f32, options: &[f32]) -> usize {
    let mut nearest = 0;
    let mut smallest = (value - options[0]).abs();
    for (i, option) in options.iter().enumerate().skip(1) {
        let diff = (value - option).abs();
        if diff < smallest {
            nearest = i;
            smallest = diff;
        }
    }
    nearest
}

/// Equal-tempered frequency of a piano key, A4 (key 49) at 440 Hz.
pub fn note_frequency(key: i32) -> f32 {
    440.0 * 2f32.powf((key - 49) as f32 / 12.0)
}

pub const LOWEST_KEY: i32 = 16;
pub const HIGHEST_KEY: i32 = 88;

/// Piano keys 16..=88 (C2 to C8).
pub fn piano_notes() -> Vec<f32> {
    (LOWEST_KEY..=HIGHEST_KEY).map(note_frequency).collect()
}

const NOTE_NAMES: [&str; 12] = ["c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b"];
const MAJOR_STEPS: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];
const MINOR_STEPS: [i32; 7] = [0, 2, 3, 5, 7, 8, 10];

/// Set of pitch classes notes are snapped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scale {
    Chromatic,
    Major(i32),
    Minor(i32),
}

impl Scale {
    /// Parses `chromatic`, `<root>-major` or `<root>-minor`, e.g. `f#-minor`, `bb-major`.
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        if name == "chromatic" {
            return Ok(Scale::Chromatic);
        }
        let (root, mode) = name
            .split_once('-')
            .ok_or_else(|| PitchError::config(format!("unknown scale '{}'", name)))?;
        let pitch_class = pitch_class(root)
            .ok_or_else(|| PitchError::config(format!("unknown root note '{}'", root)))?;
        match mode {
            "major" => Ok(Scale::Major(pitch_class)),
            "minor" => Ok(Scale::Minor(pitch_class)),
            other => Err(PitchError::config(format!("unknown scale mode '{}'", other))),
        }
    }

    fn contains_key(&self, key: i32) -> bool {
        // key 40 is C4
        let class = (key + 8).rem_euclid(12);
        match self {
            Scale::Chromatic => (LOWEST_KEY..=HIGHEST_KEY).contains(&key),
            Scale::Major(root) => MAJOR_STEPS.contains(&(class - root).rem_euclid(12)),
            Scale::Minor(root) => MINOR_STEPS.contains(&(class - root).rem_euclid(12)),
        }
    }

    /// Piano-range frequencies belonging to the scale, ascending.
    pub fn frequencies(&self) -> Vec<f32> {
        if *self == Scale::Chromatic {
            return piano_notes();
        }
        (LOWEST_KEY..=HIGHEST_KEY)
            .filter(|&key| self.contains_key(key))
            .map(note_frequency)
            .collect()
    }
}

fn pitch_class(root: &str) -> Option<i32> {
    if let Some(i) = NOTE_NAMES.iter().position(|n| *n == root) {
        return Some(i as i32);
    }
    let natural = root.strip_suffix('b')?;
    NOTE_NAMES
        .iter()
        .position(|n| *n == natural)
        .map(|i| (i as i32 - 1).rem_euclid(12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_prefers_first_on_exact_midpoint() {
        let table = [100.0, 200.0, 300.0];
        assert_eq!(snap_nearest_index(149.0, &table), 0);
        assert_eq!(snap_nearest_index(151.0, &table), 1);
        assert_eq!(snap_nearest_index(150.0, &table), 0);
        assert_eq!(snap_nearest_index(1000.0, &table), 2);
    }

    #[test]
    fn nearest_selector_snaps_to_table() {
        let selector = NearestInTable::new(vec![440.0, 493.88]).unwrap();
        assert_eq!(selector.select(440.0), 440.0);
        assert_eq!(selector.select(470.0), 493.88);
        assert_eq!(selector.select(10_000.0), 493.88);
    }

    #[test]
    fn fixed_target_ignores_input() {
        let selector = FixedTarget::new(220.0).unwrap();
        assert_eq!(selector.select(100.0), 220.0);
        assert_eq!(selector.select(900.0), 220.0);
    }

    #[test]
    fn invalid_selectors_fail_at_construction() {
        assert!(NearestInTable::new(Vec::<f32>::new()).is_err());
        assert!(NearestInTable::new(vec![440.0, 0.0]).is_err());
        assert!(FixedTarget::new(0.0).is_err());
        assert!(FixedTarget::new(f32::NAN).is_err());
    }

    #[test]
    fn piano_table_spans_c2_to_c8() {
        let notes = piano_notes();
        assert_eq!(notes.len(), 73);
        assert!((notes[0] - 65.406).abs() < 0.01);
        assert!((note_frequency(49) - 440.0).abs() < 1e-3);
        assert!((notes[72] - 4186.01).abs() < 0.1);
    }

    #[test]
    fn scales_filter_pitch_classes() {
        assert_eq!(Scale::parse("chromatic").unwrap().frequencies(), piano_notes());

        let c_major = Scale::parse("C-Major").unwrap();
        assert_eq!(c_major, Scale::Major(0));
        let freqs = c_major.frequencies();
        // A4 is in C major, A#4 is not
        assert!(freqs.iter().any(|f| (f - 440.0).abs() < 1e-3));
        assert!(!freqs.iter().any(|f| (f - note_frequency(50)).abs() < 1e-3));

        assert_eq!(Scale::parse("a-minor").unwrap().frequencies(), freqs);
        assert_eq!(Scale::parse("bb-major").unwrap(), Scale::Major(10));
        assert!(Scale::parse("h-major").is_err());
        assert!(Scale::parse("c-lydian").is_err());
    }
}
