use rayon::prelude::*;

use super::spectrum::SpectralAnalyzer;
use super::FundamentalEstimator;
use crate::audio::features::WaveId;

/// Picks the loudest in-band bin.
pub struct SimpleSpectralEstimator {
    analyzer: SpectralAnalyzer,
}

impl SimpleSpectralEstimator {
    pub fn new(analyzer: SpectralAnalyzer) -> Self {
        Self { analyzer }
    }
}

impl FundamentalEstimator for SimpleSpectralEstimator {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn extract(&mut self, window: &[f32]) -> WaveId {
        let analytics = self.analyzer.analyse(window);
        match loudest_index(&analytics.magnitudes) {
            Some(index) => analytics.wave_at(index),
            None => WaveId::NO_PITCH,
        }
    }
}

/// Groups bins under their presumed fundamental and reports the loudest
/// member of the loudest group.
pub struct HarmonicSpectralEstimator {
    analyzer: SpectralAnalyzer,
    lenience: f32,
    cached: Option<(Vec<f32>, Vec<Option<usize>>)>,
}

impl HarmonicSpectralEstimator {
    pub fn new(analyzer: SpectralAnalyzer, lenience: f32) -> Self {
        Self {
            analyzer,
            lenience: lenience.max(0.0),
            cached: None,
        }
    }

    fn harmonic_indexes(&mut self, frequencies: &[f32]) -> &[Option<usize>] {
        if self
            .cached
            .as_ref()
            .is_some_and(|(range, _)| range.as_slice() != frequencies)
        {
            self.cached = None;
        }
        let lenience = self.lenience;
        let (_, indexes) = self.cached.get_or_insert_with(|| {
            log::debug!(
                "Building harmonic index map for {} bins (lenience {} Hz)",
                frequencies.len(),
                lenience
            );
            (frequencies.to_vec(), base_frequency_indexes(frequencies, lenience))
        });
        indexes
    }
}

impl FundamentalEstimator for HarmonicSpectralEstimator {
    fn name(&self) -> &'static str {
        "harmonic"
    }

    fn extract(&mut self, window: &[f32]) -> WaveId {
        let analytics = self.analyzer.analyse(window);
        if analytics.is_empty() {
            return WaveId::NO_PITCH;
        }
        let indexes = self.harmonic_indexes(&analytics.frequency_range);
        match loudest_harmonic_of_loudest_base(indexes, &analytics.magnitudes) {
            Some(index) => analytics.wave_at(index),
            None => WaveId::NO_PITCH,
        }
    }
}

/// First index holding the maximum magnitude.
pub fn loudest_index(magnitudes: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &m) in magnitudes.iter().enumerate() {
        if best.map_or(true, |(_, b)| m > b) {
            best = Some((i, m));
        }
    }
    best.map(|(i, _)| i)
}

/// For every bin, the highest lower bin at or below half its frequency
/// whose integer multiple lands within `lenience` Hz of it.
///
/// A zero-frequency bin never acts as a fundamental.
pub fn base_frequency_indexes(frequencies: &[f32], lenience: f32) -> Vec<Option<usize>> {
    (0..frequencies.len())
        .into_par_iter()
        .map(|i| {
            let freq = frequencies[i];
            (0..i).rev().find(|&j| {
                let base = frequencies[j];
                base > 0.0
                    && base <= freq / 2.0
                    && (freq - base * (freq / base).round()).abs() <= lenience
            })
        })
        .collect()
}

/// Sums magnitudes per fundamental group and returns the loudest bin of the
/// loudest group. Bins without a fundamental head their own group. Ties go
/// to the group, and then the bin, seen first in ascending index order.
pub fn loudest_harmonic_of_loudest_base(
    base_indexes: &[Option<usize>],
    magnitudes: &[f32],
) -> Option<usize> {
    let len = base_indexes.len().min(magnitudes.len());
    if len == 0 {
        return None;
    }

    let mut sums = vec![0.0f32; len];
    let mut loudest: Vec<Option<usize>> = vec![None; len];
    let mut order = Vec::new();

    for i in 0..len {
        let group = base_indexes[i].unwrap_or(i);
        if loudest[group].is_none() {
            order.push(group);
        }
        sums[group] += magnitudes[i];
        if loudest[group].map_or(true, |current| magnitudes[i] > magnitudes[current]) {
            loudest[group] = Some(i);
        }
    }

    let mut winner = order[0];
    for &group in &order[1..] {
        if sums[group] > sums[winner] {
            winner = group;
        }
    }
    loudest[winner]
}
