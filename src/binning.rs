use tracing::warn;

use crate::data::{numeric_entries, Weights};
use crate::error::{AnalysisError, Result};

/// Smallest bin width, used when the key range collapses to a point.
const MIN_BIN_WIDTH: f64 = 1e-10;

/// Outcome of binning one weight map.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedWeights {
    /// One entry per interval label, in interval order.
    pub weights: Weights,
    pub ignored_weight: f64,
    pub total_weight: f64,
}

impl BinnedWeights {
    pub fn ignored_fraction(&self) -> f64 {
        if self.total_weight == 0.0 {
            0.0
        } else {
            self.ignored_weight / self.total_weight
        }
    }
}

/// Reduces weight maps with numeric keys to `bin_count` contiguous intervals
/// over `[min_value, max_value]`.
#[derive(Debug, Clone)]
pub struct DictKeyBinner {
    min_value: f64,
    max_value: f64,
    bin_width: f64,
    labels: Vec<String>,
    normalize: bool,
}

impl DictKeyBinner {
    pub fn new(min_value: f64, max_value: f64, bin_count: usize) -> Result<Self> {
        if bin_count == 0 {
            return Err(AnalysisError::configuration("key binning needs at least one bin"));
        }
        if !min_value.is_finite() || !max_value.is_finite() || min_value > max_value {
            return Err(AnalysisError::configuration(format!(
                "invalid key range [{}, {}]",
                min_value, max_value
            )));
        }
        let bin_width = MIN_BIN_WIDTH.max((max_value - min_value) / bin_count as f64);

        let labels = (0..bin_count)
            .map(|i| {
                let a = min_value + i as f64 * bin_width;
                let b = (a + bin_width).min(max_value);
                let close = if i + 1 == bin_count { ']' } else { ')' };
                format!("[{},{}{}", format_bound(a), format_bound(b), close)
            })
            .collect();

        Ok(Self {
            min_value,
            max_value,
            bin_width,
            labels,
            normalize: false,
        })
    }

    /// Divide output weights by the total input weight, ignored weight included.
    pub fn normalized(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn bin_count(&self) -> usize {
        self.labels.len()
    }

    /// Index of the bin holding `key`, if it lies within range.
    pub fn bin_index(&self, key: f64) -> Option<usize> {
        if !(key >= self.min_value && key <= self.max_value) {
            return None;
        }
        if key == self.max_value {
            return Some(self.labels.len() - 1);
        }
        let idx = ((key - self.min_value) / self.bin_width).floor() as usize;
        Some(idx.min(self.labels.len() - 1))
    }

    pub fn label_for(&self, key: f64) -> Option<&str> {
        self.bin_index(key).map(|i| self.labels[i].as_str())
    }

    /// Bin `weights`. Keys must parse as numbers.
    pub fn bin(&self, weights: &Weights) -> Result<BinnedWeights> {
        let mut sums = vec![0.0; self.labels.len()];
        let mut total_weight = 0.0;
        let mut ignored_weight = 0.0;

        for (key, weight) in numeric_entries(weights)? {
            match self.bin_index(key) {
                Some(idx) => sums[idx] += weight,
                None => ignored_weight += weight,
            }
            total_weight += weight;
        }

        if ignored_weight > 0.0 {
            warn!(
                "ignoring {:.6}% of the key weight, which lies outside [{}, {}]",
                100.0 * ignored_weight / total_weight,
                self.min_value,
                self.max_value
            );
        }

        let divisor = if self.normalize && total_weight != 0.0 { total_weight } else { 1.0 };
        let weights = self
            .labels
            .iter()
            .zip(sums)
            .map(|(label, sum)| (label.clone(), sum / divisor))
            .collect();

        Ok(BinnedWeights {
            weights,
            ignored_weight,
            total_weight,
        })
    }
}

fn format_bound(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

/// Weight-weighted mean key over all maps.
pub fn mass_centroid(entries: &[Vec<(f64, f64)>]) -> Option<f64> {
    let (mass, moment) = entries
        .iter()
        .flatten()
        .fold((0.0, 0.0), |(m, s), (k, w)| (m + w, s + w * k));
    if mass == 0.0 {
        None
    } else {
        Some(moment / mass)
    }
}

/// Interval around the mass centroid covering `mass_fraction` of the total weight.
/// The interval grows symmetrically by `epsilon` times the key span per step.
pub fn mass_fraction_range(entries: &[Vec<(f64, f64)>], mass_fraction: f64, epsilon: f64) -> Option<(f64, f64)> {
    let centroid = mass_centroid(entries)?;
    let keys: Vec<f64> = entries.iter().flatten().map(|(k, _)| *k).collect();
    let (key_min, key_max) = crate::stats::finite_min_max(&keys)?;
    let total: f64 = entries.iter().flatten().map(|(_, w)| w).sum();
    let step = (key_max - key_min) * epsilon;
    if step <= 0.0 {
        return Some((key_min, key_max));
    }

    let mass_within = |a: f64, b: f64| -> f64 {
        entries
            .iter()
            .flatten()
            .filter(|(k, _)| *k >= a && *k <= b)
            .map(|(_, w)| w)
            .sum()
    };

    let (mut lo, mut hi) = (centroid, centroid);
    while mass_within(lo, hi) < total * mass_fraction && (lo > key_min || hi < key_max) {
        lo -= step;
        hi += step;
    }
    Some((lo, hi))
}

/// Interval of `width_fraction` times the key span, centred on the mass centroid.
pub fn width_fraction_range(entries: &[Vec<(f64, f64)>], width_fraction: f64) -> Option<(f64, f64)> {
    let centroid = mass_centroid(entries)?;
    let keys: Vec<f64> = entries.iter().flatten().map(|(k, _)| *k).collect();
    let (key_min, key_max) = crate::stats::finite_min_max(&keys)?;
    let half = MIN_BIN_WIDTH.max(key_max - key_min) * 0.5 * width_fraction;
    Some((centroid - half, centroid + half))
}
