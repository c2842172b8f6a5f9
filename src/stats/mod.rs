//! Feature statistics
//!
//! Summary statistics and fixed-width histograms for numeric feature
//! samples. Baselines and current snapshots are both built from these.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Number of bins in every feature histogram
pub const HISTOGRAM_BINS: usize = 10;

/// One histogram bin, tagged by its center value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    /// Bin center
    pub bin: f64,
    /// Number of observations falling in this bin
    pub count: u64,
}

/// Summary statistics for a numeric feature sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    /// Count of distinct values in the sample
    pub unique_count: u64,
    /// Equal-width histogram over [min, max]
    pub histogram: Vec<HistogramBin>,
}

/// Compute summary statistics and a 10-bin histogram for a sample.
///
/// An empty sample yields all-zero statistics and an empty histogram rather
/// than an error, so callers can treat "no data yet" as a benign state.
pub fn compute(values: &[f64]) -> FeatureStats {
    if values.is_empty() {
        return FeatureStats::default();
    }

    let n = values.len();
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();

    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };

    // Nearest-rank quartiles
    let q1 = sorted[(n as f64 * 0.25).floor() as usize];
    let q3 = sorted[(n as f64 * 0.75).floor() as usize];

    let min = sorted[0];
    let max = sorted[n - 1];

    let unique_count = values
        .iter()
        .map(|v| v.to_bits())
        .collect::<HashSet<_>>()
        .len() as u64;

    FeatureStats {
        mean,
        std_dev,
        min,
        max,
        median,
        q1,
        q3,
        unique_count,
        histogram: build_histogram(values, min, max),
    }
}

/// Build a fixed 10-bin equal-width histogram over [min, max].
///
/// The last bin is inclusive on both ends; all others are inclusive-low,
/// exclusive-high. A zero-range sample falls back to unit bin width, which
/// places every observation in the first bin.
fn build_histogram(values: &[f64], min: f64, max: f64) -> Vec<HistogramBin> {
    let mut bin_width = (max - min) / HISTOGRAM_BINS as f64;
    if bin_width == 0.0 {
        bin_width = 1.0;
    }

    (0..HISTOGRAM_BINS)
        .map(|i| {
            let bin_start = min + i as f64 * bin_width;
            let bin_end = bin_start + bin_width;
            let last = i == HISTOGRAM_BINS - 1;
            let count = values
                .iter()
                .filter(|&&v| v >= bin_start && if last { v <= bin_end } else { v < bin_end })
                .count() as u64;
            HistogramBin {
                bin: bin_start + bin_width / 2.0,
                count,
            }
        })
        .collect()
}
