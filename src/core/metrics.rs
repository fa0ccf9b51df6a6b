//! R-R interval derivation and heart-rate-variability statistics.
//!
//! Intervals are in seconds. The local statistics are the time-domain set the
//! reference analysis service computes (MeanRR, SDNN, RMSSD) plus pNN50, so a
//! waveform analysed locally and remotely reports the same numbers.
//! Frequency-domain metrics (LF/HF) only ever come from a remote service.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use thiserror::Error;

/// Mean of the R-R intervals.
pub const MEAN_RR: &str = "MeanRR";
/// Sample standard deviation of the R-R intervals.
pub const SDNN: &str = "SDNN";
/// Root mean square of successive differences.
pub const RMSSD: &str = "RMSSD";
/// Fraction of successive differences larger than 50 ms.
pub const PNN50: &str = "pNN50";
/// Low/high frequency power ratio.
pub const LF_HF: &str = "LF/HF";

/// Successive-difference threshold used by pNN50, in seconds.
const NN50_THRESHOLD_SECS: f64 = 0.050;

/// Gap between a peak and the one before it.
///
/// Locally derived intervals are stamped with the peak that closes them.
/// Tables decoded from a metrics service keep the service's own stamps; the
/// reference service uses the peak that opens each interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RrInterval {
    /// Peak time the row is stamped with
    pub timestamp: f64,
    /// Seconds since the previous peak; `None` for the first peak
    #[serde(alias = "rr")]
    pub interval: Option<f64>,
}

/// Metric name to value. Names outside the local set are kept as returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HrvMetrics(BTreeMap<String, f64>);

impl HrvMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for HrvMetrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Metrics plus the interval table they were computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub metrics: HrvMetrics,
    pub rr_intervals: Vec<RrInterval>,
}

/// Errors from the remote metrics path.
#[derive(Debug, Clone, Error)]
pub enum MetricsError {
    #[error("could not decode metrics response: {0}")]
    Decode(String),
    #[error("metrics service unavailable: {0}")]
    Unavailable(String),
}

/// Pair each peak with the gap to its predecessor.
pub fn derive_rr(peaks: &[f64]) -> Vec<RrInterval> {
    peaks
        .iter()
        .enumerate()
        .map(|(i, &timestamp)| RrInterval {
            timestamp,
            interval: (i > 0).then(|| timestamp - peaks[i - 1]),
        })
        .collect()
}

/// Time-domain HRV statistics over the non-null intervals.
///
/// Fewer than two intervals is not enough for any statistic and yields an
/// empty map.
pub fn compute_hrv(rr: &[RrInterval]) -> HrvMetrics {
    let intervals: Vec<f64> = rr.iter().filter_map(|r| r.interval).collect();
    let mut metrics = HrvMetrics::new();
    if intervals.len() < 2 {
        return metrics;
    }

    let diffs: Vec<f64> = intervals.windows(2).map(|w| w[1] - w[0]).collect();
    let rmssd = diffs.iter().map(|d| d * d).mean().sqrt();
    let nn50 = diffs.iter().filter(|d| d.abs() > NN50_THRESHOLD_SECS).count();

    metrics.insert(MEAN_RR, intervals.iter().mean());
    metrics.insert(SDNN, intervals.iter().std_dev());
    metrics.insert(RMSSD, rmssd);
    metrics.insert(PNN50, nn50 as f64 / diffs.len() as f64);
    metrics
}

/// Local derivation: intervals from peaks, then statistics.
pub fn analyze_peaks(peaks: &[f64]) -> MetricsBundle {
    let rr_intervals = derive_rr(peaks);
    let metrics = compute_hrv(&rr_intervals);
    MetricsBundle {
        metrics,
        rr_intervals,
    }
}
