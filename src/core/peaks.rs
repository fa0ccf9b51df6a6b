//! Heartbeat (fiducial point) detection.
//!
//! A beat is a strict single-sample local maximum above a fixed threshold.
//! There is no refractory period or minimum peak distance: a noisy lobe with
//! two local maxima above threshold yields two beats.

use crate::source::types::WaveformSequence;

/// Default detection threshold, in amplitude units (microvolts).
pub const DEFAULT_PEAK_THRESHOLD: f64 = 80.0;

/// Timestamps of detected peaks, strictly increasing.
pub type PeakSet = Vec<f64>;

/// Return the times of interior samples that exceed `threshold` and both
/// neighbours. Sequences shorter than three samples have no interior.
pub fn detect_peaks(seq: &WaveformSequence, threshold: f64) -> PeakSet {
    seq.samples()
        .windows(3)
        .filter(|w| {
            let (prev, cur, next) = (w[0].amplitude, w[1].amplitude, w[2].amplitude);
            cur > threshold && cur > prev && cur > next
        })
        .map(|w| w[1].time)
        .collect()
}
