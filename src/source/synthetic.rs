//! Deterministic sinusoidal ECG stand-in.
//!
//! The generator is the reproducible baseline the rest of the pipeline is
//! tested against: one positive lobe per beat, so a beat frequency `f` over a
//! duration `D` yields `floor(f * D)` peaks (give or take the lobe cut at the
//! end of the window).

use crate::source::types::{Sample, WaveformSequence};
use crate::source::{AcquisitionError, SignalSource};
use crate::store::Recording;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Default sampling rate of the synthetic generator.
pub const DEFAULT_SAMPLING_RATE_HZ: f64 = 512.0;

/// Default recording length of the synthetic generator.
pub const DEFAULT_DURATION_SECS: f64 = 30.0;

/// Parameters of the synthetic waveform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSource {
    /// Samples per second
    pub sampling_rate: f64,
    /// Length of the generated recording in seconds
    pub duration: f64,
    /// Beats per second
    pub beat_frequency: f64,
    /// Peak amplitude in microvolts
    pub amplitude: f64,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            sampling_rate: DEFAULT_SAMPLING_RATE_HZ,
            duration: DEFAULT_DURATION_SECS,
            beat_frequency: 1.2, // 72 bpm
            amplitude: 1000.0,
        }
    }
}

impl SyntheticSource {
    pub fn with_beat_frequency(mut self, beat_frequency: f64) -> Self {
        self.beat_frequency = beat_frequency;
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// Number of samples the generator produces.
    pub fn sample_count(&self) -> usize {
        if self.sampling_rate <= 0.0 || self.duration <= 0.0 {
            return 0;
        }
        (self.sampling_rate * self.duration).floor() as usize
    }

    /// Generate the waveform. Pure function of the parameters.
    pub fn generate(&self) -> WaveformSequence {
        let samples = (0..self.sample_count())
            .map(|i| {
                let t = i as f64 / self.sampling_rate;
                Sample::new(t, self.amplitude * (2.0 * PI * self.beat_frequency * t).sin())
            })
            .collect();
        WaveformSequence::from_ordered(samples)
    }
}

impl SignalSource for SyntheticSource {
    fn acquire(&self, _recording: &Recording) -> Result<WaveformSequence, AcquisitionError> {
        Ok(self.generate())
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shape() {
        let source = SyntheticSource::default();
        let seq = source.generate();
        assert_eq!(seq.len(), 512 * 30);
        assert_eq!(seq.samples()[0].time, 0.0);
        assert!((seq.samples()[1].time - 1.0 / 512.0).abs() < 1e-12);

        let max = seq.iter().map(|s| s.amplitude).fold(f64::MIN, f64::max);
        assert!(max > 990.0 && max <= 1000.0);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let source = SyntheticSource::default().with_duration(2.0);
        assert_eq!(source.generate(), source.generate());
    }

    #[test]
    fn test_degenerate_parameters_yield_empty() {
        let source = SyntheticSource::default().with_duration(0.0);
        assert!(source.generate().is_empty());
    }
}
