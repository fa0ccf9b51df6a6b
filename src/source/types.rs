//! Waveform types shared by every signal source.
//!
//! Amplitudes are carried in microvolts, the unit health stores report ECG
//! voltages in. Conversion to millivolts happens only at export time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One ECG sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the start of the recording
    pub time: f64,
    /// Amplitude in microvolts
    pub amplitude: f64,
}

impl Sample {
    pub fn new(time: f64, amplitude: f64) -> Self {
        Self { time, amplitude }
    }
}

/// Errors raised when a sample sequence breaks the ordering invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaveformError {
    #[error("sample {index} at {time}s does not follow the previous sample in time")]
    NotIncreasing { index: usize, time: f64 },
    #[error("sample {index} has a non-finite time")]
    NonFiniteTime { index: usize },
}

/// Time-ordered samples with strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WaveformSequence {
    samples: Vec<Sample>,
}

impl WaveformSequence {
    /// Build a sequence, rejecting any sample that does not strictly follow its
    /// predecessor.
    pub fn new(samples: Vec<Sample>) -> Result<Self, WaveformError> {
        for (index, sample) in samples.iter().enumerate() {
            if !sample.time.is_finite() {
                return Err(WaveformError::NonFiniteTime { index });
            }
            if index > 0 && sample.time <= samples[index - 1].time {
                return Err(WaveformError::NotIncreasing {
                    index,
                    time: sample.time,
                });
            }
        }
        Ok(Self { samples })
    }

    /// Build a sequence from raw device output, dropping samples whose time is
    /// not finite or does not advance past the last kept sample.
    ///
    /// Returns the sequence and the number of dropped samples.
    pub fn normalize(raw: impl IntoIterator<Item = Sample>) -> (Self, usize) {
        let mut samples: Vec<Sample> = Vec::new();
        let mut dropped = 0;
        for sample in raw {
            let advances = samples.last().map_or(true, |last| sample.time > last.time);
            if sample.time.is_finite() && sample.amplitude.is_finite() && advances {
                samples.push(sample);
            } else {
                dropped += 1;
            }
        }
        (Self { samples }, dropped)
    }

    /// Construct from samples already known to be strictly increasing.
    pub(crate) fn from_ordered(samples: Vec<Sample>) -> Self {
        debug_assert!(samples.windows(2).all(|w| w[0].time < w[1].time));
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time of the last sample, or zero for an empty sequence.
    pub fn duration(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.time)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }
}

impl<'a> IntoIterator for &'a WaveformSequence {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl<'de> Deserialize<'de> for WaveformSequence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            samples: Vec<Sample>,
        }
        let raw = Raw::deserialize(deserializer)?;
        WaveformSequence::new(raw.samples).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_duplicate_time() {
        let samples = vec![Sample::new(0.0, 1.0), Sample::new(0.0, 2.0)];
        let err = WaveformSequence::new(samples).unwrap_err();
        assert_eq!(err, WaveformError::NotIncreasing { index: 1, time: 0.0 });
    }

    #[test]
    fn test_normalize_drops_out_of_order() {
        let raw = vec![
            Sample::new(0.0, 1.0),
            Sample::new(0.5, 2.0),
            Sample::new(0.5, 3.0),
            Sample::new(0.25, 4.0),
            Sample::new(1.0, f64::NAN),
            Sample::new(1.5, 5.0),
        ];
        let (seq, dropped) = WaveformSequence::normalize(raw);
        assert_eq!(dropped, 3);
        let times: Vec<f64> = seq.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.5]);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"samples":[{"time":1.0,"amplitude":0.0},{"time":0.5,"amplitude":0.0}]}"#;
        assert!(serde_json::from_str::<WaveformSequence>(json).is_err());

        let json = r#"{"samples":[{"time":0.0,"amplitude":0.0},{"time":0.5,"amplitude":3.0}]}"#;
        let seq: WaveformSequence = serde_json::from_str(json).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.duration(), 0.5);
    }
}
