//! Decimation of waveforms for display and storage.

use crate::source::types::WaveformSequence;
use std::num::NonZeroUsize;

/// Keep every sample whose zero-based index is a multiple of `factor`.
///
/// No filtering or interpolation takes place. A factor of one returns the
/// input unchanged.
pub fn downsample(seq: &WaveformSequence, factor: NonZeroUsize) -> WaveformSequence {
    if factor.get() == 1 {
        return seq.clone();
    }
    let kept = seq.iter().step_by(factor.get()).copied().collect();
    WaveformSequence::from_ordered(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::types::Sample;

    fn ramp(n: usize) -> WaveformSequence {
        WaveformSequence::new((0..n).map(|i| Sample::new(i as f64, i as f64 * 2.0)).collect())
            .unwrap()
    }

    fn factor(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_factor_one_is_identity() {
        for n in [0, 1, 2, 7, 100] {
            let seq = ramp(n);
            assert_eq!(downsample(&seq, factor(1)), seq);
        }
    }

    #[test]
    fn test_length_and_indices() {
        for n in [0, 1, 2, 3, 10, 11, 99] {
            for f in 2..=7 {
                let out = downsample(&ramp(n), factor(f));
                assert_eq!(out.len(), (n + f - 1) / f, "n={n} f={f}");
                // Sample time equals its original index in the ramp.
                for s in &out {
                    assert_eq!(s.time as usize % f, 0);
                }
            }
        }
    }

    #[test]
    fn test_preserves_order_and_values() {
        let out = downsample(&ramp(10), factor(4));
        let times: Vec<f64> = out.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0.0, 4.0, 8.0]);
        assert_eq!(out.samples()[2].amplitude, 16.0);
    }
}
