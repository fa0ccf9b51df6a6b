//! Core signal processing for the ECG workbench.
//!
//! This module contains:
//! - Decimation of waveforms
//! - Peak (heartbeat) detection
//! - R-R interval derivation and HRV statistics

pub mod metrics;
pub mod peaks;
pub mod resample;

// Re-export commonly used types
pub use metrics::{
    analyze_peaks, compute_hrv, derive_rr, HrvMetrics, MetricsBundle, MetricsError, RrInterval,
};
pub use peaks::{detect_peaks, PeakSet, DEFAULT_PEAK_THRESHOLD};
pub use resample::downsample;
