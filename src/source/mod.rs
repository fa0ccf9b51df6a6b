//! Signal sources for the ECG workbench.
//!
//! A source turns a [`Recording`] reference into a [`WaveformSequence`].
//! Two variants exist: [`LiveSource`] reads from a health-data store and may
//! fail, [`SyntheticSource`] generates a deterministic waveform and never does.

pub mod directory;
pub mod live;
pub mod synthetic;
pub mod types;

use crate::store::Recording;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// Re-export commonly used types
pub use directory::DirectoryStore;
pub use live::{HealthStore, LiveSource, MemoryHealthStore, VoltageEvent};
pub use synthetic::SyntheticSource;
pub use types::{Sample, WaveformError, WaveformSequence};

/// Errors that can occur while acquiring a waveform.
#[derive(Debug, Clone, Error)]
pub enum AcquisitionError {
    #[error("no ECG data available for recording {0}")]
    NoData(Uuid),
    #[error("access to ECG data was denied")]
    AccessDenied,
    #[error("health store error: {0}")]
    Store(String),
    #[error("health store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Something that can produce a waveform for a recording.
pub trait SignalSource: Send + Sync {
    fn acquire(&self, recording: &Recording) -> Result<WaveformSequence, AcquisitionError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
