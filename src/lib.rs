//! ECG Workbench - acquisition, beat detection and HRV analysis of ECG recordings.
//!
//! This library turns a single-lead ECG recording into heartbeat timestamps,
//! R-R intervals and heart-rate-variability metrics, keeps a catalog of
//! recordings organised into named groups, and exports waveforms as delimited
//! text or zip bundles.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           ECG Workbench                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐             │
//! │  │   Source    │──▶│  Downsample │──▶│    Peaks    │             │
//! │  │(live/synth) │   │  (every Nth)│   │ (local max) │             │
//! │  └─────────────┘   └─────────────┘   └─────────────┘             │
//! │         │                                   │                    │
//! │         ▼                                   ▼                    │
//! │  ┌─────────────┐                     ┌─────────────┐             │
//! │  │  Catalog /  │                     │  RR + HRV   │◀── backend  │
//! │  │   Groups    │──▶ export (csv/zip) │   metrics   │             │
//! │  └─────────────┘                     └─────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ecg_workbench::{
//!     config::ProcessingConfig, MetricsEngine, Orchestrator, Recording, SyntheticSource,
//! };
//!
//! let mut orchestrator = Orchestrator::new(
//!     Arc::new(SyntheticSource::default()),
//!     MetricsEngine::Local,
//!     ProcessingConfig::default(),
//! );
//! orchestrator.process(Recording::new(chrono::Utc::now(), 30.0));
//!
//! if let Some(snapshot) = orchestrator.wait(Duration::from_secs(5)).snapshot() {
//!     println!("{} beats", snapshot.peaks.len());
//! }
//! ```

pub mod backend;
pub mod config;
pub mod core;
pub mod events;
pub mod export;
pub mod orchestrator;
pub mod source;
pub mod store;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use crate::core::{HrvMetrics, MetricsBundle, MetricsError, PeakSet, RrInterval};
pub use backend::{decode_metrics_response, BackendConfig, MetricsBackend};
pub use config::{Config, MetricsMode, ProcessingConfig};
pub use export::{ExportError, ExportFormat};
pub use orchestrator::{
    AnalysisSnapshot, MetricsEngine, Orchestrator, OrchestratorEvent, PipelineError,
    ProcessingState, RequestToken,
};
pub use source::{
    AcquisitionError, DirectoryStore, HealthStore, LiveSource, SignalSource, SyntheticSource,
    WaveformSequence,
};
pub use store::{Catalog, CatalogEvent, Recording};

// Backend client re-exports (when enabled)
#[cfg(feature = "backend")]
pub use backend::{BlockingMetricsClient, MetricsClient};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
