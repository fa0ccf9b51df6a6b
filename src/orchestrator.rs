//! Processing workflow: acquisition, resampling, peak detection, metrics.
//!
//! [`Orchestrator`] is the single owner of the processing state and of the
//! recording [`Catalog`]. Each call to [`Orchestrator::process`] starts a new
//! request with a fresh generation number and runs the pipeline on a worker
//! thread. Workers send their results back over a channel; the owner applies
//! them in [`Orchestrator::pump`] or [`Orchestrator::wait`], dropping any
//! result whose generation is no longer current.
//!
//! ```text
//! Idle ──process──▶ Acquiring ──▶ Processing ──▶ Ready
//!                       │              │
//!                       └──────────────┴──────▶ Failed
//! ```

use crate::backend::MetricsBackend;
use crate::config::ProcessingConfig;
use crate::core::{
    analyze_peaks, detect_peaks, downsample, HrvMetrics, MetricsBundle, MetricsError, PeakSet,
    RrInterval,
};
use crate::events::Notifier;
use crate::export::{to_archive, to_delimited_text, ExportError, ExportFormat};
use crate::source::{AcquisitionError, HealthStore, SignalSource, WaveformSequence};
use crate::store::{Catalog, Recording};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Where the metrics stage gets its numbers.
#[derive(Clone)]
pub enum MetricsEngine {
    /// Derived from the detected peaks in-process
    Local,
    /// Requested from a metrics service
    Remote(Arc<dyn MetricsBackend>),
}

impl MetricsEngine {
    fn run(
        &self,
        waveform: &WaveformSequence,
        peaks: &PeakSet,
    ) -> Result<MetricsBundle, MetricsError> {
        match self {
            MetricsEngine::Local => Ok(analyze_peaks(peaks)),
            MetricsEngine::Remote(backend) => backend.analyze(waveform),
        }
    }
}

impl std::fmt::Debug for MetricsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsEngine::Local => write!(f, "Local"),
            MetricsEngine::Remote(_) => write!(f, "Remote"),
        }
    }
}

/// Failure of one processing request.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Everything one successful request produced, published as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSnapshot {
    pub recording: Recording,
    /// Waveform after resampling
    pub waveform: WaveformSequence,
    pub peaks: PeakSet,
    pub rr_intervals: Vec<RrInterval>,
    pub metrics: HrvMetrics,
}

/// State of the current processing request.
#[derive(Debug, Clone)]
pub enum ProcessingState {
    Idle,
    Acquiring,
    Processing,
    Ready(Arc<AnalysisSnapshot>),
    Failed(PipelineError),
}

impl ProcessingState {
    /// Whether the request reached an end state (or none was started).
    pub fn is_settled(&self) -> bool {
        !matches!(self, ProcessingState::Acquiring | ProcessingState::Processing)
    }

    pub fn snapshot(&self) -> Option<&Arc<AnalysisSnapshot>> {
        match self {
            ProcessingState::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProcessingState::Idle => "idle",
            ProcessingState::Acquiring => "acquiring",
            ProcessingState::Processing => "processing",
            ProcessingState::Ready(_) => "ready",
            ProcessingState::Failed(_) => "failed",
        }
    }
}

/// Identifies one processing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

/// Change notifications published by an [`Orchestrator`].
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    StateChanged {
        token: RequestToken,
        state: ProcessingState,
    },
    /// A metrics refresh failed; the ready snapshot was kept
    MetricsRefreshFailed {
        token: RequestToken,
        error: MetricsError,
    },
}

/// Message from a worker thread to the owner.
enum WorkerMessage {
    Processing(u64),
    Finished(u64, Result<AnalysisSnapshot, PipelineError>),
    MetricsRefreshed(u64, Result<MetricsBundle, MetricsError>),
}

/// Owner of the processing state and the recording catalog.
pub struct Orchestrator {
    source: Arc<dyn SignalSource>,
    engine: MetricsEngine,
    processing: ProcessingConfig,
    catalog: Catalog,
    state: ProcessingState,
    generation: u64,
    current: Arc<AtomicU64>,
    refresh_pending: bool,
    sender: Sender<WorkerMessage>,
    receiver: Receiver<WorkerMessage>,
    notifier: Notifier<OrchestratorEvent>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SignalSource>,
        engine: MetricsEngine,
        processing: ProcessingConfig,
    ) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            source,
            engine,
            processing,
            catalog: Catalog::new(),
            state: ProcessingState::Idle,
            generation: 0,
            current: Arc::new(AtomicU64::new(0)),
            refresh_pending: false,
            sender,
            receiver,
            notifier: Notifier::new(),
        }
    }

    /// Use `catalog` as the recording catalog.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn subscribe(&mut self) -> Receiver<OrchestratorEvent> {
        self.notifier.subscribe()
    }

    pub fn state(&self) -> &ProcessingState {
        &self.state
    }

    /// The ready snapshot of the current request, if any.
    pub fn snapshot(&self) -> Option<&Arc<AnalysisSnapshot>> {
        self.state.snapshot()
    }

    /// Token of the most recent request.
    pub fn current_token(&self) -> RequestToken {
        RequestToken(self.generation)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Re-list the catalog from a health store.
    pub fn refresh_catalog(
        &mut self,
        store: &dyn HealthStore,
    ) -> Result<&[Recording], AcquisitionError> {
        self.catalog.fetch_catalog(store)
    }

    /// Start processing `recording`, superseding any request in flight.
    ///
    /// The previous snapshot is cleared before the worker starts.
    pub fn process(&mut self, recording: Recording) -> RequestToken {
        self.generation += 1;
        let generation = self.generation;
        self.current.store(generation, Ordering::SeqCst);
        self.refresh_pending = false;
        self.set_state(ProcessingState::Acquiring);

        let source = Arc::clone(&self.source);
        let engine = self.engine.clone();
        let processing = self.processing;
        let current = Arc::clone(&self.current);
        let sender = self.sender.clone();

        tracing::info!(
            generation,
            recording = %recording.id,
            source = source.name(),
            "Processing request started"
        );

        thread::spawn(move || {
            let superseded = || current.load(Ordering::SeqCst) != generation;

            let waveform = match source.acquire(&recording) {
                Ok(waveform) => waveform,
                Err(e) => {
                    let _ = sender.send(WorkerMessage::Finished(generation, Err(e.into())));
                    return;
                }
            };
            if superseded() {
                return;
            }
            let _ = sender.send(WorkerMessage::Processing(generation));

            let waveform = downsample(&waveform, processing.downsample_factor);
            let peaks = detect_peaks(&waveform, processing.peak_threshold);
            if superseded() {
                return;
            }
            let outcome = engine
                .run(&waveform, &peaks)
                .map(|bundle| AnalysisSnapshot {
                    recording,
                    waveform,
                    peaks,
                    rr_intervals: bundle.rr_intervals,
                    metrics: bundle.metrics,
                })
                .map_err(PipelineError::from);
            let _ = sender.send(WorkerMessage::Finished(generation, outcome));
        });

        RequestToken(generation)
    }

    /// Ask the metrics service again for the ready snapshot's waveform.
    ///
    /// Returns `false` when there is no ready snapshot or metrics are local.
    /// On success the snapshot is replaced as a whole; on failure it is kept
    /// and [`OrchestratorEvent::MetricsRefreshFailed`] is published.
    pub fn refresh_metrics(&mut self) -> bool {
        let MetricsEngine::Remote(backend) = &self.engine else {
            return false;
        };
        let Some(snapshot) = self.state.snapshot() else {
            return false;
        };

        let backend = Arc::clone(backend);
        let snapshot = Arc::clone(snapshot);
        let generation = self.generation;
        let sender = self.sender.clone();
        self.refresh_pending = true;

        thread::spawn(move || {
            let outcome = backend.analyze(&snapshot.waveform);
            let _ = sender.send(WorkerMessage::MetricsRefreshed(generation, outcome));
        });
        true
    }

    /// Apply every result that has arrived, without blocking.
    pub fn pump(&mut self) -> &ProcessingState {
        while let Ok(message) = self.receiver.try_recv() {
            self.apply(message);
        }
        &self.state
    }

    /// Apply results until the current request settles or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> &ProcessingState {
        let deadline = Instant::now() + timeout;
        while !self.state.is_settled() || self.refresh_pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(message) => self.apply(message),
                Err(_) => break,
            }
        }
        &self.state
    }

    /// Delimited export of the ready snapshot's waveform.
    pub fn export_current(&self, format: &ExportFormat) -> Option<String> {
        self.snapshot()
            .map(|snapshot| to_delimited_text(&snapshot.waveform, format))
    }

    /// Zip bundle of every member of `group`.
    pub fn export_group(
        &self,
        group: &str,
        format: &ExportFormat,
    ) -> Result<Vec<u8>, ExportError> {
        let members = self.catalog.group(group).unwrap_or(&[]);
        to_archive(group, members, self.source.as_ref(), format)
    }

    fn apply(&mut self, message: WorkerMessage) {
        let generation = match &message {
            WorkerMessage::Processing(g)
            | WorkerMessage::Finished(g, _)
            | WorkerMessage::MetricsRefreshed(g, _) => *g,
        };
        if generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                "Discarding result of superseded request"
            );
            return;
        }

        match message {
            WorkerMessage::Processing(_) => self.set_state(ProcessingState::Processing),
            WorkerMessage::Finished(_, Ok(snapshot)) => {
                tracing::info!(
                    generation,
                    samples = snapshot.waveform.len(),
                    peaks = snapshot.peaks.len(),
                    "Processing request ready"
                );
                self.set_state(ProcessingState::Ready(Arc::new(snapshot)));
            }
            WorkerMessage::Finished(_, Err(e)) => {
                tracing::warn!(generation, "Processing request failed: {e}");
                self.set_state(ProcessingState::Failed(e));
            }
            WorkerMessage::MetricsRefreshed(_, outcome) => {
                self.refresh_pending = false;
                let Some(current) = self.state.snapshot() else {
                    return;
                };
                match outcome {
                    Ok(bundle) => {
                        let mut snapshot = AnalysisSnapshot::clone(current);
                        snapshot.metrics = bundle.metrics;
                        snapshot.rr_intervals = bundle.rr_intervals;
                        self.set_state(ProcessingState::Ready(Arc::new(snapshot)));
                    }
                    Err(error) => {
                        tracing::warn!(generation, "Metrics refresh failed: {error}");
                        self.notifier.publish(OrchestratorEvent::MetricsRefreshFailed {
                            token: RequestToken(generation),
                            error,
                        });
                    }
                }
            }
        }
    }

    fn set_state(&mut self, state: ProcessingState) {
        self.state = state;
        self.notifier.publish(OrchestratorEvent::StateChanged {
            token: RequestToken(self.generation),
            state: self.state.clone(),
        });
    }
}
