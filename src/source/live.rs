//! Acquisition from a health-data store.
//!
//! Stores deliver voltage data asynchronously: a query hands the store a
//! channel sender and the store pushes batches on whatever thread it likes,
//! finishing with [`VoltageEvent::Finished`] or [`VoltageEvent::Failed`].
//! [`LiveSource`] collects the batches with a bounded wait and normalizes
//! them into a [`WaveformSequence`].

use crate::source::types::{Sample, WaveformSequence};
use crate::source::{AcquisitionError, SignalSource};
use crate::store::Recording;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Message pushed by a health store while answering a voltage query.
#[derive(Debug, Clone)]
pub enum VoltageEvent {
    /// A batch of raw samples, in device order
    Samples(Vec<Sample>),
    /// The query delivered everything it had
    Finished,
    /// The query failed after it started
    Failed(String),
}

/// A platform health-data store holding ECG recordings.
pub trait HealthStore: Send + Sync {
    /// Whether the user granted read access to ECG data.
    fn is_authorized(&self) -> bool;

    /// List the recordings the store currently knows about.
    fn list_recordings(&self) -> Result<Vec<Recording>, AcquisitionError>;

    /// Start a voltage query for one recording. Results arrive on `sink`.
    fn query_voltages(&self, id: Uuid, sink: Sender<VoltageEvent>);
}

/// Reads recordings from a [`HealthStore`].
#[derive(Clone)]
pub struct LiveSource {
    store: Arc<dyn HealthStore>,
    timeout: Duration,
    max_samples: usize,
}

impl LiveSource {
    /// Default bound on how long a voltage query may take.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Upper bound on samples per recording (a 60 s strip at 512 Hz, doubled).
    pub const DEFAULT_MAX_SAMPLES: usize = 512 * 60 * 2;

    pub fn new(store: Arc<dyn HealthStore>) -> Self {
        Self {
            store,
            timeout: Self::DEFAULT_TIMEOUT,
            max_samples: Self::DEFAULT_MAX_SAMPLES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }
}

impl SignalSource for LiveSource {
    fn acquire(&self, recording: &Recording) -> Result<WaveformSequence, AcquisitionError> {
        if !self.store.is_authorized() {
            return Err(AcquisitionError::AccessDenied);
        }

        let (sender, receiver) = unbounded();
        self.store.query_voltages(recording.id, sender);

        let deadline = Instant::now() + self.timeout;
        let mut raw: Vec<Sample> = Vec::new();
        let mut truncated = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(VoltageEvent::Samples(batch)) => {
                    let room = self.max_samples.saturating_sub(raw.len());
                    if batch.len() > room {
                        truncated = true;
                    }
                    raw.extend(batch.into_iter().take(room));
                }
                Ok(VoltageEvent::Finished) => break,
                Ok(VoltageEvent::Failed(reason)) => {
                    return Err(AcquisitionError::Store(reason));
                }
                // Store dropped the sender without an explicit finish.
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AcquisitionError::Timeout(self.timeout));
                }
            }
        }

        if truncated {
            tracing::warn!(
                recording = %recording.id,
                max_samples = self.max_samples,
                "Recording truncated to the sample bound"
            );
        }

        let (sequence, dropped) = WaveformSequence::normalize(raw);
        if dropped > 0 {
            tracing::debug!(recording = %recording.id, dropped, "Dropped out-of-order samples");
        }
        if sequence.is_empty() {
            return Err(AcquisitionError::NoData(recording.id));
        }

        tracing::info!(
            recording = %recording.id,
            samples = sequence.len(),
            "Acquired recording from health store"
        );
        Ok(sequence)
    }

    fn name(&self) -> &'static str {
        "live"
    }
}

/// In-memory [`HealthStore`], answering queries synchronously.
#[derive(Default)]
pub struct MemoryHealthStore {
    denied: bool,
    entries: RwLock<HashMap<Uuid, (Recording, Vec<Sample>)>>,
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses read access.
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, recording: Recording, samples: Vec<Sample>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(recording.id, (recording, samples));
        }
    }
}

impl HealthStore for MemoryHealthStore {
    fn is_authorized(&self) -> bool {
        !self.denied
    }

    fn list_recordings(&self) -> Result<Vec<Recording>, AcquisitionError> {
        if self.denied {
            return Err(AcquisitionError::AccessDenied);
        }
        let entries = self
            .entries
            .read()
            .map_err(|_| AcquisitionError::Store("store lock poisoned".to_string()))?;
        let mut recordings: Vec<Recording> = entries.values().map(|(r, _)| r.clone()).collect();
        recordings.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        Ok(recordings)
    }

    fn query_voltages(&self, id: Uuid, sink: Sender<VoltageEvent>) {
        let event = match self.entries.read() {
            Ok(entries) => match entries.get(&id) {
                Some((_, samples)) => VoltageEvent::Samples(samples.clone()),
                None => VoltageEvent::Samples(Vec::new()),
            },
            Err(_) => VoltageEvent::Failed("store lock poisoned".to_string()),
        };
        let _ = sink.send(event);
        let _ = sink.send(VoltageEvent::Finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::thread;

    fn recording() -> Recording {
        Recording::new(Utc::now(), 2.0)
    }

    /// Store that answers from a background thread, like a platform callback.
    struct ThreadedStore {
        events: Vec<VoltageEvent>,
        delay: Duration,
    }

    impl HealthStore for ThreadedStore {
        fn is_authorized(&self) -> bool {
            true
        }

        fn list_recordings(&self) -> Result<Vec<Recording>, AcquisitionError> {
            Ok(Vec::new())
        }

        fn query_voltages(&self, _id: Uuid, sink: Sender<VoltageEvent>) {
            let events = self.events.clone();
            let delay = self.delay;
            thread::spawn(move || {
                thread::sleep(delay);
                for event in events {
                    let _ = sink.send(event);
                }
            });
        }
    }

    #[test]
    fn test_acquire_from_memory_store() {
        let store = MemoryHealthStore::new();
        let rec = recording();
        store.insert(
            rec.clone(),
            vec![Sample::new(0.0, 1.0), Sample::new(0.5, 2.0), Sample::new(1.0, 3.0)],
        );
        let source = LiveSource::new(Arc::new(store));
        let seq = source.acquire(&rec).unwrap();
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn test_denied_store() {
        let source = LiveSource::new(Arc::new(MemoryHealthStore::denied()));
        let err = source.acquire(&recording()).unwrap_err();
        assert!(matches!(err, AcquisitionError::AccessDenied));
    }

    #[test]
    fn test_empty_recording_is_no_data() {
        let source = LiveSource::new(Arc::new(MemoryHealthStore::new()));
        let rec = recording();
        let err = source.acquire(&rec).unwrap_err();
        assert!(matches!(err, AcquisitionError::NoData(id) if id == rec.id));
    }

    #[test]
    fn test_async_batches_are_collected() {
        let store = ThreadedStore {
            events: vec![
                VoltageEvent::Samples(vec![Sample::new(0.0, 1.0), Sample::new(0.1, 2.0)]),
                VoltageEvent::Samples(vec![Sample::new(0.2, 3.0)]),
                VoltageEvent::Finished,
            ],
            delay: Duration::from_millis(10),
        };
        let seq = LiveSource::new(Arc::new(store)).acquire(&recording()).unwrap();
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn test_async_failure_is_reported() {
        let store = ThreadedStore {
            events: vec![
                VoltageEvent::Samples(vec![Sample::new(0.0, 1.0)]),
                VoltageEvent::Failed("device disconnected".to_string()),
            ],
            delay: Duration::ZERO,
        };
        let err = LiveSource::new(Arc::new(store))
            .acquire(&recording())
            .unwrap_err();
        assert!(err.to_string().contains("device disconnected"));
    }

    #[test]
    fn test_slow_store_times_out() {
        let store = ThreadedStore {
            events: vec![VoltageEvent::Finished],
            delay: Duration::from_millis(500),
        };
        let err = LiveSource::new(Arc::new(store))
            .with_timeout(Duration::from_millis(20))
            .acquire(&recording())
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Timeout(_)));
    }

    #[test]
    fn test_sample_bound_truncates() {
        let store = MemoryHealthStore::new();
        let rec = recording();
        let samples = (0..100).map(|i| Sample::new(i as f64, 0.0)).collect();
        store.insert(rec.clone(), samples);
        let seq = LiveSource::new(Arc::new(store))
            .with_max_samples(10)
            .acquire(&rec)
            .unwrap();
        assert_eq!(seq.len(), 10);
    }
}
