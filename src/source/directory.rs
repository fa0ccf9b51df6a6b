//! A health store backed by a directory of delimited-text recordings.
//!
//! Each recording is a `<uuid>.csv` file in the lossless export layout. This
//! is the desktop stand-in for a platform health store: the CLI populates it
//! with synthetic recordings and reads it through [`LiveSource`].
//!
//! [`LiveSource`]: crate::source::LiveSource

use crate::export::{parse_delimited_text, to_delimited_text, ExportFormat};
use crate::source::live::{HealthStore, VoltageEvent};
use crate::source::types::WaveformSequence;
use crate::source::AcquisitionError;
use crate::store::Recording;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use uuid::Uuid;

const BATCH_SIZE: usize = 1024;

/// Directory of `<uuid>.csv` recordings.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.csv"))
    }

    /// Store a waveform under a fresh id and return its recording.
    pub fn write_recording(&self, waveform: &WaveformSequence) -> std::io::Result<Recording> {
        fs::create_dir_all(&self.root)?;
        let recording = Recording::new(Utc::now(), waveform.duration());
        fs::write(
            self.path_for(recording.id),
            to_delimited_text(waveform, &ExportFormat::raw()),
        )?;
        Ok(recording)
    }

    fn read_waveform(path: &Path) -> Result<WaveformSequence, AcquisitionError> {
        let text = fs::read_to_string(path)
            .map_err(|e| AcquisitionError::Store(format!("{}: {e}", path.display())))?;
        parse_delimited_text(&text)
            .map_err(|e| AcquisitionError::Store(format!("{}: {e}", path.display())))
    }

    fn describe(path: &Path) -> Option<Recording> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())?;
        let start_date: DateTime<Utc> = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        let duration = match Self::read_waveform(path) {
            Ok(waveform) => waveform.duration(),
            Err(e) => {
                tracing::warn!("Skipping unreadable recording: {e}");
                return None;
            }
        };
        Some(Recording {
            id,
            start_date,
            duration,
            group_name: None,
        })
    }
}

impl HealthStore for DirectoryStore {
    fn is_authorized(&self) -> bool {
        true
    }

    fn list_recordings(&self) -> Result<Vec<Recording>, AcquisitionError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.root)
            .map_err(|e| AcquisitionError::Store(format!("{}: {e}", self.root.display())))?;

        let mut recordings: Vec<Recording> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
            .filter_map(|p| Self::describe(&p))
            .collect();
        recordings.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        Ok(recordings)
    }

    fn query_voltages(&self, id: Uuid, sink: Sender<VoltageEvent>) {
        let path = self.path_for(id);
        thread::spawn(move || {
            if !path.exists() {
                let _ = sink.send(VoltageEvent::Finished);
                return;
            }
            match Self::read_waveform(&path) {
                Ok(waveform) => {
                    for chunk in waveform.samples().chunks(BATCH_SIZE) {
                        if sink.send(VoltageEvent::Samples(chunk.to_vec())).is_err() {
                            return;
                        }
                    }
                    let _ = sink.send(VoltageEvent::Finished);
                }
                Err(e) => {
                    let _ = sink.send(VoltageEvent::Failed(e.to_string()));
                }
            }
        });
    }
}
