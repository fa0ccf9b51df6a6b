//! Export of waveforms and recording groups.
//!
//! - Delimited text for one waveform (backend and lossless layouts)
//! - Zip bundles holding one delimited file per group member

pub mod archive;
pub mod delimited;

use crate::source::AcquisitionError;
use thiserror::Error;

pub use archive::{group_dir_name, member_file_name, to_archive, write_archive};
pub use delimited::{parse_delimited_text, to_delimited_text, ExportFormat, Separator, VoltageUnit};

/// Errors that can occur while exporting.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("group '{0}' has no recordings to export")]
    NoMembers(String),
    #[error("could not read recording: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("export I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("malformed delimited text: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed delimited text at line {line}: {message}")]
    Parse { line: usize, message: String },
}
