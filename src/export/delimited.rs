//! Delimited-text rendering of waveforms.
//!
//! Two layouts are in use. The metrics backend reads a semicolon-separated
//! file with millivolts rounded to three decimals; spreadsheets and the
//! directory store get a `", "`-separated file carrying raw microvolts.
//! [`parse_delimited_text`] reads either back.

use crate::export::ExportError;
use crate::source::types::{Sample, WaveformSequence};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Column separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    /// `;`
    Semicolon,
    /// `, `
    CommaSpace,
}

impl Separator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Separator::Semicolon => ";",
            Separator::CommaSpace => ", ",
        }
    }

    fn delimiter_byte(&self) -> u8 {
        match self {
            Separator::Semicolon => b';',
            Separator::CommaSpace => b',',
        }
    }
}

/// Unit of the voltage column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageUnit {
    /// Converted from microvolts, three decimals
    Millivolts,
    /// Raw microvolts, full float precision
    Microvolts,
}

impl VoltageUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            VoltageUnit::Millivolts => "mV",
            VoltageUnit::Microvolts => "µV",
        }
    }

    /// Largest difference between an amplitude and its parsed-back value.
    pub fn precision(&self) -> f64 {
        match self {
            VoltageUnit::Millivolts => 0.5,
            VoltageUnit::Microvolts => 0.0,
        }
    }
}

/// Layout of a delimited export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFormat {
    pub separator: Separator,
    pub voltage_unit: VoltageUnit,
    pub time_label: String,
    pub voltage_label: String,
}

impl ExportFormat {
    /// Layout expected by the metrics backend: `Time (s);Voltage (mV)`.
    pub fn backend() -> Self {
        Self {
            separator: Separator::Semicolon,
            voltage_unit: VoltageUnit::Millivolts,
            time_label: "Time".to_string(),
            voltage_label: "Voltage".to_string(),
        }
    }

    /// Full-precision voltage layout: `Time (s), Voltage (µV)`.
    ///
    /// Times are still written to the microsecond, so samples closer than
    /// 1 µs collapse onto the same time and the text no longer parses back.
    pub fn raw() -> Self {
        Self {
            separator: Separator::CommaSpace,
            voltage_unit: VoltageUnit::Microvolts,
            time_label: "Time".to_string(),
            voltage_label: "Voltage".to_string(),
        }
    }

    pub fn header(&self) -> String {
        format!(
            "{} (s){}{} ({})",
            self.time_label,
            self.separator.as_str(),
            self.voltage_label,
            self.voltage_unit.symbol()
        )
    }
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self::backend()
    }
}

/// Render a waveform as delimited text, header first.
pub fn to_delimited_text(seq: &WaveformSequence, format: &ExportFormat) -> String {
    let mut out = String::with_capacity(24 * (seq.len() + 1));
    out.push_str(&format.header());
    out.push('\n');

    let sep = format.separator.as_str();
    for sample in seq {
        // Writing into a String cannot fail.
        let _ = match format.voltage_unit {
            VoltageUnit::Millivolts => writeln!(
                out,
                "{:.6}{}{:.3}",
                sample.time,
                sep,
                sample.amplitude / 1000.0
            ),
            VoltageUnit::Microvolts => {
                writeln!(out, "{:.6}{}{}", sample.time, sep, sample.amplitude)
            }
        };
    }
    out
}

/// Parse text produced by [`to_delimited_text`] back into a waveform.
///
/// The separator and voltage unit are taken from the header line. Amplitudes
/// come back in microvolts.
pub fn parse_delimited_text(text: &str) -> Result<WaveformSequence, ExportError> {
    let header = text
        .lines()
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| ExportError::Parse {
            line: 1,
            message: "missing header".to_string(),
        })?;

    let separator = if header.contains(';') {
        Separator::Semicolon
    } else {
        Separator::CommaSpace
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator.delimiter_byte())
        .trim(csv::Trim::All)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.len() != 2 {
        return Err(ExportError::Parse {
            line: 1,
            message: format!("expected 2 columns, found {}", headers.len()),
        });
    }
    let voltage_header = &headers[1];
    let scale = if voltage_header.contains("(mV)") {
        1000.0
    } else if voltage_header.contains("(µV)") || voltage_header.contains("(uV)") {
        1.0
    } else {
        return Err(ExportError::Parse {
            line: 1,
            message: format!("unknown voltage unit in '{voltage_header}'"),
        });
    };

    let mut samples = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = idx + 2;
        let field = |i: usize| -> Result<f64, ExportError> {
            let raw = record.get(i).unwrap_or("");
            raw.parse::<f64>().map_err(|e| ExportError::Parse {
                line,
                message: format!("'{raw}' is not a number: {e}"),
            })
        };
        samples.push(Sample::new(field(0)?, field(1)? * scale));
    }

    WaveformSequence::new(samples).map_err(|e| ExportError::Parse {
        line: 0,
        message: e.to_string(),
    })
}
