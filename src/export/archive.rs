//! Archive bundles of grouped recordings.
//!
//! Each member is rendered into its own delimited file inside a scratch
//! directory named after the group; the directory is then deflated into a
//! single zip. The scratch directory lives in a [`tempfile::TempDir`], so
//! any failure on the way discards it and no archive is produced.

use crate::export::delimited::{to_delimited_text, ExportFormat};
use crate::export::ExportError;
use crate::source::SignalSource;
use crate::store::Recording;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// File name used for one member inside the bundle.
pub fn member_file_name(recording: &Recording) -> String {
    format!(
        "ECG_{}_{}.csv",
        recording.start_date.format("%Y-%m-%d_%H-%M-%S"),
        recording.id.simple()
    )
}

/// Directory name used for a group inside the bundle.
pub fn group_dir_name(group: &str) -> String {
    let cleaned: String = group
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "group".to_string()
    } else {
        cleaned
    }
}

/// Build a zip bundle holding one delimited file per member.
pub fn to_archive(
    group: &str,
    members: &[Recording],
    source: &dyn SignalSource,
    format: &ExportFormat,
) -> Result<Vec<u8>, ExportError> {
    if members.is_empty() {
        return Err(ExportError::NoMembers(group.to_string()));
    }

    let scratch = tempfile::tempdir()?;
    let dir_name = group_dir_name(group);
    let group_dir = scratch.path().join(&dir_name);
    fs::create_dir_all(&group_dir)?;

    for member in members {
        let waveform = source.acquire(member)?;
        let text = to_delimited_text(&waveform, format);
        fs::write(group_dir.join(member_file_name(member)), text)?;
    }

    let bytes = zip_directory(&group_dir, &dir_name)?;
    tracing::info!(
        group,
        members = members.len(),
        bytes = bytes.len(),
        "Built archive bundle"
    );
    Ok(bytes)
}

/// Deflate the files of `dir` into a zip under the `prefix/` folder.
fn zip_directory(dir: &Path, prefix: &str) -> Result<Vec<u8>, ExportError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_directory(format!("{prefix}/"), options)?;

    for path in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writer.start_file(format!("{prefix}/{name}"), options)?;
        writer.write_all(&fs::read(&path)?)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Write archive bytes to `path` through a temp file in the same directory,
/// so readers never see a half-written archive.
pub fn write_archive(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| ExportError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AcquisitionError, SyntheticSource, WaveformSequence};
    use chrono::{TimeZone, Utc};
    use std::io::Read;
    use uuid::Uuid;

    fn member(seconds: i64) -> Recording {
        let start = Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap();
        Recording::new(start, 1.0)
    }

    struct FailingSource {
        bad: Uuid,
    }

    impl SignalSource for FailingSource {
        fn acquire(&self, recording: &Recording) -> Result<WaveformSequence, AcquisitionError> {
            if recording.id == self.bad {
                Err(AcquisitionError::NoData(recording.id))
            } else {
                Ok(SyntheticSource::default().with_duration(1.0).generate())
            }
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_group_dir_name_is_path_safe() {
        assert_eq!(group_dir_name("Rest/Exercise"), "Rest_Exercise");
        assert_eq!(group_dir_name("  "), "group");
        assert_eq!(group_dir_name(".."), "group");
        assert_eq!(group_dir_name("Morning"), "Morning");
    }

    #[test]
    fn test_empty_members_rejected() {
        let err = to_archive("A", &[], &SyntheticSource::default(), &ExportFormat::backend())
            .unwrap_err();
        assert!(matches!(err, ExportError::NoMembers(ref g) if g == "A"));
    }

    #[test]
    fn test_archive_holds_one_file_per_member() {
        let members = vec![member(0), member(60)];
        let source = SyntheticSource::default().with_duration(1.0);
        let bytes = to_archive("Morning", &members, &source, &ExportFormat::backend()).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], "Morning/");
        for m in &members {
            assert!(names.contains(&format!("Morning/{}", member_file_name(m))));
        }

        let mut file = archive
            .by_name(&format!("Morning/{}", member_file_name(&members[0])))
            .unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert!(text.starts_with("Time (s);Voltage (mV)\n"));
        assert_eq!(text.lines().count(), 512 + 1);
    }

    #[test]
    fn test_member_failure_produces_no_archive() {
        let members = vec![member(0), member(60)];
        let source = FailingSource { bad: members[1].id };
        let err = to_archive("A", &members, &source, &ExportFormat::backend()).unwrap_err();
        assert!(matches!(err, ExportError::Acquisition(_)));
    }

    #[test]
    fn test_write_archive_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("bundle.zip");
        write_archive(&path, b"first").unwrap();
        write_archive(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
