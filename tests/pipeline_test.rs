//! End-to-end tests: recording store, catalog, processing and export

use ecg_workbench::config::ProcessingConfig;
use ecg_workbench::core::metrics::MEAN_RR;
use ecg_workbench::export::{member_file_name, parse_delimited_text, write_archive, ExportFormat};
use ecg_workbench::source::{DirectoryStore, LiveSource, SyntheticSource};
use ecg_workbench::store::Catalog;
use ecg_workbench::{MetricsEngine, Orchestrator, ProcessingState};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn store_with(dir: &TempDir, beat_frequencies: &[f64]) -> Arc<DirectoryStore> {
    let store = Arc::new(DirectoryStore::new(dir.path().join("recordings")));
    for &f in beat_frequencies {
        let waveform = SyntheticSource::default()
            .with_duration(10.0)
            .with_beat_frequency(f)
            .generate();
        store.write_recording(&waveform).unwrap();
    }
    store
}

#[test]
fn test_stored_recording_is_analysed() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, &[1.5]);

    let mut catalog = Catalog::new();
    let recording = catalog.fetch_catalog(store.as_ref()).unwrap()[0].clone();

    let mut orchestrator = Orchestrator::new(
        Arc::new(LiveSource::new(store)),
        MetricsEngine::Local,
        ProcessingConfig::default(),
    )
    .with_catalog(catalog);
    orchestrator.process(recording.clone());

    match orchestrator.wait(Duration::from_secs(10)) {
        ProcessingState::Ready(snapshot) => {
            assert_eq!(snapshot.recording.id, recording.id);
            // 1.5 Hz over 10 s
            assert!((snapshot.peaks.len() as i64 - 15).abs() <= 1);
            let mean_rr = snapshot.metrics.get(MEAN_RR).unwrap();
            assert!((mean_rr - 1.0 / 1.5).abs() < 0.01);
        }
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn test_groups_survive_restart() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, &[1.0, 1.2, 1.4]);
    let groups_path = dir.path().join("groups.json");

    {
        let mut catalog = Catalog::with_persistence(groups_path.clone());
        let listed = catalog.fetch_catalog(store.as_ref()).unwrap().to_vec();
        catalog.assign_to_group(&listed[0], "Rest");
        catalog.assign_to_group(&listed[1], "Rest");
        catalog.assign_to_group(&listed[2], "Exercise");
        catalog.rename_group("Exercise", "Rest");
        catalog.persist().unwrap();
    }

    let mut catalog = Catalog::with_persistence(groups_path);
    catalog.fetch_catalog(store.as_ref()).unwrap();
    assert_eq!(catalog.groups().len(), 1);
    assert_eq!(catalog.group("Rest").unwrap().len(), 3);
    assert!(catalog
        .recordings()
        .iter()
        .all(|r| r.group_name.as_deref() == Some("Rest")));
}

#[test]
fn test_group_archive_contents() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, &[1.0, 1.3]);

    let mut catalog = Catalog::new();
    let listed = catalog.fetch_catalog(store.as_ref()).unwrap().to_vec();
    for recording in &listed {
        catalog.assign_to_group(recording, "Morning/Rest");
    }

    let orchestrator = Orchestrator::new(
        Arc::new(LiveSource::new(store)),
        MetricsEngine::Local,
        ProcessingConfig::default(),
    )
    .with_catalog(catalog);
    let bytes = orchestrator
        .export_group("Morning/Rest", &ExportFormat::backend())
        .unwrap();

    let path = dir.path().join("out").join("bundle.zip");
    write_archive(&path, &bytes).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names.len(), 3);
    assert_eq!(names[0], "Morning_Rest/");

    for recording in &listed {
        let name = format!("Morning_Rest/{}", member_file_name(recording));
        let mut text = String::new();
        archive
            .by_name(&name)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        let waveform = parse_delimited_text(&text).unwrap();
        assert_eq!(waveform.len(), 512 * 10);
    }
}
