//! ECG Workbench CLI
//!
//! Acquire, analyse, group and export ECG recordings.

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ecg_workbench::{
    config::{Config, MetricsMode},
    export::{group_dir_name, member_file_name, to_delimited_text, write_archive, ExportFormat},
    source::{DirectoryStore, LiveSource, SignalSource},
    store::{Catalog, Recording},
    MetricsEngine, Orchestrator, ProcessingState, VERSION,
};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ecg-workbench")]
#[command(version = VERSION)]
#[command(about = "Beat detection, HRV analysis and export of ECG recordings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write synthetic recordings into the recording store
    Synthesize {
        /// Number of recordings to write
        #[arg(long, default_value = "1")]
        count: usize,

        /// Beat frequency in Hz
        #[arg(long)]
        beat_frequency: Option<f64>,
    },

    /// List recordings and their groups
    List,

    /// Run the processing pipeline on one recording
    Analyze {
        /// Recording to analyse
        #[arg(long, conflicts_with = "synthetic")]
        id: Option<Uuid>,

        /// Analyse a freshly generated synthetic waveform
        #[arg(long)]
        synthetic: bool,

        /// Ask the metrics service instead of computing locally
        #[arg(long)]
        remote: bool,

        /// Keep every Nth sample before peak detection
        #[arg(long)]
        factor: Option<NonZeroUsize>,

        /// Peak detection threshold in microvolts
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Manage recording groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Export recordings
    Export {
        #[command(subcommand)]
        target: ExportTarget,
    },

    /// Run the HRV analysis service (requires server feature)
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,
    },

    /// Show configuration
    Config,
}

#[derive(Subcommand)]
enum GroupAction {
    /// Put a recording in a group
    Assign { id: Uuid, group: String },
    /// Take a recording out of its group
    Remove { id: Uuid },
    /// Rename a group
    Rename { from: String, to: String },
    /// List groups and their members
    List,
}

#[derive(Subcommand)]
enum ExportTarget {
    /// Export one recording as delimited text
    Csv {
        id: Uuid,

        /// Output file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Use the raw layout (comma-space, microvolts)
        #[arg(long)]
        raw: bool,
    },

    /// Export every member of a group as a zip bundle
    Archive {
        group: String,

        /// Output file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    });
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    match cli.command {
        Commands::Synthesize {
            count,
            beat_frequency,
        } => cmd_synthesize(&config, count, beat_frequency),
        Commands::List => cmd_list(&config),
        Commands::Analyze {
            id,
            synthetic,
            remote,
            factor,
            threshold,
        } => cmd_analyze(config, id, synthetic, remote, factor, threshold),
        Commands::Group { action } => cmd_group(&config, action),
        Commands::Export { target } => cmd_export(&config, target),
        Commands::Serve { port } => cmd_serve(port),
        Commands::Config => {
            cmd_config(&config);
            Ok(())
        }
    }
}

/// Recording store and a catalog listed from it, with groups restored.
fn open_catalog(config: &Config) -> anyhow::Result<(Arc<DirectoryStore>, Catalog)> {
    let store = Arc::new(DirectoryStore::new(config.recordings_path()));
    let mut catalog = Catalog::with_persistence(config.groups_path());
    catalog
        .fetch_catalog(store.as_ref())
        .context("could not list recordings")?;
    Ok((store, catalog))
}

fn live_source(config: &Config, store: Arc<DirectoryStore>) -> Arc<dyn SignalSource> {
    Arc::new(LiveSource::new(store).with_timeout(config.acquisition_timeout))
}

fn find(catalog: &Catalog, id: Uuid) -> anyhow::Result<Recording> {
    catalog
        .recording(id)
        .cloned()
        .ok_or_else(|| anyhow!("no recording with id {id}"))
}

fn cmd_synthesize(
    config: &Config,
    count: usize,
    beat_frequency: Option<f64>,
) -> anyhow::Result<()> {
    let store = DirectoryStore::new(config.recordings_path());
    let mut source = config.synthetic;
    if let Some(f) = beat_frequency {
        source = source.with_beat_frequency(f);
    }

    for _ in 0..count {
        let recording = store
            .write_recording(&source.generate())
            .context("could not write recording")?;
        println!("{}  {:.1}s", recording.id, recording.duration);
    }
    Ok(())
}

fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let (_, catalog) = open_catalog(config)?;

    if catalog.recordings().is_empty() {
        println!("No recordings in {:?}", config.recordings_path());
        println!("Run `ecg-workbench synthesize` to create some.");
        return Ok(());
    }

    for recording in catalog.recordings() {
        println!(
            "{}  {}  {:>6.1}s  {}",
            recording.id,
            recording.start_date.format("%Y-%m-%d %H:%M:%S"),
            recording.duration,
            recording.group_name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn cmd_analyze(
    mut config: Config,
    id: Option<Uuid>,
    synthetic: bool,
    remote: bool,
    factor: Option<NonZeroUsize>,
    threshold: Option<f64>,
) -> anyhow::Result<()> {
    if let Some(factor) = factor {
        config.processing.downsample_factor = factor;
    }
    if let Some(threshold) = threshold {
        config.processing.peak_threshold = threshold;
    }
    if remote {
        config.metrics_mode = MetricsMode::Remote;
    }

    let (source, recording): (Arc<dyn SignalSource>, Recording) = if synthetic {
        let source: Arc<dyn SignalSource> = Arc::new(config.synthetic);
        (source, Recording::new(Utc::now(), config.synthetic.duration))
    } else {
        let id = id.ok_or_else(|| anyhow!("pass --id or --synthetic"))?;
        let (store, catalog) = open_catalog(&config)?;
        (live_source(&config, store), find(&catalog, id)?)
    };

    let engine = metrics_engine(&config)?;
    let mut orchestrator = Orchestrator::new(source, engine, config.processing);
    orchestrator.process(recording);

    let wait = config.acquisition_timeout + config.backend.timeout;
    match orchestrator.wait(wait) {
        ProcessingState::Ready(snapshot) => {
            println!("Recording: {}", snapshot.recording.id);
            println!("Samples:   {}", snapshot.waveform.len());
            println!("Beats:     {}", snapshot.peaks.len());
            let duration = snapshot.waveform.duration();
            if duration > 0.0 {
                println!(
                    "Rate:      {:.1} bpm",
                    snapshot.peaks.len() as f64 * 60.0 / duration
                );
            }
            println!();
            if snapshot.metrics.is_empty() {
                println!("Not enough beats for HRV metrics");
            } else {
                println!("HRV metrics:");
                for (name, value) in snapshot.metrics.iter() {
                    println!("  {name:<8} {value:.4}");
                }
            }
            Ok(())
        }
        ProcessingState::Failed(e) => bail!("analysis failed: {e}"),
        state => bail!("analysis did not finish in {wait:?} (still {})", state.name()),
    }
}

#[cfg(feature = "backend")]
fn metrics_engine(config: &Config) -> anyhow::Result<MetricsEngine> {
    use ecg_workbench::BlockingMetricsClient;

    Ok(match config.metrics_mode {
        MetricsMode::Local => MetricsEngine::Local,
        MetricsMode::Remote => {
            let client = BlockingMetricsClient::new(config.backend.clone())?;
            MetricsEngine::Remote(Arc::new(client))
        }
    })
}

#[cfg(not(feature = "backend"))]
fn metrics_engine(config: &Config) -> anyhow::Result<MetricsEngine> {
    match config.metrics_mode {
        MetricsMode::Local => Ok(MetricsEngine::Local),
        MetricsMode::Remote => {
            bail!("remote metrics need the backend feature enabled at compile time")
        }
    }
}

fn cmd_group(config: &Config, action: GroupAction) -> anyhow::Result<()> {
    let (_, mut catalog) = open_catalog(config)?;

    match action {
        GroupAction::Assign { id, group } => {
            let recording = find(&catalog, id)?;
            catalog.assign_to_group(&recording, &group);
        }
        GroupAction::Remove { id } => {
            let recording = find(&catalog, id)?;
            catalog.remove_from_group(&recording);
        }
        GroupAction::Rename { from, to } => {
            if catalog.group(&from).is_none() {
                bail!("no group named '{from}'");
            }
            catalog.rename_group(&from, &to);
        }
        GroupAction::List => {
            if catalog.groups().is_empty() {
                println!("No groups");
            }
            for (name, members) in catalog.groups() {
                println!("{name} ({} recordings)", members.len());
                for member in members {
                    println!("  {}  {:.1}s", member.id, member.duration);
                }
            }
            return Ok(());
        }
    }

    catalog.persist().context("could not save groups")?;
    Ok(())
}

fn cmd_export(config: &Config, target: ExportTarget) -> anyhow::Result<()> {
    let (store, catalog) = open_catalog(config)?;
    let source = live_source(config, store);

    match target {
        ExportTarget::Csv { id, output, raw } => {
            let recording = find(&catalog, id)?;
            let format = if raw {
                ExportFormat::raw()
            } else {
                ExportFormat::backend()
            };
            let waveform = source.acquire(&recording)?;
            let path =
                output.unwrap_or_else(|| config.export_path.join(member_file_name(&recording)));
            std::fs::write(&path, to_delimited_text(&waveform, &format))
                .with_context(|| format!("could not write {path:?}"))?;
            println!("Exported to {path:?}");
        }
        ExportTarget::Archive { group, output } => {
            let orchestrator = Orchestrator::new(source, MetricsEngine::Local, config.processing)
                .with_catalog(catalog);
            let bytes = orchestrator.export_group(&group, &ExportFormat::backend())?;
            let path = output.unwrap_or_else(|| {
                config
                    .export_path
                    .join(format!("{}.zip", group_dir_name(&group)))
            });
            write_archive(&path, &bytes)?;
            println!("Exported group '{group}' to {path:?}");
        }
    }
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16) -> anyhow::Result<()> {
    use ecg_workbench::server::{run, ServerConfig};

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (addr, shutdown_tx) = run(ServerConfig::new(port)).await?;
        println!("HRV analysis service on http://{addr}");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(());
        // Let in-flight requests drain.
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<_, anyhow::Error>(())
    })
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_port: u16) -> anyhow::Result<()> {
    bail!("serve needs the server feature enabled at compile time")
}

fn cmd_config(config: &Config) {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
}
