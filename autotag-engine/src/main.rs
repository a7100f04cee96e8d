//! autotag - fingerprint-driven audio identification and tagging
//!
//! Identifies each file through AcoustID/MusicBrainz, enriches it from
//! Discogs and Spotify, and writes tags plus renames only when confidence is
//! HIGH. MEDIUM tracks are reported for manual review; nothing is written for
//! them.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use autotag_common::config::{self as common_config, LoggingConfig, TomlConfig};
use autotag_engine::services::{
    DryRunTagWriter, FileTagWriter, FpcalcFingerprinter, InMemoryResultStore, TagWriter,
};
use autotag_engine::sources::{DiscogsClient, MusicBrainzClient, SpotifyClient};
use autotag_engine::types::ProcessingState;
use autotag_engine::{BatchReport, Credentials, EngineConfig, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "autotag", version, about = "Identify audio files by fingerprint and reconcile their metadata")]
struct Cli {
    /// Config file (default: $AUTOTAG_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tracks processed in parallel
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log the tags and renames that would be applied without touching files
    #[arg(long)]
    dry_run: bool,

    /// Path to Chromaprint's fpcalc
    #[arg(long, env = "AUTOTAG_FPCALC", default_value = "fpcalc")]
    fpcalc: PathBuf,

    /// Write a config file with every engine default and exit
    #[arg(long)]
    init_config: bool,

    /// Audio files to identify
    #[arg(required_unless_present = "init_config")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config_path, toml_config) = load_config(bootstrap_subscriber(), cli.config.as_deref());
    init_logging(&toml_config.logging)?;

    info!("Starting autotag {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!(path = %path.display(), "Config file");
    }

    if cli.init_config {
        let path = config_path.context("No config directory available; pass --config")?;
        return init_config(&path, toml_config);
    }

    let mut config = EngineConfig::resolve(&toml_config).context("Invalid engine configuration")?;
    if let Some(workers) = cli.workers {
        config.max_concurrent_workers = workers;
        config.validate().context("Invalid --workers")?;
    }
    let credentials = Credentials::resolve(&toml_config);

    let writer: Arc<dyn TagWriter> = if cli.dry_run {
        info!("Dry run: no files will be modified");
        Arc::new(DryRunTagWriter)
    } else {
        Arc::new(FileTagWriter::new().context("Failed to set up the tag writer")?)
    };

    let fingerprinter = Arc::new(FpcalcFingerprinter::new().with_binary(cli.fpcalc.clone()));
    let mut builder = Orchestrator::builder(config.clone(), fingerprinter)
        .store(Arc::new(InMemoryResultStore::new()))
        .writer(writer)
        .adapter(Arc::new(MusicBrainzClient::new(
            credentials.acoustid_api_key.clone(),
            config.acoustid_min_score,
        )?));

    match credentials.discogs_token.clone() {
        Some(token) => builder = builder.adapter(Arc::new(DiscogsClient::new(token)?)),
        None => warn!("No Discogs token configured; editorial enrichment disabled"),
    }
    match (
        credentials.spotify_client_id.clone(),
        credentials.spotify_client_secret.clone(),
    ) {
        (Some(id), Some(secret)) => builder = builder.adapter(Arc::new(SpotifyClient::new(id, secret)?)),
        _ => warn!("No Spotify credentials configured; popularity fallback disabled"),
    }

    let orchestrator = builder.build().context("Failed to build orchestrator")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling batch");
            interrupt.cancel();
        }
    });

    let report = orchestrator
        .run_paths(cli.files, &cancel)
        .await
        .context("Batch aborted")?;

    print_summary(&report);
    Ok(())
}

/// Stdout subscriber at the default level, active only while the config
/// file itself is being loaded
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LoggingConfig::default().level));
    tracing_subscriber::fmt().with_env_filter(filter).finish()
}

/// Resolve and load the config file with `bootstrap` as the subscriber
fn load_config<S>(bootstrap: S, cli_path: Option<&Path>) -> (Option<PathBuf>, TomlConfig)
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::with_default(bootstrap, || {
        let path = common_config::resolve_config_path(cli_path);
        let config = common_config::load_or_default(path.as_deref());
        (path, config)
    })
}

/// `RUST_LOG` wins; otherwise the `[logging] level` from the config file
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn init_config(path: &Path, mut toml_config: TomlConfig) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    let defaults = EngineConfig::resolve(&toml_config).unwrap_or_default();
    toml_config.engine = defaults.to_settings();
    common_config::write_toml_config(&toml_config, path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn print_summary(report: &BatchReport) {
    for record in &report.records {
        let confidence = record
            .data
            .as_ref()
            .map(|d| format!("{:.3}", d.confidence))
            .unwrap_or_else(|| "-".to_string());
        let identity = record
            .data
            .as_ref()
            .map(|d| {
                format!(
                    "{} - {}",
                    d.artist.as_deref().unwrap_or("?"),
                    d.title.as_deref().unwrap_or("?")
                )
            })
            .unwrap_or_default();

        let status = match record.state {
            ProcessingState::Decided => "REVIEW".to_string(),
            state => state.to_string(),
        };
        println!("{:<10} {:>6}  {}", status, confidence, record.path().display());
        if !identity.is_empty() {
            println!("{:<17}  → {}", "", identity);
        }
        if let Some(reason) = &record.reason {
            println!("{:<17}  ({})", "", reason);
        }
        if let Some(flags) = record.sanity.as_ref().map(|s| s.flags()).filter(|f| !f.is_empty()) {
            println!("{:<17}  [{}]", "", flags.join(", "));
        }
    }

    println!();
    println!(
        "committed {}, review {}, rejected {}, failed {}, cancelled {}",
        report.count(ProcessingState::Committed),
        report.awaiting_confirmation(),
        report.count(ProcessingState::Rejected),
        report.count(ProcessingState::Failed),
        report.count(ProcessingState::Cancelled),
    );
}
