//! adssp-ingest - AlphaFold DSSP exclusion masks
//!
//! Reads AlphaFold DB tar archives, assigns secondary structure with DSSP,
//! gates residues by confidence and writes one exclusion mask per accession.

use std::path::PathBuf;

use adssp_ingest::workflow::write_report;
use adssp_ingest::{BatchPipeline, ConfigOverrides, IngestConfig, PipelineError};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for adssp-ingest
#[derive(Parser, Debug)]
#[command(name = "adssp-ingest")]
#[command(about = "Build DSSP exclusion masks from AlphaFold structure archives")]
#[command(version)]
struct Args {
    /// Archives (.tar, .tar.gz, .tgz) or directories containing them
    #[arg(required_unless_present = "write_config")]
    inputs: Vec<PathBuf>,

    /// Output JSON file
    #[arg(short, long, default_value = "exclusion_masks.json")]
    output: PathBuf,

    /// Config file (default: ADSSP_CONFIG, then ~/.config/adssp/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// DSSP executable
    #[arg(long)]
    dssp: Option<PathBuf>,

    /// DSSP uses the 2.x/3.x `-i/-o` command line
    #[arg(long)]
    legacy_dssp: bool,

    /// Minimum pLDDT for a confident residue
    #[arg(long)]
    plddt_threshold: Option<f64>,

    /// Maximum PAE (angstroms) for a confident residue
    #[arg(long)]
    pae_threshold: Option<f64>,

    /// Base URL of the PAE file server
    #[arg(long)]
    pae_base_url: Option<String>,

    /// Forbidden DSSP codes, e.g. "HBEGIT"
    #[arg(long)]
    forbidden_codes: Option<String>,

    /// Residue offset between consecutive fragments
    #[arg(long)]
    stride: Option<usize>,

    /// Fraction of the stride trimmed from shared fragment edges
    #[arg(long)]
    trim_factor: Option<f64>,

    /// Concurrent per-model workers
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Attempts for DSSP runs and PAE requests
    #[arg(long)]
    retry_attempts: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Result cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Neither read nor write the result cache
    #[arg(long)]
    no_cache: bool,

    /// Write per-model results without fragment fusion
    #[arg(long)]
    no_fuse: bool,

    /// Use the PAE service even when archives carry pLDDT scores
    #[arg(long)]
    remote_confidence: bool,

    /// Truncate to the shorter length on code/confidence count mismatch
    #[arg(long)]
    truncate_mismatched: bool,

    /// Save the resolved settings to this TOML file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            dssp_executable: self.dssp.clone(),
            legacy_dssp: self.legacy_dssp,
            forbidden_codes: self.forbidden_codes.clone(),
            plddt_threshold: self.plddt_threshold,
            pae_threshold: self.pae_threshold,
            pae_base_url: self.pae_base_url.clone(),
            stride: self.stride,
            trim_factor: self.trim_factor,
            workers: self.workers,
            max_attempts: self.retry_attempts,
            retry_delay_ms: self.retry_delay_ms,
            cache_dir: self.cache_dir.clone(),
            no_cache: self.no_cache,
            no_fuse: self.no_fuse,
            remote_confidence: self.remote_confidence,
            truncate_mismatched: self.truncate_mismatched,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = adssp_common::config::load_or_default(args.config.as_deref())
        .context("Failed to load config file")?;

    init_tracing(&toml_config.logging)?;

    info!(
        "Starting adssp-ingest v{} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    let config = IngestConfig::resolve(&args.overrides(), &toml_config).context("Invalid configuration")?;
    info!(
        dssp = %config.dssp_executable.display(),
        forbidden = %config.forbidden,
        plddt_threshold = config.thresholds.plddt,
        pae_threshold = config.thresholds.pae,
        stride = config.fusion.stride(),
        trim_factor = config.fusion.trim_factor(),
        workers = config.workers,
        fuse = config.fuse,
        cache = ?config.cache_dir,
        "Configuration resolved"
    );

    if let Some(target) = &args.write_config {
        let saved = config.to_toml(toml_config.logging.clone());
        adssp_common::config::write_toml_config(&saved, target)
            .with_context(|| format!("Failed to write config file {}", target.display()))?;
        info!("Settings saved to {}", target.display());
        return Ok(());
    }

    let pipeline = BatchPipeline::from_config(&config, &args.inputs).context("Failed to set up pipeline")?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let report = match pipeline.run(cancel).await {
        Ok(report) => report,
        Err(PipelineError::Cancelled) => {
            warn!("Batch cancelled, no results written");
            anyhow::bail!("cancelled");
        }
        Err(e) => return Err(e).context("Batch failed"),
    };

    write_report(&report, &args.output).context("Failed to write results")?;

    if !report.summary.failures.is_empty() {
        warn!(
            failures = report.summary.failures.len(),
            "Some items failed, see the run summary"
        );
    }

    Ok(())
}

/// Registry with EnvFilter (RUST_LOG, else config level) and a fmt layer
fn init_tracing(logging: &adssp_common::config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
        .context("Invalid logging level")?;

    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = logging
        .file
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Cancel the batch on Ctrl+C
async fn cancel_on_signal(cancel: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, cancelling batch");
            cancel.cancel();
        }
        Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
    }
}
