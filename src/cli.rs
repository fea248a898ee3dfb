//! Command-line interface components.

use crate::config::{CompressionAlgorithm, MeasureConfig};
use crate::constants::{APP_DIR_NAME, IDENTITY_DB_FILE};
use crate::identity::{IdentityStore, MemoryIdentityStore, SqliteIdentityStore};
use crate::models::ProcessingStats;
use crate::processor::BatchProcessor;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "stdf_measure")]
#[command(about = "Expand STDF V4 test data into position-resolved measurement rows in Parquet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// STDF file, or directory searched recursively for STDF files
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output directory for Parquet files (default: INPUT/parquet)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// SQLite database holding device and parameter IDs
    #[arg(long, value_name = "PATH")]
    pub identity_db: Option<PathBuf>,

    /// Keep identities in memory only; IDs are not stable across runs
    #[arg(long, conflicts_with = "identity_db")]
    pub ephemeral_identities: bool,

    /// Files processed concurrently (default: number of CPUs)
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// File name glob; repeat for several (default: *.stdf, *.std)
    #[arg(short, long = "pattern", value_name = "GLOB")]
    pub patterns: Vec<String>,

    /// Parquet compression algorithm
    #[arg(long, value_enum, default_value_t = CompressionAlgorithm::Snappy)]
    pub compression: CompressionAlgorithm,

    /// Ignore FTR records
    #[arg(long)]
    pub no_functional_tests: bool,

    /// Reprocess files whose output already exists
    #[arg(short, long)]
    pub force: bool,

    /// Commit identities and report counts without writing measurements
    #[arg(long)]
    pub discovery_only: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn get_log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// Build the run configuration from the flags
    pub fn to_config(&self) -> MeasureConfig {
        let mut config = MeasureConfig::default()
            .with_functional_tests(!self.no_functional_tests)
            .with_compression(self.compression);
        if let Some(workers) = self.workers {
            config = config.with_max_concurrent_files(workers);
        }
        if !self.patterns.is_empty() {
            config = config.with_file_patterns(self.patterns.clone());
        }
        if self.force {
            config = config.with_force_reprocess();
        }
        if self.discovery_only {
            config = config.with_discovery_only();
        }
        config
    }

    /// The identity database path, defaulting to the user data directory
    pub fn identity_db_path(&self) -> Result<PathBuf> {
        match &self.identity_db {
            Some(path) => Ok(path.clone()),
            None => default_identity_db(),
        }
    }
}

/// `<data dir>/stdf-measure/identity.sqlite`
pub fn default_identity_db() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine user data directory")?;
    Ok(data_dir.join(APP_DIR_NAME).join(IDENTITY_DB_FILE))
}

/// Set up structured logging
pub fn setup_logging(args: &Args) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stdf_measure={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stderr),
        )
        .init();

    debug!("Logging initialized at level: {}", log_level);
}

/// Run one extraction as described by `args`
pub async fn run(args: Args, cancel: CancellationToken) -> Result<ProcessingStats> {
    let identity_store: Arc<dyn IdentityStore> = if args.ephemeral_identities {
        Arc::new(MemoryIdentityStore::new())
    } else {
        let db_path = args.identity_db_path()?;
        info!("Using identity database {}", db_path.display());
        Arc::new(
            SqliteIdentityStore::open(&db_path)
                .with_context(|| format!("Failed to open identity database {}", db_path.display()))?,
        )
    };

    let mut processor = BatchProcessor::new(args.input.clone(), args.output.clone())
        .with_context(|| format!("Failed to set up processing for {}", args.input.display()))?
        .with_config(args.to_config())?
        .with_identity_store(identity_store)
        .with_cancellation(cancel);

    let stats = processor
        .process()
        .await
        .with_context(|| format!("Failed to process {}", args.input.display()))?;
    Ok(stats)
}
