//! Main processing engine with modular architecture.
//!
//! Orchestrates the two-phase STDF workflow: discover input files, scan
//! them for names, commit identities once, then expand every file in
//! parallel and hand each file's rows to the sink.

pub mod discovery;
pub mod scan;
pub mod streaming;
pub mod writer;

#[cfg(test)]
pub mod tests;

use self::{
    discovery::FileDiscovery,
    scan::ScannedFile,
    streaming::StreamingProcessor,
    writer::{MeasurementSink, ParquetSink},
};

use crate::config::MeasureConfig;
use crate::error::{Result, StdfError};
use crate::identity::{Discovery, IdentityStore, MemoryIdentityStore};
use crate::models::ProcessingStats;

use colored::*;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main processor for STDF measurement extraction
pub struct BatchProcessor {
    input_path: PathBuf,
    output_path: PathBuf,
    config: MeasureConfig,
    file_discovery: FileDiscovery,
    streaming_processor: StreamingProcessor,
    identity_store: Arc<dyn IdentityStore>,
    sink: Option<Arc<dyn MeasurementSink>>,
    cancel: CancellationToken,
    directory_count: usize,
}

impl fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("input_path", &self.input_path)
            .field("output_path", &self.output_path)
            .field("config", &self.config)
            .field("file_discovery", &self.file_discovery)
            .finish_non_exhaustive()
    }
}

impl BatchProcessor {
    /// Create a new processor.
    ///
    /// Without an explicit output, Parquet files go to `parquet/` inside
    /// the input directory, or next to the input file.
    pub fn new(input_path: PathBuf, output_path: Option<PathBuf>) -> Result<Self> {
        if !input_path.exists() {
            return Err(StdfError::InputNotFound { path: input_path });
        }

        let output_path = output_path.unwrap_or_else(|| {
            let base = if input_path.is_dir() {
                input_path.as_path()
            } else {
                input_path.parent().unwrap_or_else(|| Path::new("."))
            };
            base.join("parquet")
        });

        let config = MeasureConfig::default();

        Ok(Self {
            file_discovery: FileDiscovery::new(input_path.clone(), &config.file_patterns)?,
            streaming_processor: StreamingProcessor::new(config.clone()),
            input_path,
            output_path,
            config,
            identity_store: Arc::new(MemoryIdentityStore::new()),
            sink: None,
            cancel: CancellationToken::new(),
            directory_count: 0,
        })
    }

    /// Configure the processor
    pub fn with_config(mut self, config: MeasureConfig) -> Result<Self> {
        config.validate()?;
        self.file_discovery = FileDiscovery::new(self.input_path.clone(), &config.file_patterns)?;
        self.streaming_processor = StreamingProcessor::new(config.clone());
        self.config = config;
        Ok(self)
    }

    /// Write rows somewhere other than the default Parquet directory
    pub fn with_sink(mut self, sink: Arc<dyn MeasurementSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share identities through `store` instead of a per-run memory store
    pub fn with_identity_store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.identity_store = store;
        self
    }

    /// Stop at the next record boundary once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn sink(&mut self) -> Result<Arc<dyn MeasurementSink>> {
        if let Some(sink) = &self.sink {
            return Ok(Arc::clone(sink));
        }
        let sink: Arc<dyn MeasurementSink> = Arc::new(ParquetSink::new(
            self.output_path.clone(),
            self.config.parquet_optimization.clone(),
        )?);
        self.sink = Some(Arc::clone(&sink));
        Ok(sink)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(StdfError::Cancelled);
        }
        Ok(())
    }

    /// Main processing entry point
    pub async fn process(&mut self) -> Result<ProcessingStats> {
        let start_time = Instant::now();
        self.config.validate()?;

        println!("{}", "Starting STDF measurement extraction".bright_green().bold());
        println!("  {} {}", "Input:".bright_cyan(), self.input_path.display());
        println!("  {} {}", "Output:".bright_cyan(), self.output_path.display());

        // Step 1: Discover STDF files
        println!("\n{}", "Discovering STDF files...".bright_yellow());
        let files = self.file_discovery.discover_files().await?;
        self.directory_count = self.file_discovery.directory_count();
        println!(
            "  {} {} STDF files in {} directories",
            "Found".bright_green(),
            files.len().to_string().bright_white().bold(),
            self.directory_count.to_string().bright_white().bold()
        );

        let sink = self.sink()?;
        let mut stats = ProcessingStats {
            files_discovered: files.len(),
            output_path: sink.location(),
            ..Default::default()
        };

        if files.is_empty() {
            stats.processing_time_ms = start_time.elapsed().as_millis();
            return Ok(stats);
        }

        // Step 2: Scan files for names and hashes
        println!("\n{}", "Scanning files...".bright_yellow());
        let scan = self
            .streaming_processor
            .scan_files(&files, Arc::clone(&sink), &self.cancel)
            .await?;
        stats.files_failed += scan.failed;

        let (skipped, pending): (Vec<_>, Vec<_>) = scan
            .completed
            .into_iter()
            .partition(|file| file.already_processed);
        let (pending, duplicates) = dedupe_by_hash(pending);
        for file in &duplicates {
            info!(
                "Skipping {}: same content as another input ({})",
                file.path.display(),
                file.file_hash
            );
        }
        stats.files_skipped = skipped.len() + duplicates.len();
        println!(
            "  {} {} files to process, {} already processed",
            "Scanned".bright_green(),
            pending.len().to_string().bright_white().bold(),
            stats.files_skipped.to_string().bright_white()
        );
        self.check_cancelled()?;

        // Step 3: Commit identities in one serialized step
        println!("\n{}", "Committing identities...".bright_yellow());
        let mut discovery = Discovery::new();
        for file in &pending {
            discovery.observe(file.names.clone());
        }
        let store = Arc::clone(&self.identity_store);
        let commit = task::spawn_blocking(move || discovery.commit(store.as_ref()))
            .await
            .map_err(|e| StdfError::ProcessingFailed {
                path: self.input_path.clone(),
                reason: format!("Identity commit task failed: {}", e),
            })??;
        stats.devices_resolved = commit.identities.device_count();
        stats.params_resolved = commit.identities.param_count();
        stats.new_identities = commit.new_devices + commit.new_params;
        println!(
            "  {} {} devices ({} new), {} parameters ({} new)",
            "Resolved".bright_green(),
            stats.devices_resolved.to_string().bright_white().bold(),
            commit.new_devices,
            stats.params_resolved.to_string().bright_white().bold(),
            commit.new_params
        );

        // Step 4: Handle discovery-only mode
        if self.config.discovery_only {
            println!(
                "\n{}",
                "Discovery mode - identities committed, no rows written".bright_green()
            );
            for file in &pending {
                stats.absorb_parse(&file.stats);
            }
            stats.processing_time_ms = start_time.elapsed().as_millis();
            print_summary(&stats);
            return Ok(stats);
        }
        self.check_cancelled()?;

        // Step 5: Expand and write every pending file
        println!("\n{}", "Processing files...".bright_yellow());
        let outcome = self
            .streaming_processor
            .process_files(
                &pending,
                Arc::new(commit.identities),
                Arc::clone(&sink),
                &self.cancel,
            )
            .await?;
        stats.files_failed += outcome.failed;
        for summary in &outcome.completed {
            stats.absorb(summary);
        }

        stats.processing_time_ms = start_time.elapsed().as_millis();
        print_summary(&stats);

        Ok(stats)
    }
}

/// Keep the first file of each content hash; later copies are returned
/// separately. Input order is preserved.
fn dedupe_by_hash(files: Vec<ScannedFile>) -> (Vec<ScannedFile>, Vec<ScannedFile>) {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .partition(|file| seen.insert(file.file_hash.clone()))
}

fn print_summary(stats: &ProcessingStats) {
    println!("\n{}", "Processing Summary".bright_green().bold());
    println!(
        "  {} {}ms",
        "Time elapsed:".bright_cyan(),
        stats.processing_time_ms.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Files processed:".bright_cyan(),
        stats.files_processed.to_string().bright_white()
    );
    if stats.files_skipped > 0 {
        println!(
            "  {} {}",
            "Files skipped:".bright_cyan(),
            stats.files_skipped.to_string().bright_white()
        );
    }
    if stats.files_failed > 0 {
        println!(
            "  {} {}",
            "Files failed:".bright_red(),
            stats.files_failed.to_string().bright_red().bold()
        );
    }
    if stats.truncated_files > 0 {
        println!(
            "  {} {}",
            "Truncated files:".bright_yellow(),
            stats.truncated_files.to_string().bright_yellow()
        );
    }
    println!(
        "  {} {}",
        "Records read:".bright_cyan(),
        stats.total_records.to_string().bright_white()
    );
    for (kind, count) in &stats.records_by_kind {
        println!("    {:<4} {}", kind.as_str(), count);
    }
    if stats.unknown_records > 0 || stats.corrupt_records > 0 {
        println!(
            "  {} {} unknown, {} corrupt",
            "Skipped records:".bright_cyan(),
            stats.unknown_records,
            stats.corrupt_records
        );
    }
    println!(
        "  {} {} filtered, {} failed",
        "Test records:".bright_cyan(),
        stats.filtered_tests,
        stats.failed_tests
    );
    println!(
        "  {} {}",
        "Total rows:".bright_cyan(),
        stats.total_rows.to_string().bright_white().bold()
    );
}
