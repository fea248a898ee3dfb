//! Concurrent file pipeline for both processing phases
//!
//! Files are handled on the blocking pool with bounded concurrency, which
//! is halved under memory pressure. A failing file is counted and skipped;
//! cancellation and identity errors stop the run.

use super::scan::{HashingReader, ScannedFile, scan_file};
use super::writer::MeasurementSink;
use crate::config::MeasureConfig;
use crate::error::{Result, StdfError};
use crate::expansion::ExpansionEngine;
use crate::identity::IdentityMap;
use crate::models::{FileContext, FileSummary, MeasurementBatch, RecordKind};
use crate::stdf::{self, EXPANSION_KINDS, RecordStore};

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::System;
use tokio::sync::Mutex;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Completed items of one phase plus the number of files that failed
#[derive(Debug)]
pub struct PhaseOutcome<T> {
    pub completed: Vec<T>,
    pub failed: usize,
}

/// Streaming processor for STDF files
#[derive(Debug)]
pub struct StreamingProcessor {
    config: MeasureConfig,
    engine: Arc<ExpansionEngine>,
    system_monitor: Arc<Mutex<System>>,
    memory_threshold: f64,
}

impl StreamingProcessor {
    pub fn new(config: MeasureConfig) -> Self {
        let engine = Arc::new(ExpansionEngine::new(config.include_functional_tests));
        let memory_threshold = config.memory_threshold;
        Self {
            config,
            engine,
            system_monitor: Arc::new(Mutex::new(System::new())),
            memory_threshold,
        }
    }

    pub fn engine(&self) -> &ExpansionEngine {
        &self.engine
    }

    /// Check if system is under memory pressure
    pub async fn check_memory_pressure(&self) -> bool {
        let mut system = self.system_monitor.lock().await;
        system.refresh_memory();

        let used_memory = system.used_memory() as f64;
        let total_memory = system.total_memory() as f64;

        if total_memory == 0.0 {
            return false;
        }

        let memory_usage = used_memory / total_memory;
        let is_pressure = memory_usage > self.memory_threshold;

        if is_pressure {
            debug!(
                "Memory pressure detected: {:.1}% usage (threshold: {:.1}%)",
                memory_usage * 100.0,
                self.memory_threshold * 100.0
            );
        }

        is_pressure
    }

    async fn concurrency_limit(&self, file_count: usize) -> usize {
        let mut limit = self.config.max_concurrent_files.min(file_count).max(1);
        if self.check_memory_pressure().await {
            limit = (limit / 2).max(1);
            debug!("Memory pressure detected, reducing concurrency to {}", limit);
        }
        limit
    }

    /// Hash every file and collect the names it would emit.
    ///
    /// Results are sorted by path regardless of completion order.
    pub async fn scan_files(
        &self,
        files: &[PathBuf],
        sink: Arc<dyn MeasurementSink>,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutcome<ScannedFile>> {
        let skip_processed = self.config.skip_processed_files;
        let mut outcome = self
            .run_phase(files, "Scanning", cancel, |path, cancel| {
                let path = path.clone();
                let engine = Arc::clone(&self.engine);
                let sink = Arc::clone(&sink);
                blocking(path.clone(), move || {
                    scan_file(&path, &engine, sink.as_ref(), skip_processed, &cancel)
                })
            })
            .await?;
        outcome.completed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(outcome)
    }

    /// Expand every scanned file against committed identities and write
    /// one batch per file to the sink.
    pub async fn process_files(
        &self,
        scanned: &[ScannedFile],
        identities: Arc<IdentityMap>,
        sink: Arc<dyn MeasurementSink>,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutcome<FileSummary>> {
        self.run_phase(scanned, "Expanding", cancel, |file, cancel| {
            let file = file.clone();
            let engine = Arc::clone(&self.engine);
            let identities = Arc::clone(&identities);
            let sink = Arc::clone(&sink);
            blocking(file.path.clone(), move || {
                process_single_file(&file, &engine, &identities, sink.as_ref(), &cancel)
            })
        })
        .await
    }

    async fn run_phase<'a, I, T, F, Fut>(
        &self,
        items: &'a [I],
        label: &str,
        cancel: &CancellationToken,
        task_for: F,
    ) -> Result<PhaseOutcome<T>>
    where
        I: HasPath,
        F: Fn(&'a I, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let pb = ProgressBar::new(items.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(format!("{} files", label));

        let concurrent_limit = self.concurrency_limit(items.len()).await;
        // Cancelled on the first run-level error so sibling files stop early
        let phase_cancel = cancel.child_token();

        let (completed, failed, fatal) = stream::iter(items)
            .map(|item| {
                let pb = pb.clone();
                let task = task_for(item, phase_cancel.clone());
                async move {
                    if let Some(file_name) = item.path().file_name() {
                        pb.set_message(format!("{}: {}", label, file_name.to_string_lossy()));
                    }
                    let result = task.await;
                    pb.inc(1);
                    (item.path(), result)
                }
            })
            .buffer_unordered(concurrent_limit)
            .fold(
                (Vec::new(), 0usize, None::<StdfError>),
                |(mut completed, failed, fatal), (path, result)| {
                    let phase_cancel = &phase_cancel;
                    async move {
                        match result {
                            Ok(item) => {
                                completed.push(item);
                                (completed, failed, fatal)
                            }
                            Err(e) if e.aborts_run() => {
                                phase_cancel.cancel();
                                (completed, failed, fatal.or(Some(e)))
                            }
                            Err(e) => {
                                error!("Failed to process {}: {:#}", path.display(), e);
                                (completed, failed + 1, fatal)
                            }
                        }
                    }
                },
            )
            .await;

        if let Some(e) = fatal {
            pb.abandon_with_message(format!("{} aborted", label));
            return Err(e);
        }
        pb.finish_with_message(format!("{} complete", label));

        if self.check_memory_pressure().await {
            warn!("Memory pressure detected after {} phase", label.to_lowercase());
        }

        Ok(PhaseOutcome { completed, failed })
    }
}

/// Anything a phase runs over, for progress and error messages
trait HasPath {
    fn path(&self) -> &Path;
}

impl HasPath for PathBuf {
    fn path(&self) -> &Path {
        self
    }
}

impl HasPath for ScannedFile {
    fn path(&self) -> &Path {
        &self.path
    }
}

async fn blocking<T, F>(path: PathBuf, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|e| StdfError::ProcessingFailed {
            path,
            reason: format!("Worker task failed: {}", e),
        })?
}

/// Re-parse one scanned file, expand it and hand the batch to the sink.
///
/// The file must still hash to what the scan saw; otherwise its names may
/// not have been committed.
pub fn process_single_file(
    scanned: &ScannedFile,
    engine: &ExpansionEngine,
    identities: &IdentityMap,
    sink: &dyn MeasurementSink,
    cancel: &CancellationToken,
) -> Result<FileSummary> {
    let mut reader = HashingReader::new(BufReader::new(File::open(&scanned.path)?));
    let parsed = stdf::parse_reader(
        &mut reader,
        RecordStore::retaining(EXPANSION_KINDS),
        cancel,
    )?;
    let file_hash = reader.finish()?;
    if file_hash != scanned.file_hash {
        return Err(StdfError::ProcessingFailed {
            path: scanned.path.clone(),
            reason: "file changed between scan and expansion".to_string(),
        });
    }

    let context = parsed
        .store
        .first(RecordKind::Mir)
        .map(FileContext::from_mir)
        .unwrap_or_default();
    if parsed.store.first(RecordKind::Mir).is_none() {
        debug!("No MIR in {}, context columns left empty", scanned.path.display());
    }

    let file_hash: Arc<str> = Arc::from(file_hash);
    let expansion = engine.expand(&parsed.store, identities, &file_hash)?;
    if expansion.stats.dropped_rows > 0 {
        warn!(
            "Dropped {} rows past the segment range in {}",
            expansion.stats.dropped_rows,
            scanned.path.display()
        );
    }

    let batch = MeasurementBatch {
        source_path: scanned.path.clone(),
        file_hash,
        context,
        rows: expansion.rows,
    };
    let rows_written = sink.write_batch(&batch)?;

    debug!(
        "Processed {}: {} devices, {} rows",
        scanned.path.display(),
        expansion.stats.devices,
        rows_written
    );

    Ok(FileSummary {
        path: scanned.path.clone(),
        file_hash: scanned.file_hash.clone(),
        parse: parsed.stats,
        expansion: expansion.stats,
        rows_written,
    })
}
