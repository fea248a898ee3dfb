//! Measurement sinks.
//!
//! A sink receives every row of one input file in a single call and can
//! report whether a file hash was already loaded. `ParquetSink` writes one
//! Parquet file per input, named after the source stem and hash prefix;
//! `MemorySink` keeps batches in memory.

use crate::config::{ParquetOptimizationConfig, SystemProfile};
use crate::constants::{OUTPUT_HASH_PREFIX_LEN, PARTIAL_EXTENSION};
use crate::error::{Result, StdfError};
use crate::models::{Measurement, MeasurementBatch};

use polars::prelude::{
    Column, DataFrame, DataType, IntoLazy, ParquetWriter as PolarsParquetWriter,
    StatisticsOptions, TimeUnit, lit,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Destination for measurement rows
pub trait MeasurementSink: Send + Sync {
    /// True when rows for this file hash were already written
    fn contains(&self, file_hash: &str) -> Result<bool>;

    /// Write all rows of one file; returns the number of rows written.
    ///
    /// Rewriting the same source replaces its rows. A different source
    /// with a hash the sink already holds is refused with
    /// [`StdfError::DuplicateContent`].
    fn write_batch(&self, batch: &MeasurementBatch) -> Result<usize>;

    /// Where the rows end up, for reporting
    fn location(&self) -> PathBuf {
        PathBuf::new()
    }
}

/// Parquet output, one file per input
#[derive(Debug)]
pub struct ParquetSink {
    output_dir: PathBuf,
    config: ParquetOptimizationConfig,
    system_profile: SystemProfile,
}

impl ParquetSink {
    /// Create the sink, creating `output_dir` if needed
    pub fn new(output_dir: PathBuf, config: ParquetOptimizationConfig) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            config,
            system_profile: SystemProfile::detect(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Output path for a source file and its hash
    pub fn output_path_for(&self, source_path: &Path, file_hash: &str) -> PathBuf {
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        self.output_dir
            .join(format!("{}.{}.parquet", stem, hash_prefix(file_hash)))
    }

    fn write_parquet(&self, df: &mut DataFrame, path: &Path) -> Result<()> {
        let row_group_size = self
            .config
            .calculate_optimal_row_group_size(df.height(), &self.system_profile);
        let statistics = if self.config.enable_statistics {
            StatisticsOptions::full()
        } else {
            StatisticsOptions::empty()
        };

        let file = std::fs::File::create(path)?;
        PolarsParquetWriter::new(file)
            .with_compression(self.config.compression_algorithm.to_polars_compression())
            .with_statistics(statistics)
            .with_row_group_size(Some(row_group_size))
            .with_data_page_size(Some(self.config.data_page_size))
            .finish(df)
            .map_err(|e| StdfError::Sink {
                path: path.to_path_buf(),
                reason: format!("Failed to write parquet: {}", e),
            })?;
        Ok(())
    }
}

fn hash_prefix(file_hash: &str) -> &str {
    file_hash
        .get(..OUTPUT_HASH_PREFIX_LEN)
        .unwrap_or(file_hash)
}

impl ParquetSink {
    /// Output files already written for `file_hash`
    fn outputs_for(&self, file_hash: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            "{}/*.{}.parquet",
            glob::Pattern::escape(&self.output_dir.to_string_lossy()),
            hash_prefix(file_hash)
        );
        let matches = glob::glob(&pattern).map_err(|e| StdfError::Sink {
            path: self.output_dir.clone(),
            reason: format!("Invalid output pattern: {}", e),
        })?;
        Ok(matches.filter_map(|entry| entry.ok()).collect())
    }
}

impl MeasurementSink for ParquetSink {
    fn contains(&self, file_hash: &str) -> Result<bool> {
        Ok(!self.outputs_for(file_hash)?.is_empty())
    }

    fn write_batch(&self, batch: &MeasurementBatch) -> Result<usize> {
        let final_path = self.output_path_for(&batch.source_path, &batch.file_hash);
        let partial_path = final_path.with_extension(format!("parquet.{}", PARTIAL_EXTENSION));

        if let Some(existing) = self
            .outputs_for(&batch.file_hash)?
            .into_iter()
            .find(|path| *path != final_path)
        {
            return Err(StdfError::DuplicateContent {
                path: batch.source_path.clone(),
                existing,
                file_hash: batch.file_hash.to_string(),
            });
        }

        let mut df = measurement_frame(batch)?;
        let rows = df.height();

        if let Err(e) = self.write_parquet(&mut df, &partial_path) {
            if let Err(cleanup) = std::fs::remove_file(&partial_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "Failed to remove partial output {}: {}",
                        partial_path.display(),
                        cleanup
                    );
                }
            }
            return Err(e);
        }
        std::fs::rename(&partial_path, &final_path)?;

        debug!("Wrote {} rows to {}", rows, final_path.display());
        Ok(rows)
    }

    fn location(&self) -> PathBuf {
        self.output_dir.clone()
    }
}

fn string_column(rows: &[Measurement], field: fn(&Measurement) -> &str) -> Vec<&str> {
    rows.iter().map(field).collect()
}

/// Rows plus file-level context columns
pub fn measurement_frame(batch: &MeasurementBatch) -> Result<DataFrame> {
    let rows = &batch.rows;

    let start_ms = batch.context.start_time.map(|t| t.timestamp_millis());
    let start_time = Column::new("start_time".into(), vec![start_ms; rows.len()])
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;

    let df = DataFrame::new(vec![
        Column::new(
            "device_id".into(),
            rows.iter().map(|r| r.device_id).collect::<Vec<u32>>(),
        ),
        Column::new(
            "param_id".into(),
            rows.iter().map(|r| r.param_id).collect::<Vec<u32>>(),
        ),
        Column::new(
            "pos_x".into(),
            rows.iter().map(|r| r.pos_x).collect::<Vec<i32>>(),
        ),
        Column::new(
            "pos_y".into(),
            rows.iter().map(|r| r.pos_y).collect::<Vec<i32>>(),
        ),
        Column::new(
            "value".into(),
            rows.iter().map(|r| r.value).collect::<Vec<f64>>(),
        ),
        Column::new(
            "test_flag".into(),
            rows.iter().map(|r| r.test_flag).collect::<Vec<u8>>(),
        ),
        Column::new(
            "test_num".into(),
            rows.iter().map(|r| r.test_num).collect::<Vec<u32>>(),
        ),
        Column::new(
            "segment".into(),
            rows.iter().map(|r| r.segment).collect::<Vec<u16>>(),
        ),
        Column::new("device_dmc".into(), string_column(rows, |r| &*r.device_dmc)),
        Column::new("param_name".into(), string_column(rows, |r| &*r.param_name)),
        Column::new("units".into(), string_column(rows, |r| &*r.units)),
        Column::new("bin_code".into(), string_column(rows, |r| &*r.bin_code)),
        Column::new("file_hash".into(), string_column(rows, |r| &*r.file_hash)),
        start_time,
    ])?;

    let context = &batch.context;
    let source_file = batch
        .source_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let df = df
        .lazy()
        .with_columns([
            lit(context.facility.clone()).alias("facility"),
            lit(context.lot_id.clone()).alias("lot_id"),
            lit(context.operation.clone()).alias("operation"),
            lit(context.equipment.clone()).alias("equipment"),
            lit(context.program_name.clone()).alias("program_name"),
            lit(context.program_version.clone()).alias("program_version"),
            lit(source_file).alias("source_file"),
        ])
        .collect()?;
    Ok(df)
}

/// Keeps batches in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<MeasurementBatch>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<MeasurementBatch>>> {
        self.batches.lock().map_err(|_| StdfError::Sink {
            path: PathBuf::from("<memory>"),
            reason: "memory sink lock poisoned".to_string(),
        })
    }

    /// Snapshot of every batch written so far
    pub fn batches(&self) -> Result<Vec<MeasurementBatch>> {
        Ok(self.lock()?.clone())
    }

    /// All rows across batches
    pub fn rows(&self) -> Result<Vec<Measurement>> {
        Ok(self
            .lock()?
            .iter()
            .flat_map(|b| b.rows.iter().cloned())
            .collect())
    }
}

impl MeasurementSink for MemorySink {
    fn contains(&self, file_hash: &str) -> Result<bool> {
        Ok(self.lock()?.iter().any(|b| &*b.file_hash == file_hash))
    }

    fn write_batch(&self, batch: &MeasurementBatch) -> Result<usize> {
        let rows = batch.rows.len();
        let mut batches = self.lock()?;
        if let Some(held) = batches.iter().find(|b| b.file_hash == batch.file_hash) {
            if held.source_path != batch.source_path {
                return Err(StdfError::DuplicateContent {
                    path: batch.source_path.clone(),
                    existing: held.source_path.clone(),
                    file_hash: batch.file_hash.to_string(),
                });
            }
        }
        batches.retain(|b| b.file_hash != batch.file_hash);
        batches.push(batch.clone());
        Ok(rows)
    }
}
