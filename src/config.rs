//! Configuration management and validation.
//!
//! Provides the run configuration for measurement extraction, the parquet
//! output settings, and system profiling used to size row groups.

use crate::constants::{
    DEFAULT_DATA_PAGE_SIZE, DEFAULT_FILE_PATTERNS, DEFAULT_MEMORY_THRESHOLD,
    DEFAULT_ROW_GROUP_SIZE, ESTIMATED_ROW_BYTES,
};
use crate::error::{Result, StdfError};

use polars::prelude::ParquetCompression;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How measurement batches are laid out in Parquet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetOptimizationConfig {
    /// Page compression codec
    pub compression_algorithm: CompressionAlgorithm,

    /// Write min/max statistics per column chunk
    pub enable_statistics: bool,

    /// Target row group size (rows per group); 0 applies the strategy
    pub target_row_group_size: usize,

    pub row_group_strategy: RowGroupStrategy,

    /// Data page size in bytes
    pub data_page_size: usize,

    /// Memory limit in MB for row group sizing (0 = auto-detect)
    pub memory_limit_mb: usize,
}

/// How the row group size is chosen when none is fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowGroupStrategy {
    /// Fixed size row groups
    Fixed,
    /// Derived from row width, core count and memory
    Adaptive,
}

/// Compression codecs accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum CompressionAlgorithm {
    /// Snappy, the default
    Snappy,
    /// Zstandard at its default level
    Zstd,
    /// LZ4 raw blocks
    Lz4,
    /// No compression
    Uncompressed,
}

impl Default for ParquetOptimizationConfig {
    fn default() -> Self {
        Self {
            compression_algorithm: CompressionAlgorithm::Snappy,
            enable_statistics: true,
            target_row_group_size: 0,
            row_group_strategy: RowGroupStrategy::Adaptive,
            data_page_size: DEFAULT_DATA_PAGE_SIZE,
            memory_limit_mb: 0,
        }
    }
}

impl CompressionAlgorithm {
    pub fn to_polars_compression(&self) -> ParquetCompression {
        match self {
            CompressionAlgorithm::Snappy => ParquetCompression::Snappy,
            CompressionAlgorithm::Zstd => ParquetCompression::Zstd(None),
            CompressionAlgorithm::Lz4 => ParquetCompression::Lz4Raw,
            CompressionAlgorithm::Uncompressed => ParquetCompression::Uncompressed,
        }
    }
}

/// Host resources used to size row groups
#[derive(Debug, Clone)]
pub struct SystemProfile {
    /// Total memory in MB
    pub memory_mb: usize,
    /// Physical cores
    pub performance_cores: usize,
}

impl SystemProfile {
    /// Probe the current host
    pub fn detect() -> Self {
        use sysinfo::System;

        let performance_cores = num_cpus::get_physical();

        let mut system = System::new();
        system.refresh_memory();
        let memory_mb = (system.total_memory() / 1024 / 1024) as usize;

        Self {
            memory_mb,
            performance_cores,
        }
    }
}

impl ParquetOptimizationConfig {
    /// Row group size for a file of `total_rows` measurement rows
    pub fn calculate_optimal_row_group_size(
        &self,
        total_rows: usize,
        system_profile: &SystemProfile,
    ) -> usize {
        if self.target_row_group_size > 0 {
            return self.target_row_group_size;
        }

        let optimal_size = match self.row_group_strategy {
            RowGroupStrategy::Fixed => DEFAULT_ROW_GROUP_SIZE,
            RowGroupStrategy::Adaptive => {
                self.adaptive_row_group_size(total_rows, system_profile)
            }
        };

        debug!(
            "Row group optimization: {} rows for {} total (strategy: {:?}, {} cores, {}MB memory)",
            optimal_size,
            total_rows,
            self.row_group_strategy,
            system_profile.performance_cores,
            system_profile.memory_mb
        );

        optimal_size
    }

    fn adaptive_row_group_size(&self, total_rows: usize, profile: &SystemProfile) -> usize {
        // Target 128MB row groups
        let target_rows_from_size = (128 * 1024 * 1024) / ESTIMATED_ROW_BYTES;

        // ~100K rows per core for parallel reads
        let target_rows_from_cores = profile.performance_cores.max(1) * 100_000;

        // Never more than 1/8 of memory
        let budget_mb = match self.memory_limit_mb {
            0 => profile.memory_mb,
            limit => limit,
        };
        let max_rows_from_memory = (budget_mb / 8) * 1024 * 1024 / ESTIMATED_ROW_BYTES;

        let optimal_size = target_rows_from_size
            .min(target_rows_from_cores)
            .min(max_rows_from_memory)
            .clamp(100_000, 2_000_000);

        // Small files get a single row group
        if total_rows > 0 {
            optimal_size.min(total_rows)
        } else {
            optimal_size
        }
    }
}

/// Global configuration for STDF measurement extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureConfig {
    /// Maximum files parsed and expanded concurrently
    pub max_concurrent_files: usize,

    /// Treat FTR records as test records
    pub include_functional_tests: bool,

    /// Glob patterns selecting input files when the input is a directory
    pub file_patterns: Vec<String>,

    /// Skip files whose content hash the sink already holds
    pub skip_processed_files: bool,

    /// Stop after identity discovery without writing measurements
    pub discovery_only: bool,

    /// Memory usage fraction above which file concurrency is halved
    pub memory_threshold: f64,

    /// Output layout settings
    pub parquet_optimization: ParquetOptimizationConfig,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: num_cpus::get().max(1),
            include_functional_tests: true,
            file_patterns: DEFAULT_FILE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            skip_processed_files: true,
            discovery_only: false,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            parquet_optimization: ParquetOptimizationConfig::default(),
        }
    }
}

impl MeasureConfig {
    /// Limit how many files are in flight at once
    pub fn with_max_concurrent_files(mut self, max_files: usize) -> Self {
        self.max_concurrent_files = max_files;
        self
    }

    /// Include or exclude FTR records
    pub fn with_functional_tests(mut self, include: bool) -> Self {
        self.include_functional_tests = include;
        self
    }

    /// Replace the input file patterns
    pub fn with_file_patterns(mut self, patterns: Vec<String>) -> Self {
        self.file_patterns = patterns;
        self
    }

    /// Reprocess files even when the sink already holds them
    pub fn with_force_reprocess(mut self) -> Self {
        self.skip_processed_files = false;
        self
    }

    /// Stop once identities are committed
    pub fn with_discovery_only(mut self) -> Self {
        self.discovery_only = true;
        self
    }

    pub fn with_memory_threshold(mut self, threshold: f64) -> Self {
        self.memory_threshold = threshold;
        self
    }

    /// Set the parquet compression algorithm
    pub fn with_compression(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.parquet_optimization.compression_algorithm = algorithm;
        self
    }

    pub fn with_parquet_optimization(mut self, config: ParquetOptimizationConfig) -> Self {
        self.parquet_optimization = config;
        self
    }

    /// Reject settings the processor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_files == 0 {
            return Err(StdfError::Configuration {
                message: "max_concurrent_files must be at least 1".to_string(),
            });
        }
        if self.file_patterns.is_empty() {
            return Err(StdfError::Configuration {
                message: "at least one file pattern is required".to_string(),
            });
        }
        for pattern in &self.file_patterns {
            glob::Pattern::new(pattern).map_err(|e| StdfError::Configuration {
                message: format!("invalid file pattern '{}': {}", pattern, e),
            })?;
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(StdfError::Configuration {
                message: format!(
                    "memory_threshold must be in (0, 1], got {}",
                    self.memory_threshold
                ),
            });
        }
        Ok(())
    }
}
