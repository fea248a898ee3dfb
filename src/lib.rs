//! STDF Measurement Library
//!
//! A Rust library for turning STDF V4 semiconductor test data files into
//! position-resolved measurement rows written as Apache Parquet.
//!
//! This library provides tools for:
//! - Reading STDF V4 records in either byte order, tolerating truncated files
//! - Decoding record payloads against static per-kind field schemas
//! - Expanding every device x marked test x value into one measurement row
//! - Assigning stable surrogate IDs to device and parameter names through a
//!   shared identity store
//! - Processing many files concurrently with whole-file deduplication

pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod expansion;
pub mod identity;
pub mod models;
pub mod processor;
pub mod stdf;

// Re-export commonly used types
pub use config::{CompressionAlgorithm, MeasureConfig, ParquetOptimizationConfig};
pub use error::{Result, StdfError};
pub use expansion::ExpansionEngine;
pub use identity::{
    Discovery, IdentityKind, IdentityMap, IdentityStore, MemoryIdentityStore, ObservedNames,
    SqliteIdentityStore,
};
pub use models::{
    FileContext, FileSummary, Measurement, MeasurementBatch, ProcessingStats, RecordKind,
};
pub use processor::BatchProcessor;
pub use processor::writer::{MeasurementSink, MemorySink, ParquetSink};
pub use stdf::{ParsedFile, RecordStore, parse_file, parse_reader};
