//! Error handling for STDF parsing and measurement extraction.
//!
//! `StdfError` covers failures that abort a file or a run. `ReadError`
//! and `DecodeError` are recovered locally by the parse driver: truncation
//! keeps everything read so far, a field overrun discards one record.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Identity store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Input not found at path: {path}")]
    InputNotFound { path: PathBuf },

    #[error("Processing failed for file: {path} - {reason}")]
    ProcessingFailed { path: PathBuf, reason: String },

    #[error("No {kind} identity resolved for '{name}'; discovery must commit before expansion")]
    UnresolvedIdentity { kind: &'static str, name: String },

    #[error("Conflicting {kind} identity for '{name}': {details}")]
    IdentityConflict {
        kind: &'static str,
        name: String,
        details: String,
    },

    #[error("Identity store error: {message}")]
    Store { message: String },

    #[error("Sink write failed for file: {path} - {reason}")]
    Sink { path: PathBuf, reason: String },

    #[error("Rows for {path} already loaded from {existing} (hash {file_hash})")]
    DuplicateContent {
        path: PathBuf,
        existing: PathBuf,
        file_hash: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Processing cancelled")]
    Cancelled,
}

/// Stream-level failure while splitting a file into records.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error(
        "Truncated file: record at offset {offset} needs {needed} bytes, {available} available"
    )]
    Truncated {
        /// Offset of the incomplete record; everything before it was read
        offset: u64,
        needed: usize,
        available: usize,
    },

    #[error("IO error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Record-level failure while decoding a payload against its schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Field {field} at payload offset {offset} needs {needed} bytes, {available} remain")]
    FieldOverrun {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Array field {field} refers to count field {count_field} which is not a decoded integer")]
    InvalidCount {
        field: &'static str,
        count_field: &'static str,
    },
}

/// A position marker whose digits do not fit a coordinate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerError {
    #[error("Position marker '{marker}' has a coordinate out of range")]
    CoordinateOverflow { marker: String },
}

impl StdfError {
    /// Errors that stop the whole run rather than one file
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            StdfError::Cancelled
                | StdfError::UnresolvedIdentity { .. }
                | StdfError::IdentityConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StdfError>;
