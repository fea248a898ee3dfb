//! Core data structures for STDF processing.
//!
//! Defines record kinds, raw and typed field values, the device/test views
//! the expansion engine works on, measurement rows, and the per-file and
//! per-run statistics reported to callers.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Logical STDF V4 record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    Far,
    Atr,
    Mir,
    Mrr,
    Pcr,
    Hbr,
    Sbr,
    Pmr,
    Pgr,
    Rdr,
    Sdr,
    Wir,
    Wrr,
    Wcr,
    Pir,
    Prr,
    Tsr,
    Ptr,
    Mpr,
    Ftr,
    Bps,
    Eps,
    Dtr,
    /// Any pair without a decoding schema; counted, never decoded
    Unknown,
}

impl RecordKind {
    /// Every kind with a decoding schema
    pub const KNOWN: [RecordKind; 23] = [
        RecordKind::Far,
        RecordKind::Atr,
        RecordKind::Mir,
        RecordKind::Mrr,
        RecordKind::Pcr,
        RecordKind::Hbr,
        RecordKind::Sbr,
        RecordKind::Pmr,
        RecordKind::Pgr,
        RecordKind::Rdr,
        RecordKind::Sdr,
        RecordKind::Wir,
        RecordKind::Wrr,
        RecordKind::Wcr,
        RecordKind::Pir,
        RecordKind::Prr,
        RecordKind::Tsr,
        RecordKind::Ptr,
        RecordKind::Mpr,
        RecordKind::Ftr,
        RecordKind::Bps,
        RecordKind::Eps,
        RecordKind::Dtr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Far => "FAR",
            RecordKind::Atr => "ATR",
            RecordKind::Mir => "MIR",
            RecordKind::Mrr => "MRR",
            RecordKind::Pcr => "PCR",
            RecordKind::Hbr => "HBR",
            RecordKind::Sbr => "SBR",
            RecordKind::Pmr => "PMR",
            RecordKind::Pgr => "PGR",
            RecordKind::Rdr => "RDR",
            RecordKind::Sdr => "SDR",
            RecordKind::Wir => "WIR",
            RecordKind::Wrr => "WRR",
            RecordKind::Wcr => "WCR",
            RecordKind::Pir => "PIR",
            RecordKind::Prr => "PRR",
            RecordKind::Tsr => "TSR",
            RecordKind::Ptr => "PTR",
            RecordKind::Mpr => "MPR",
            RecordKind::Ftr => "FTR",
            RecordKind::Bps => "BPS",
            RecordKind::Eps => "EPS",
            RecordKind::Dtr => "DTR",
            RecordKind::Unknown => "UNKNOWN",
        }
    }

    /// Kinds that carry test results
    pub fn is_test(&self) -> bool {
        matches!(self, RecordKind::Ptr | RecordKind::Mpr | RecordKind::Ftr)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order of multi-byte numeric fields, fixed per file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// One header + payload pair as it appears in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub type_byte: u8,
    pub subtype_byte: u8,
    pub payload: Vec<u8>,
    /// Offset of the record header from the start of the file
    pub file_offset: u64,
}

/// Typed value of a decoded field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U1(u8),
    U2(u16),
    U4(u32),
    I1(i8),
    I2(i16),
    I4(i32),
    R4(f32),
    R8(f64),
    /// Single character (C1)
    Char(u8),
    /// Length-prefixed text (Cn)
    Text(String),
    /// Length-prefixed bytes (Bn)
    Bytes(Vec<u8>),
    /// Bit field with explicit bit count (Dn)
    Bits { bit_count: u16, bytes: Vec<u8> },
    U1Array(Vec<u8>),
    U2Array(Vec<u16>),
    R4Array(Vec<f32>),
    /// Four-bit values, one per element (xN1)
    Nibbles(Vec<u8>),
}

impl FieldValue {
    /// Integer view of any scalar integer field
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::U1(v) => Some(v as u64),
            FieldValue::U2(v) => Some(v as u64),
            FieldValue::U4(v) => Some(v as u64),
            FieldValue::I1(v) => u64::try_from(v).ok(),
            FieldValue::I2(v) => u64::try_from(v).ok(),
            FieldValue::I4(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Signed view of any scalar integer field
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::U1(v) => Some(v as i64),
            FieldValue::U2(v) => Some(v as i64),
            FieldValue::U4(v) => Some(v as i64),
            FieldValue::I1(v) => Some(v as i64),
            FieldValue::I2(v) => Some(v as i64),
            FieldValue::I4(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Numeric view of any scalar numeric field
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::R4(v) => Some(v as f64),
            FieldValue::R8(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_r4_array(&self) -> Option<&[f32]> {
        match self {
            FieldValue::R4Array(v) => Some(v),
            _ => None,
        }
    }
}

/// Device view of a PRR: one per physical part tested
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub device_dmc: String,
    pub bin_code: String,
    pub default_x: i32,
    pub default_y: i32,
}

/// Test view of a PTR, MPR or FTR
#[derive(Debug, Clone, PartialEq)]
pub struct TestRecord {
    pub kind: RecordKind,
    pub test_num: u32,
    pub head_num: u8,
    pub site_num: u8,
    pub test_flag: u8,
    pub alarm_id: String,
    pub test_txt: String,
    pub units: String,
    /// Scalar result used when a text token does not parse
    pub result: f64,
    pub values: Vec<f64>,
}

/// Lot-level context taken from the MIR, constant for a file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileContext {
    pub facility: String,
    pub lot_id: String,
    pub operation: String,
    pub equipment: String,
    pub program_name: String,
    pub program_version: String,
    pub start_time: Option<DateTime<Utc>>,
}

/// One output row
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub device_id: u32,
    pub param_id: u32,
    pub pos_x: i32,
    pub pos_y: i32,
    pub value: f64,
    pub test_flag: u8,
    pub test_num: u32,
    pub segment: u16,
    pub device_dmc: Arc<str>,
    pub param_name: Arc<str>,
    pub units: Arc<str>,
    pub bin_code: Arc<str>,
    pub file_hash: Arc<str>,
}

/// All rows of one input file, handed to the sink in a single call
#[derive(Debug, Clone)]
pub struct MeasurementBatch {
    pub source_path: PathBuf,
    pub file_hash: Arc<str>,
    pub context: FileContext,
    pub rows: Vec<Measurement>,
}

/// Record-level statistics for one parsed file
#[derive(Debug, Clone, Default)]
pub struct FileStats {
    pub total_records_seen: u64,
    pub records_by_kind: BTreeMap<RecordKind, u64>,
    pub unknown_records: u64,
    pub corrupt_records: u64,
    /// Offset of the incomplete trailing record, when the file was cut short
    pub truncated_at: Option<u64>,
    pub byte_order: ByteOrder,
    pub parse_duration: Duration,
}

impl FileStats {
    pub fn is_complete(&self) -> bool {
        self.truncated_at.is_none()
    }

    pub fn count(&self, kind: RecordKind) -> u64 {
        self.records_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Expansion statistics for one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    pub devices: u64,
    pub test_records: u64,
    /// Test records without a position marker
    pub filtered_tests: u64,
    /// Test records with a marker whose data could not be used
    pub failed_tests: u64,
    pub measurements_emitted: u64,
    /// Rows beyond the segment range of their key
    pub dropped_rows: u64,
}

/// Result of processing one file end to end
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub path: PathBuf,
    pub file_hash: String,
    pub parse: FileStats,
    pub expansion: ExpansionStats,
    pub rows_written: usize,
}

/// Processing statistics for a whole run
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub files_discovered: usize,
    pub files_processed: usize,
    /// Files whose hash was already present in the sink
    pub files_skipped: usize,
    pub files_failed: usize,
    pub truncated_files: usize,
    pub total_records: u64,
    pub records_by_kind: BTreeMap<RecordKind, u64>,
    pub unknown_records: u64,
    pub corrupt_records: u64,
    pub filtered_tests: u64,
    pub failed_tests: u64,
    pub total_rows: usize,
    pub devices_resolved: usize,
    pub params_resolved: usize,
    pub new_identities: usize,
    pub output_path: PathBuf,
    pub processing_time_ms: u128,
}

impl ProcessingStats {
    /// Fold one file's summary into the run totals
    pub fn absorb(&mut self, summary: &FileSummary) {
        self.files_processed += 1;
        self.absorb_parse(&summary.parse);
        self.filtered_tests += summary.expansion.filtered_tests;
        self.failed_tests += summary.expansion.failed_tests;
        self.total_rows += summary.rows_written;
    }

    /// Fold record-level counts only, for files that were scanned but not expanded
    pub fn absorb_parse(&mut self, parse: &FileStats) {
        if !parse.is_complete() {
            self.truncated_files += 1;
        }
        self.total_records += parse.total_records_seen;
        for (kind, count) in &parse.records_by_kind {
            *self.records_by_kind.entry(*kind).or_insert(0) += count;
        }
        self.unknown_records += parse.unknown_records;
        self.corrupt_records += parse.corrupt_records;
    }
}
