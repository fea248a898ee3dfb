//! STDF V4 parsing: record reader, classifier, schema-driven decoder and
//! the per-file record store.
//!
//! [`parse_reader`] drives the four together for one byte stream and
//! reports per-kind counts alongside the stored records.

pub mod classifier;
pub mod decoder;
pub mod reader;
pub mod schema;
pub mod store;

#[cfg(test)]
pub(crate) mod fixture;

pub use classifier::classify;
pub use decoder::{DecodedFields, DecodedRecord, Derived, decode};
pub use reader::RecordReader;
pub use schema::{FieldSpec, FieldType, RecordSchema, schema_for};
pub use store::RecordStore;

use crate::constants::STDF_VERSION;
use crate::error::{ReadError, Result, StdfError};
use crate::models::{FileStats, RecordKind};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Kinds the measurement pipeline reads back from the store
pub const EXPANSION_KINDS: &[RecordKind] = &[
    RecordKind::Mir,
    RecordKind::Prr,
    RecordKind::Ptr,
    RecordKind::Mpr,
    RecordKind::Ftr,
];

/// Decoded records of one file plus what was seen while reading it
#[derive(Debug)]
pub struct ParsedFile {
    pub store: RecordStore,
    pub stats: FileStats,
}

/// Parse an STDF file from disk
pub fn parse_file(path: &Path, store: RecordStore, cancel: &CancellationToken) -> Result<ParsedFile> {
    let mut reader = BufReader::new(File::open(path)?);
    parse_reader(&mut reader, store, cancel)
}

/// Read, classify and decode every record of `reader` into `store`.
///
/// Truncation ends the file early but keeps what was read; a record whose
/// fields overrun its payload is discarded and counted as corrupt. The
/// token is checked between records only.
pub fn parse_reader<R: Read>(
    reader: R,
    mut store: RecordStore,
    cancel: &CancellationToken,
) -> Result<ParsedFile> {
    let start = Instant::now();
    let mut records = RecordReader::new(reader);
    let mut stats = FileStats::default();

    loop {
        if cancel.is_cancelled() {
            return Err(StdfError::Cancelled);
        }
        let Some(item) = records.next() else {
            break;
        };

        let raw = match item {
            Ok(raw) => raw,
            Err(ReadError::Truncated {
                offset,
                needed,
                available,
            }) => {
                warn!(
                    "File truncated at offset {}: record needs {} bytes, {} available",
                    offset, needed, available
                );
                stats.truncated_at = Some(offset);
                break;
            }
            Err(ReadError::Io { source, .. }) => return Err(StdfError::Io(source)),
        };

        stats.total_records_seen += 1;
        let kind = classify(raw.type_byte, raw.subtype_byte);
        *stats.records_by_kind.entry(kind).or_insert(0) += 1;

        let Some(schema) = schema_for(kind) else {
            stats.unknown_records += 1;
            continue;
        };

        match decode(&raw.payload, schema, records.byte_order()) {
            Ok(fields) => {
                if kind == RecordKind::Far {
                    let version = fields.u64("STDF_VER");
                    if version.is_some_and(|v| v != u64::from(STDF_VERSION)) {
                        warn!(
                            "FAR declares STDF version {:?}, decoding as V{}",
                            version, STDF_VERSION
                        );
                    }
                }
                store.add(DecodedRecord::new(kind, raw.file_offset, fields));
            }
            Err(e) => {
                stats.corrupt_records += 1;
                debug!(
                    "Discarding corrupt {} record at offset {}: {}",
                    kind, raw.file_offset, e
                );
            }
        }
    }

    stats.byte_order = records.byte_order();
    stats.parse_duration = start.elapsed();

    debug!(
        "Parsed {} records ({} unknown, {} corrupt) in {:?}: {}",
        stats.total_records_seen,
        stats.unknown_records,
        stats.corrupt_records,
        stats.parse_duration,
        stats
            .records_by_kind
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(" ")
    );

    Ok(ParsedFile { store, stats })
}
