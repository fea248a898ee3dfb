//! Per-file accumulation of decoded records, grouped by kind.

use super::decoder::DecodedRecord;
use crate::models::RecordKind;

use std::collections::{HashMap, HashSet};

/// Decoded records of one file, in file order within each kind.
///
/// A store built with [`RecordStore::retaining`] keeps only the listed
/// kinds; everything else is dropped on `add`.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: HashMap<RecordKind, Vec<DecodedRecord>>,
    retain: Option<HashSet<RecordKind>>,
    total: usize,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that keeps only `kinds`
    pub fn retaining(kinds: &[RecordKind]) -> Self {
        Self {
            retain: Some(kinds.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn retains(&self, kind: RecordKind) -> bool {
        self.retain.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }

    /// Add a record; returns false when its kind is not retained
    pub fn add(&mut self, record: DecodedRecord) -> bool {
        if !self.retains(record.kind) {
            return false;
        }
        self.records.entry(record.kind).or_default().push(record);
        self.total += 1;
        true
    }

    pub fn get(&self, kind: RecordKind) -> &[DecodedRecord] {
        self.records.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First record of a kind, for once-per-file records such as MIR
    pub fn first(&self, kind: RecordKind) -> Option<&DecodedRecord> {
        self.get(kind).first()
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.get(kind).len()
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}
