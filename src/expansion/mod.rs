//! Record-to-measurement expansion.
//!
//! For one file, every device (PRR) is paired with every position-marked
//! test record (PTR, MPR and optionally FTR), and each test value becomes
//! a row. Everything that does not depend on the device is resolved once
//! per test record before the device loop: cleaned parameter name,
//! parameter ID, marker position and values.

pub mod marker;
pub mod segment;

use self::marker::{Position, clean_param_name, extract_position_marker, has_marker};
use self::segment::{SegmentAssigner, SegmentKey};
use crate::constants::{INVALID_BIN, VALUE_SEPARATOR};
use crate::error::{MarkerError, Result};
use crate::identity::{IdentityMap, ObservedNames};
use crate::models::{
    DeviceRecord, ExpansionStats, FieldValue, FileContext, Measurement, RecordKind, TestRecord,
};
use crate::stdf::{DecodedRecord, RecordStore};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

impl DeviceRecord {
    pub fn from_prr(record: &DecodedRecord) -> Self {
        let fields = &record.fields;
        let part_id = fields.text("PART_ID");
        let device_dmc = if part_id.is_empty() {
            fields.text("PART_TXT")
        } else {
            part_id
        };

        let soft_bin = fields.u64("SOFT_BIN").unwrap_or(INVALID_BIN as u64);
        let bin = if soft_bin == INVALID_BIN as u64 {
            fields.u64("HARD_BIN").unwrap_or(INVALID_BIN as u64)
        } else {
            soft_bin
        };

        Self {
            device_dmc: device_dmc.to_string(),
            bin_code: bin.to_string(),
            default_x: fields.i64("X_COORD").unwrap_or(0) as i32,
            default_y: fields.i64("Y_COORD").unwrap_or(0) as i32,
        }
    }
}

impl TestRecord {
    /// Test view of a PTR, MPR or FTR; `None` for other kinds
    pub fn from_decoded(record: &DecodedRecord) -> Option<Self> {
        if !record.kind.is_test() {
            return None;
        }
        let derived = &record.derived;
        let values = match record
            .fields
            .get("RTN_RSLT")
            .and_then(FieldValue::as_r4_array)
        {
            Some(results) if record.kind == RecordKind::Mpr && !results.is_empty() => {
                results.iter().map(|&r| r as f64).collect()
            }
            _ => text_values(&derived.test_txt, derived.result),
        };

        Some(Self {
            kind: record.kind,
            test_num: derived.test_num,
            head_num: derived.head_num,
            site_num: derived.site_num,
            test_flag: derived.test_flag,
            alarm_id: derived.alarm_id.clone(),
            test_txt: derived.test_txt.clone(),
            units: derived.units.clone(),
            result: derived.result,
            values,
        })
    }
}

/// Comma-separated test text gives one value per non-empty token; a token
/// that is not a number stands for the scalar result
fn text_values(test_txt: &str, result: f64) -> Vec<f64> {
    if !test_txt.contains(VALUE_SEPARATOR) {
        return vec![result];
    }
    let values: Vec<f64> = test_txt
        .split(VALUE_SEPARATOR)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<f64>().unwrap_or(result))
        .collect();
    if values.is_empty() {
        vec![result]
    } else {
        values
    }
}

fn first_non_empty<'a>(primary: &'a str, fallback: &'a str) -> &'a str {
    if primary.is_empty() { fallback } else { primary }
}

impl FileContext {
    pub fn from_mir(record: &DecodedRecord) -> Self {
        let fields = &record.fields;
        let start_time = fields
            .u64("START_T")
            .filter(|&secs| secs != 0)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));

        Self {
            facility: first_non_empty(fields.text("FACIL_ID"), fields.text("FLOOR_ID")).to_string(),
            lot_id: first_non_empty(fields.text("LOT_ID"), fields.text("PART_TYP")).to_string(),
            operation: first_non_empty(fields.text("OPER_NAM"), fields.text("SPEC_NAM"))
                .to_string(),
            equipment: first_non_empty(fields.text("NODE_NAM"), fields.text("JOB_NAM"))
                .to_string(),
            program_name: fields.text("JOB_REV").to_string(),
            program_version: fields.text("SBLOT_ID").to_string(),
            start_time,
        }
    }
}

/// A position-marked test record with device-independent parts resolved
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTest {
    pub test_num: u32,
    pub test_flag: u8,
    pub param_name: String,
    pub units: String,
    /// Marker position; `None` uses each device's default coordinates
    pub position: Option<Position>,
    pub values: Vec<f64>,
}

/// Rows and statistics for one file
#[derive(Debug, Default)]
pub struct Expansion {
    pub rows: Vec<Measurement>,
    pub stats: ExpansionStats,
}

#[derive(Debug, Clone)]
pub struct ExpansionEngine {
    include_functional_tests: bool,
}

impl Default for ExpansionEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ExpansionEngine {
    pub fn new(include_functional_tests: bool) -> Self {
        Self {
            include_functional_tests,
        }
    }

    pub fn includes_functional_tests(&self) -> bool {
        self.include_functional_tests
    }

    fn test_kinds(&self) -> &'static [RecordKind] {
        if self.include_functional_tests {
            &[RecordKind::Ptr, RecordKind::Mpr, RecordKind::Ftr]
        } else {
            &[RecordKind::Ptr, RecordKind::Mpr]
        }
    }

    /// Filter and pre-resolve test records, in file order across kinds.
    ///
    /// Records without a marker count as filtered; records whose marker
    /// cannot be used count as failed. Neither produces a prepared test.
    pub fn prepare_tests(&self, store: &RecordStore, stats: &mut ExpansionStats) -> Vec<PreparedTest> {
        let mut records: Vec<&DecodedRecord> = self
            .test_kinds()
            .iter()
            .flat_map(|&kind| store.get(kind))
            .collect();
        records.sort_by_key(|record| record.file_offset);

        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            stats.test_records += 1;
            let Some(test) = TestRecord::from_decoded(record) else {
                continue;
            };

            let alarm_marked = has_marker(&test.alarm_id);
            if !alarm_marked && !has_marker(&test.test_txt) {
                stats.filtered_tests += 1;
                continue;
            }

            let position = match marker_position(&test) {
                Ok(position) => position,
                Err(e) => {
                    debug!("Skipping test {} at offset {}: {}", test.test_num, record.file_offset, e);
                    stats.failed_tests += 1;
                    continue;
                }
            };
            if test.values.is_empty() {
                stats.failed_tests += 1;
                continue;
            }

            let source = if alarm_marked {
                &test.alarm_id
            } else {
                &test.test_txt
            };
            prepared.push(PreparedTest {
                test_num: test.test_num,
                test_flag: test.test_flag,
                param_name: clean_param_name(source),
                units: test.units,
                position,
                values: test.values,
            });
        }
        prepared
    }

    /// Distinct device and parameter names this file will emit
    pub fn collect_names(&self, store: &RecordStore) -> ObservedNames {
        let mut names = ObservedNames::default();
        if store.count(RecordKind::Prr) == 0 {
            return names;
        }
        let tests = self.prepare_tests(store, &mut ExpansionStats::default());
        if tests.is_empty() {
            return names;
        }
        for record in store.get(RecordKind::Prr) {
            names.devices.insert(DeviceRecord::from_prr(record).device_dmc);
        }
        names.params.extend(tests.into_iter().map(|t| t.param_name));
        names
    }

    /// Emit rows for every device x test x value, device-major.
    ///
    /// Every name must already be in `identities`; a missing one is an
    /// error for the whole file.
    pub fn expand(
        &self,
        store: &RecordStore,
        identities: &IdentityMap,
        file_hash: &Arc<str>,
    ) -> Result<Expansion> {
        let mut stats = ExpansionStats::default();
        let tests = self.prepare_tests(store, &mut stats);
        stats.devices = store.count(RecordKind::Prr) as u64;

        if stats.devices == 0 || tests.is_empty() {
            return Ok(Expansion {
                rows: Vec::new(),
                stats,
            });
        }

        let devices = store
            .get(RecordKind::Prr)
            .iter()
            .map(|record| {
                let device = DeviceRecord::from_prr(record);
                let device_id = identities.resolve_device(&device.device_dmc)?;
                Ok(ResolvedDevice {
                    device_id,
                    device_dmc: Arc::from(device.device_dmc),
                    bin_code: Arc::from(device.bin_code),
                    default_x: device.default_x,
                    default_y: device.default_y,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let tests = tests
            .into_iter()
            .map(|test| {
                let param_id = identities.resolve_param(&test.param_name)?;
                Ok(ResolvedTest {
                    param_id,
                    param_name: Arc::from(test.param_name),
                    units: Arc::from(test.units),
                    test_num: test.test_num,
                    test_flag: test.test_flag,
                    position: test.position.map(|p| p.xy()),
                    values: test.values,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let values_per_device: usize = tests.iter().map(|t| t.values.len()).sum();
        let mut rows = Vec::with_capacity(devices.len() * values_per_device);
        let mut segments = SegmentAssigner::new();

        for device in &devices {
            for test in &tests {
                let (pos_x, pos_y) = test
                    .position
                    .unwrap_or((device.default_x, device.default_y));
                let key = SegmentKey {
                    device_id: device.device_id,
                    param_id: test.param_id,
                    pos_x,
                    pos_y,
                    test_flag: test.test_flag,
                };
                for &value in &test.values {
                    let Some(segment) = segments.next(key) else {
                        stats.dropped_rows += 1;
                        continue;
                    };
                    rows.push(Measurement {
                        device_id: device.device_id,
                        param_id: test.param_id,
                        pos_x,
                        pos_y,
                        value,
                        test_flag: test.test_flag,
                        test_num: test.test_num,
                        segment,
                        device_dmc: Arc::clone(&device.device_dmc),
                        param_name: Arc::clone(&test.param_name),
                        units: Arc::clone(&test.units),
                        bin_code: Arc::clone(&device.bin_code),
                        file_hash: Arc::clone(file_hash),
                    });
                }
            }
        }

        stats.measurements_emitted = rows.len() as u64;
        debug!(
            "Expanded {} rows over {} segment keys",
            rows.len(),
            segments.key_count()
        );
        if stats.dropped_rows > 0 {
            debug!(
                "Dropped {} rows past the segment range",
                stats.dropped_rows
            );
        }
        Ok(Expansion { rows, stats })
    }
}

struct ResolvedDevice {
    device_id: u32,
    device_dmc: Arc<str>,
    bin_code: Arc<str>,
    default_x: i32,
    default_y: i32,
}

struct ResolvedTest {
    param_id: u32,
    param_name: Arc<str>,
    units: Arc<str>,
    test_num: u32,
    test_flag: u8,
    position: Option<(i32, i32)>,
    values: Vec<f64>,
}

/// Marker from `alarm_id`, else from `test_txt`
fn marker_position(test: &TestRecord) -> std::result::Result<Option<Position>, MarkerError> {
    match extract_position_marker(&test.alarm_id)? {
        Some(position) => Ok(Some(position)),
        None => extract_position_marker(&test.test_txt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Discovery, MemoryIdentityStore};
    use crate::stdf::fixture::{StdfBuilder, text};
    use crate::stdf::{RecordStore, parse_reader};
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};
    use std::io::Cursor;
    use tokio_util::sync::CancellationToken;

    fn store_from(builder: StdfBuilder) -> RecordStore {
        parse_reader(
            Cursor::new(builder.build()),
            RecordStore::new(),
            &CancellationToken::new(),
        )
        .unwrap()
        .store
    }

    fn run(engine: &ExpansionEngine, store: &RecordStore) -> Expansion {
        let mut discovery = Discovery::new();
        discovery.observe(engine.collect_names(store));
        let identities = discovery
            .commit(&MemoryIdentityStore::new())
            .unwrap()
            .identities;
        engine
            .expand(store, &identities, &Arc::from("hash"))
            .unwrap()
    }

    #[test]
    fn test_single_ptr_row() {
        let store = store_from(
            StdfBuilder::new()
                .mir("LOT1", 0)
                .prr("DEV1", 5, 7)
                .ptr(10, "TEMP;Pixel=R1C2", "", 3.14),
        );
        let expansion = run(&ExpansionEngine::default(), &store);

        assert_eq!(expansion.rows.len(), 1);
        let row = &expansion.rows[0];
        assert_eq!((row.pos_x, row.pos_y), (2, 1));
        assert_eq!(row.value, 3.14f32 as f64);
        assert_eq!(&*row.param_name, "TEMP");
        assert_eq!(&*row.device_dmc, "DEV1");
        assert_eq!(row.segment, 0);
        assert_eq!(row.test_num, 10);
        assert_eq!(&*row.units, "V");
        assert_eq!(&*row.bin_code, "1");
        assert_eq!(&*row.file_hash, "hash");
        assert_eq!(expansion.stats.measurements_emitted, 1);
    }

    #[test]
    fn test_mpr_values_get_consecutive_segments() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 5, 7)
                .mpr(20, "VOLT;Pixel=R0C0", "", &[1.0, 2.0, 3.0]),
        );
        let expansion = run(&ExpansionEngine::default(), &store);

        let values: Vec<f64> = expansion.rows.iter().map(|r| r.value).collect();
        let segments: Vec<u16> = expansion.rows.iter().map(|r| r.segment).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(segments, vec![0, 1, 2]);
        assert!(expansion.rows.iter().all(|r| (r.pos_x, r.pos_y) == (0, 0)));
    }

    #[test]
    fn test_cross_product_over_devices() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 0, 0)
                .prr("DEV2", 1, 1)
                .ptr(1, "TEMP;Pixel=R3C4", "", 1.0),
        );
        let expansion = run(&ExpansionEngine::default(), &store);

        assert_eq!(expansion.rows.len(), 2);
        assert_eq!(expansion.rows[0].param_id, expansion.rows[1].param_id);
        assert_ne!(expansion.rows[0].device_id, expansion.rows[1].device_id);
        assert!(expansion.rows.iter().all(|r| r.segment == 0));
    }

    #[test]
    fn test_row_count_is_devices_times_values() {
        let store = store_from(
            StdfBuilder::new()
                .prr("D1", 0, 0)
                .prr("D2", 0, 0)
                .prr("D3", 0, 0)
                .ptr(1, "A;Pixel=R1C1", "", 1.0)
                .mpr(2, "B;Pixel=R1C2", "", &[1.0, 2.0])
                .ptr(3, "NOMARK", "", 1.0)
                .ptr(4, "C;Pixel=R2C2", "1,2,3,4", 0.0),
        );
        let expansion = run(&ExpansionEngine::default(), &store);

        assert_eq!(expansion.rows.len(), 3 * (1 + 2 + 4));
        assert_eq!(expansion.stats.filtered_tests, 1);
        assert_eq!(expansion.stats.test_records, 4);
        // device-major ordering
        assert!(expansion.rows[..7].iter().all(|r| &*r.device_dmc == "D1"));
    }

    #[test]
    fn test_unmarked_tests_are_filtered_not_failed() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 5, 7)
                .ptr(1, "TEMP", "plain", 1.0),
        );
        let expansion = run(&ExpansionEngine::default(), &store);
        assert!(expansion.rows.is_empty());
        assert_eq!(expansion.stats.filtered_tests, 1);
        assert_eq!(expansion.stats.failed_tests, 0);
    }

    #[test]
    fn test_incomplete_marker_uses_device_defaults() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 5, 7)
                .ptr(1, "TEMP;Pixel=?", "", 1.0),
        );
        let expansion = run(&ExpansionEngine::default(), &store);
        assert_eq!(expansion.rows.len(), 1);
        assert_eq!((expansion.rows[0].pos_x, expansion.rows[0].pos_y), (5, 7));
        assert_eq!(&*expansion.rows[0].param_name, "TEMP;Pixel=?");
    }

    #[test]
    fn test_overflowing_marker_fails_test() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 5, 7)
                .ptr(1, "TEMP;Pixel=R1C99999999999", "", 1.0)
                .ptr(2, "OK;Pixel=R1C1", "", 1.0),
        );
        let expansion = run(&ExpansionEngine::default(), &store);
        assert_eq!(expansion.rows.len(), 1);
        assert_eq!(expansion.stats.failed_tests, 1);
    }

    #[test]
    fn test_marker_in_test_txt_names_parameter() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 0, 0)
                .ptr(1, "ALARM", "IDD;Pixel=R8C9", 2.5),
        );
        let expansion = run(&ExpansionEngine::default(), &store);
        assert_eq!(&*expansion.rows[0].param_name, "IDD");
        assert_eq!((expansion.rows[0].pos_x, expansion.rows[0].pos_y), (9, 8));
        assert_eq!(expansion.rows[0].value, 2.5);
    }

    #[test]
    fn test_text_values_fall_back_to_result() {
        assert_eq!(text_values("1.5, x ,2.5", 9.0), vec![1.5, 9.0, 2.5]);
        assert_eq!(text_values(" , ,", 4.0), vec![4.0]);
        assert_eq!(text_values("no commas", 4.0), vec![4.0]);
        assert_eq!(text_values("", 4.0), vec![4.0]);
    }

    #[test]
    fn test_repeated_key_segments() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 0, 0)
                .ptr(1, "TEMP;Pixel=R1C1", "", 1.0)
                .ptr(2, "TEMP;Pixel=R1C1", "", 2.0)
                .ptr(3, "TEMP;Pixel=R1C2", "", 3.0),
        );
        let expansion = run(&ExpansionEngine::default(), &store);
        let segments: Vec<u16> = expansion.rows.iter().map(|r| r.segment).collect();
        assert_eq!(segments, vec![0, 1, 0]);
    }

    #[test]
    fn test_ftr_toggle_and_fail_flag() {
        let builder = || {
            StdfBuilder::new()
                .prr("DEV1", 0, 0)
                .ftr(1, "FUNC;Pixel=R1C1", 0x80)
                .ftr(2, "FUNC2;Pixel=R1C1", 0x00)
        };

        let with_ftr = run(&ExpansionEngine::new(true), &store_from(builder()));
        let values: Vec<f64> = with_ftr.rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1.0, 0.0]);
        assert_eq!(with_ftr.rows[0].test_flag, 0x80);

        let without_ftr = run(&ExpansionEngine::new(false), &store_from(builder()));
        assert!(without_ftr.rows.is_empty());
        assert_eq!(without_ftr.stats.test_records, 0);
    }

    #[test]
    fn test_tests_interleave_in_file_order() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 0, 0)
                .mpr(1, "M;Pixel=R1C1", "", &[5.0])
                .ptr(2, "P;Pixel=R1C1", "", 6.0),
        );
        let expansion = run(&ExpansionEngine::default(), &store);
        let nums: Vec<u32> = expansion.rows.iter().map(|r| r.test_num).collect();
        assert_eq!(nums, vec![1, 2]);
    }

    #[test]
    fn test_unresolved_identity_is_an_error() {
        let store = store_from(
            StdfBuilder::new()
                .prr("DEV1", 0, 0)
                .ptr(1, "TEMP;Pixel=R1C1", "", 1.0),
        );
        let result = ExpansionEngine::default().expand(&store, &IdentityMap::default(), &Arc::from("h"));
        assert!(matches!(
            result,
            Err(crate::error::StdfError::UnresolvedIdentity { .. })
        ));
    }

    #[test]
    fn test_no_devices_emits_nothing() {
        let store = store_from(StdfBuilder::new().ptr(1, "TEMP;Pixel=R1C1", "", 1.0));
        let engine = ExpansionEngine::default();
        assert!(engine.collect_names(&store).is_empty());

        let expansion = engine
            .expand(&store, &IdentityMap::default(), &Arc::from("h"))
            .unwrap();
        assert!(expansion.rows.is_empty());
        assert_eq!(expansion.stats.test_records, 1);
    }

    #[test]
    fn test_device_and_context_fallbacks() {
        let store = store_from(
            StdfBuilder::new()
                .mir("LOT7", 1_700_000_000)
                .record(
                    RecordKind::Prr,
                    &[
                        ("HARD_BIN", FieldValue::U2(4)),
                        ("PART_TXT", text("TXT-DMC")),
                        ("X_COORD", FieldValue::I2(-2)),
                    ],
                ),
        );

        let device = DeviceRecord::from_prr(store.first(RecordKind::Prr).unwrap());
        assert_eq!(device.device_dmc, "TXT-DMC");
        assert_eq!(device.bin_code, "4");
        assert_eq!(device.default_x, -2);
        assert_eq!(device.default_y, crate::constants::INVALID_COORD as i32);

        let context = FileContext::from_mir(store.first(RecordKind::Mir).unwrap());
        assert_eq!(context.lot_id, "LOT7");
        assert_eq!(context.facility, "F2");
        assert_eq!(context.equipment, "tester-01");
        assert_eq!(context.program_name, "rev3");
        assert_eq!(
            context.start_time.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[derive(Debug, Clone)]
    enum GeneratedTest {
        Ptr(f32),
        Mpr(Vec<f32>),
        Ftr(u8),
    }

    impl GeneratedTest {
        fn value_count(&self) -> usize {
            match self {
                GeneratedTest::Mpr(results) => results.len(),
                _ => 1,
            }
        }
    }

    fn generated_test() -> impl Strategy<Value = GeneratedTest> {
        prop_oneof![
            (-100.0f32..100.0).prop_map(GeneratedTest::Ptr),
            prop::collection::vec(-100.0f32..100.0, 1..5).prop_map(GeneratedTest::Mpr),
            prop::sample::select(vec![0u8, 0x80]).prop_map(GeneratedTest::Ftr),
        ]
    }

    /// Devices `D0..` at the given coordinates, then the tests in order.
    /// Returns the store, values per device and the unmarked test count.
    fn generated_lot(
        devices: &[(i16, i16)],
        tests: &[(GeneratedTest, Option<(u8, u8)>, u8)],
    ) -> (RecordStore, usize, u64) {
        let mut builder = StdfBuilder::new();
        for (i, &(x, y)) in devices.iter().enumerate() {
            builder = builder.prr(&format!("D{}", i), x, y);
        }

        let mut values_per_device = 0;
        let mut unmarked = 0;
        for (n, (test, marker, param)) in tests.iter().enumerate() {
            let alarm_id = match marker {
                Some((row, col)) => format!("P{};Pixel=R{}C{}", param, row, col),
                None => format!("P{}", param),
            };
            let test_num = n as u32;
            builder = match test {
                GeneratedTest::Ptr(result) => builder.ptr(test_num, &alarm_id, "", *result),
                GeneratedTest::Mpr(results) => builder.mpr(test_num, &alarm_id, "", results),
                GeneratedTest::Ftr(flag) => builder.ftr(test_num, &alarm_id, *flag),
            };
            if marker.is_some() {
                values_per_device += test.value_count();
            } else {
                unmarked += 1;
            }
        }
        (store_from(builder), values_per_device, unmarked)
    }

    proptest! {
        #[test]
        fn prop_rows_are_devices_times_marked_values(
            devices in prop::collection::vec((-5i16..5, -5i16..5), 1..6),
            tests in prop::collection::vec(
                (generated_test(), prop::option::of((0u8..4, 0u8..4)), 0u8..3),
                0..12,
            ),
        ) {
            let (store, values_per_device, unmarked) = generated_lot(&devices, &tests);
            let expansion = run(&ExpansionEngine::default(), &store);

            prop_assert_eq!(expansion.rows.len(), devices.len() * values_per_device);
            prop_assert_eq!(expansion.stats.filtered_tests, unmarked);
            prop_assert_eq!(expansion.stats.failed_tests, 0);
            prop_assert_eq!(expansion.stats.test_records, tests.len() as u64);
            prop_assert_eq!(expansion.stats.dropped_rows, 0);
        }

        #[test]
        fn prop_keys_with_segment_are_unique_and_dense(
            devices in prop::collection::vec((-5i16..5, -5i16..5), 1..6),
            tests in prop::collection::vec(
                (generated_test(), prop::option::of((0u8..2, 0u8..2)), 0u8..2),
                0..12,
            ),
        ) {
            let (store, _, _) = generated_lot(&devices, &tests);
            let expansion = run(&ExpansionEngine::default(), &store);

            let mut seen = HashSet::new();
            let mut segments: HashMap<_, Vec<u16>> = HashMap::new();
            for row in &expansion.rows {
                let key = (row.device_id, row.param_id, row.pos_x, row.pos_y, row.test_flag);
                prop_assert!(seen.insert((key, row.segment)), "duplicate row {:?}", row);
                segments.entry(key).or_default().push(row.segment);
            }
            // Segments of a key count up from zero in emission order
            for (key, assigned) in segments {
                let expected: Vec<u16> = (0..assigned.len() as u16).collect();
                prop_assert_eq!(assigned, expected, "key {:?}", key);
            }
        }

        #[test]
        fn prop_rows_are_device_major(
            devices in prop::collection::vec((-5i16..5, -5i16..5), 1..6),
            tests in prop::collection::vec(
                (generated_test(), prop::option::of((0u8..4, 0u8..4)), 0u8..3),
                1..12,
            ),
        ) {
            let (store, values_per_device, _) = generated_lot(&devices, &tests);
            let expansion = run(&ExpansionEngine::default(), &store);
            prop_assume!(values_per_device > 0);

            for (i, block) in expansion.rows.chunks(values_per_device).enumerate() {
                let dmc = format!("D{}", i);
                prop_assert!(block.iter().all(|r| *r.device_dmc == *dmc));
                let nums: Vec<u32> = block.iter().map(|r| r.test_num).collect();
                let mut sorted = nums.clone();
                sorted.sort_unstable();
                prop_assert_eq!(nums, sorted);
            }
        }
    }
}
