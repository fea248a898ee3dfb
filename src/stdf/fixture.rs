//! Synthetic STDF byte streams for tests.

use super::classifier::type_pair;
use super::schema::{FieldType, RecordSchema, schema_for};
use crate::constants::cpu_type;
use crate::models::{ByteOrder, FieldValue, RecordKind};

use std::path::Path;

/// Deterministic values for every field of a schema; array counts are 3
pub(crate) fn sample_values(schema: &RecordSchema) -> Vec<FieldValue> {
    const COUNT: u8 = 3;
    schema
        .fields
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let is_count = schema
                .fields
                .iter()
                .any(|f| f.count_field == Some(spec.name));
            let n = i as u8 + 1;
            match spec.ty {
                FieldType::U1 | FieldType::B1 => FieldValue::U1(if is_count { COUNT } else { n }),
                FieldType::U2 => FieldValue::U2(if is_count { COUNT as u16 } else { 1000 + i as u16 }),
                FieldType::U4 => FieldValue::U4(if is_count { COUNT as u32 } else { 100_000 + i as u32 }),
                FieldType::I1 => FieldValue::I1(-(n as i8)),
                FieldType::I2 => FieldValue::I2(-300 - i as i16),
                FieldType::I4 => FieldValue::I4(-70_000 - i as i32),
                FieldType::R4 => FieldValue::R4(i as f32 + 0.25),
                FieldType::R8 => FieldValue::R8(i as f64 + 0.125),
                FieldType::C1 => FieldValue::Char(b'A' + (i % 26) as u8),
                FieldType::Cn => FieldValue::Text(format!("{}_{}", spec.name, i)),
                FieldType::Bn => FieldValue::Bytes(vec![n, n.wrapping_add(1)]),
                FieldType::Dn => FieldValue::Bits {
                    bit_count: 10,
                    bytes: vec![0xAB, 0x03],
                },
                FieldType::U1Array => FieldValue::U1Array(vec![1, 2, 3]),
                FieldType::U2Array => FieldValue::U2Array(vec![10, 20, 30]),
                FieldType::R4Array => FieldValue::R4Array(vec![1.0, 2.0, 3.0]),
                FieldType::N1Array => FieldValue::Nibbles(vec![1, 2, 3]),
            }
        })
        .collect()
}

/// Encode values back to back, as a payload
pub(crate) fn encode_fields(values: &[FieldValue], order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        encode_value(&mut out, value, order);
    }
    out
}

fn push<const N: usize>(out: &mut Vec<u8>, le: [u8; N], be: [u8; N], order: ByteOrder) {
    match order {
        ByteOrder::Little => out.extend_from_slice(&le),
        ByteOrder::Big => out.extend_from_slice(&be),
    }
}

fn encode_value(out: &mut Vec<u8>, value: &FieldValue, order: ByteOrder) {
    match value {
        FieldValue::U1(v) => out.push(*v),
        FieldValue::U2(v) => push(out, v.to_le_bytes(), v.to_be_bytes(), order),
        FieldValue::U4(v) => push(out, v.to_le_bytes(), v.to_be_bytes(), order),
        FieldValue::I1(v) => out.push(*v as u8),
        FieldValue::I2(v) => push(out, v.to_le_bytes(), v.to_be_bytes(), order),
        FieldValue::I4(v) => push(out, v.to_le_bytes(), v.to_be_bytes(), order),
        FieldValue::R4(v) => push(out, v.to_le_bytes(), v.to_be_bytes(), order),
        FieldValue::R8(v) => push(out, v.to_le_bytes(), v.to_be_bytes(), order),
        FieldValue::Char(c) => out.push(*c),
        FieldValue::Text(s) => {
            assert!(s.len() <= 255, "Cn field longer than 255 bytes");
            out.push(s.len() as u8);
            out.extend_from_slice(s.as_bytes());
        }
        FieldValue::Bytes(b) => {
            out.push(b.len() as u8);
            out.extend_from_slice(b);
        }
        FieldValue::Bits { bit_count, bytes } => {
            push(out, bit_count.to_le_bytes(), bit_count.to_be_bytes(), order);
            out.extend_from_slice(bytes);
        }
        FieldValue::U1Array(items) => out.extend_from_slice(items),
        FieldValue::U2Array(items) => {
            for v in items {
                push(out, v.to_le_bytes(), v.to_be_bytes(), order);
            }
        }
        FieldValue::R4Array(items) => {
            for v in items {
                push(out, v.to_le_bytes(), v.to_be_bytes(), order);
            }
        }
        FieldValue::Nibbles(items) => {
            for pair in items.chunks(2) {
                let high = pair.get(1).map_or(0, |h| h << 4);
                out.push((pair[0] & 0x0F) | high);
            }
        }
    }
}

/// Builds a complete STDF file record by record, starting with a FAR
pub(crate) struct StdfBuilder {
    order: ByteOrder,
    bytes: Vec<u8>,
}

impl StdfBuilder {
    pub(crate) fn new() -> Self {
        Self::with_order(ByteOrder::Little)
    }

    pub(crate) fn big_endian() -> Self {
        Self::with_order(ByteOrder::Big)
    }

    fn with_order(order: ByteOrder) -> Self {
        let cpu = match order {
            ByteOrder::Little => cpu_type::LITTLE_ENDIAN,
            ByteOrder::Big => cpu_type::BIG_ENDIAN,
        };
        Self {
            order,
            bytes: Vec::new(),
        }
        .record(
            RecordKind::Far,
            &[("CPU_TYPE", FieldValue::U1(cpu)), ("STDF_VER", FieldValue::U1(4))],
        )
    }

    /// Header plus an arbitrary payload
    pub(crate) fn raw(mut self, type_byte: u8, subtype_byte: u8, payload: &[u8]) -> Self {
        let len = payload.len() as u16;
        push(&mut self.bytes, len.to_le_bytes(), len.to_be_bytes(), self.order);
        self.bytes.push(type_byte);
        self.bytes.push(subtype_byte);
        self.bytes.extend_from_slice(payload);
        self
    }

    /// Every schema field encoded, sentinels except for `fields`
    pub(crate) fn record(self, kind: RecordKind, fields: &[(&str, FieldValue)]) -> Self {
        let schema = schema_for(kind).expect("kind has a schema");
        let mut values: Vec<_> = schema.fields.iter().map(|f| f.sentinel()).collect();
        for (name, value) in fields {
            let index = schema
                .index_of(name)
                .unwrap_or_else(|| panic!("{} has no field {}", kind, name));
            values[index] = value.clone();
        }
        let payload = encode_fields(&values, self.order);
        let (typ, sub) = type_pair(kind).expect("kind has a type pair");
        self.raw(typ, sub, &payload)
    }

    pub(crate) fn mir(self, lot_id: &str, start_t: u32) -> Self {
        self.record(
            RecordKind::Mir,
            &[
                ("START_T", FieldValue::U4(start_t)),
                ("LOT_ID", text(lot_id)),
                ("NODE_NAM", text("tester-01")),
                ("JOB_REV", text("rev3")),
                ("FLOOR_ID", text("F2")),
            ],
        )
    }

    pub(crate) fn prr(self, device_dmc: &str, x: i16, y: i16) -> Self {
        self.record(
            RecordKind::Prr,
            &[
                ("HARD_BIN", FieldValue::U2(1)),
                ("SOFT_BIN", FieldValue::U2(1)),
                ("X_COORD", FieldValue::I2(x)),
                ("Y_COORD", FieldValue::I2(y)),
                ("PART_ID", text(device_dmc)),
            ],
        )
    }

    pub(crate) fn ptr(self, test_num: u32, alarm_id: &str, test_txt: &str, result: f32) -> Self {
        self.record(
            RecordKind::Ptr,
            &[
                ("TEST_NUM", FieldValue::U4(test_num)),
                ("RESULT", FieldValue::R4(result)),
                ("TEST_TXT", text(test_txt)),
                ("ALARM_ID", text(alarm_id)),
                ("UNITS", text("V")),
            ],
        )
    }

    pub(crate) fn mpr(self, test_num: u32, alarm_id: &str, test_txt: &str, results: &[f32]) -> Self {
        self.record(
            RecordKind::Mpr,
            &[
                ("TEST_NUM", FieldValue::U4(test_num)),
                ("RSLT_CNT", FieldValue::U2(results.len() as u16)),
                ("RTN_RSLT", FieldValue::R4Array(results.to_vec())),
                ("TEST_TXT", text(test_txt)),
                ("ALARM_ID", text(alarm_id)),
                ("UNITS", text("V")),
            ],
        )
    }

    pub(crate) fn ftr(self, test_num: u32, alarm_id: &str, test_flag: u8) -> Self {
        self.record(
            RecordKind::Ftr,
            &[
                ("TEST_NUM", FieldValue::U4(test_num)),
                ("TEST_FLG", FieldValue::U1(test_flag)),
                ("ALARM_ID", text(alarm_id)),
            ],
        )
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn write_to(self, path: &Path) {
        std::fs::write(path, self.bytes).expect("write fixture file");
    }
}

pub(crate) fn text(s: &str) -> FieldValue {
    FieldValue::Text(s.to_string())
}
