//! Schema-driven field decoding.
//!
//! A single routine walks a record payload in schema order. When the
//! payload ends before the schema does, the remaining fields take their
//! missing-value sentinels; a field that starts but cannot finish is a
//! `DecodeError::FieldOverrun`.

use super::classifier::classify;
use super::schema::{FieldSpec, FieldType, RecordSchema, schema_for};
use crate::constants::TEST_FLG_FAILED;
use crate::error::DecodeError;
use crate::models::{ByteOrder, FieldValue, RawRecord, RecordKind};

/// Field values of one record, parallel to its schema
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFields {
    schema: &'static RecordSchema,
    values: Vec<FieldValue>,
    present: usize,
}

impl DecodedFields {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// True when the field was read from the payload rather than defaulted
    pub fn is_present(&self, name: &str) -> bool {
        self.schema.index_of(name).is_some_and(|i| i < self.present)
    }

    /// Number of leading fields read from the payload
    pub fn present_count(&self) -> usize {
        self.present
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.schema
            .fields
            .iter()
            .map(|spec| spec.name)
            .zip(self.values.iter())
    }

    /// Text field, empty when absent or not text
    pub fn text(&self, name: &str) -> &str {
        self.get(name).and_then(FieldValue::as_str).unwrap_or("")
    }

    pub fn u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(FieldValue::as_u64)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }
}

/// Fields several consumers need by stable name regardless of kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derived {
    pub test_num: u32,
    pub head_num: u8,
    pub site_num: u8,
    pub test_flag: u8,
    pub alarm_id: String,
    pub test_txt: String,
    pub units: String,
    pub result: f64,
}

impl Derived {
    fn from_fields(kind: RecordKind, fields: &DecodedFields) -> Self {
        let test_flag = fields.u64("TEST_FLG").unwrap_or(0) as u8;
        let result = match kind {
            RecordKind::Ptr => fields.f64("RESULT").unwrap_or(0.0),
            RecordKind::Mpr => fields
                .get("RTN_RSLT")
                .and_then(FieldValue::as_r4_array)
                .and_then(|results| results.first())
                .map(|&r| r as f64)
                .unwrap_or(0.0),
            RecordKind::Ftr => {
                if test_flag & TEST_FLG_FAILED != 0 {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        let test_txt = match kind {
            RecordKind::Tsr => fields.text("TEST_NAM"),
            _ => fields.text("TEST_TXT"),
        };

        Self {
            test_num: fields.u64("TEST_NUM").unwrap_or(0) as u32,
            head_num: fields.u64("HEAD_NUM").unwrap_or(0) as u8,
            site_num: fields.u64("SITE_NUM").unwrap_or(0) as u8,
            test_flag,
            alarm_id: fields.text("ALARM_ID").to_string(),
            test_txt: test_txt.to_string(),
            units: fields.text("UNITS").to_string(),
            result,
        }
    }
}

/// A decoded record, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub kind: RecordKind,
    pub file_offset: u64,
    pub fields: DecodedFields,
    pub derived: Derived,
}

impl DecodedRecord {
    pub fn new(kind: RecordKind, file_offset: u64, fields: DecodedFields) -> Self {
        let derived = Derived::from_fields(kind, &fields);
        Self {
            kind,
            file_offset,
            fields,
            derived,
        }
    }

    /// Classify and decode a raw record; `Ok(None)` for unknown kinds
    pub fn from_raw(raw: &RawRecord, order: ByteOrder) -> Result<Option<Self>, DecodeError> {
        let kind = classify(raw.type_byte, raw.subtype_byte);
        let Some(schema) = schema_for(kind) else {
            return Ok(None);
        };
        let fields = decode(&raw.payload, schema, order)?;
        Ok(Some(Self::new(kind, raw.file_offset, fields)))
    }
}

/// Decode `payload` field by field in schema order
pub fn decode(
    payload: &[u8],
    schema: &'static RecordSchema,
    order: ByteOrder,
) -> Result<DecodedFields, DecodeError> {
    let mut cursor = Cursor {
        buf: payload,
        pos: 0,
        order,
    };
    let mut values = Vec::with_capacity(schema.fields.len());
    let mut present = schema.fields.len();

    for (index, spec) in schema.fields.iter().enumerate() {
        if cursor.is_empty() {
            present = index;
            values.extend(schema.fields[index..].iter().map(FieldSpec::sentinel));
            break;
        }
        let value = decode_field(&mut cursor, spec, schema, &values)?;
        values.push(value);
    }

    Ok(DecodedFields {
        schema,
        values,
        present,
    })
}

fn decode_field(
    cursor: &mut Cursor<'_>,
    spec: &FieldSpec,
    schema: &RecordSchema,
    decoded: &[FieldValue],
) -> Result<FieldValue, DecodeError> {
    let name = spec.name;
    let value = match spec.ty {
        FieldType::U1 | FieldType::B1 => FieldValue::U1(cursor.u1(name)?),
        FieldType::U2 => FieldValue::U2(cursor.u2(name)?),
        FieldType::U4 => FieldValue::U4(cursor.u4(name)?),
        FieldType::I1 => FieldValue::I1(cursor.u1(name)? as i8),
        FieldType::I2 => FieldValue::I2(cursor.i2(name)?),
        FieldType::I4 => FieldValue::I4(cursor.i4(name)?),
        FieldType::R4 => FieldValue::R4(cursor.r4(name)?),
        FieldType::R8 => FieldValue::R8(cursor.r8(name)?),
        FieldType::C1 => FieldValue::Char(cursor.u1(name)?),
        FieldType::Cn => {
            let len = cursor.u1(name)? as usize;
            let bytes = cursor.take(name, len)?;
            FieldValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        FieldType::Bn => {
            let len = cursor.u1(name)? as usize;
            FieldValue::Bytes(cursor.take(name, len)?.to_vec())
        }
        FieldType::Dn => {
            let bit_count = cursor.u2(name)?;
            let bytes = cursor.take(name, (bit_count as usize).div_ceil(8))?;
            FieldValue::Bits {
                bit_count,
                bytes: bytes.to_vec(),
            }
        }
        FieldType::U1Array => {
            let count = element_count(spec, schema, decoded)?;
            FieldValue::U1Array(cursor.take(name, count)?.to_vec())
        }
        FieldType::U2Array => {
            let count = element_count(spec, schema, decoded)?;
            cursor.require(name, count * 2)?;
            let items = (0..count)
                .map(|_| cursor.u2(name))
                .collect::<Result<_, _>>()?;
            FieldValue::U2Array(items)
        }
        FieldType::R4Array => {
            let count = element_count(spec, schema, decoded)?;
            cursor.require(name, count * 4)?;
            let items = (0..count)
                .map(|_| cursor.r4(name))
                .collect::<Result<_, _>>()?;
            FieldValue::R4Array(items)
        }
        FieldType::N1Array => {
            let count = element_count(spec, schema, decoded)?;
            let packed = cursor.take(name, count.div_ceil(2))?;
            let nibbles = (0..count)
                .map(|i| {
                    let byte = packed[i / 2];
                    if i % 2 == 0 { byte & 0x0F } else { byte >> 4 }
                })
                .collect();
            FieldValue::Nibbles(nibbles)
        }
    };
    Ok(value)
}

/// Element count of an array field, read from its earlier count field
fn element_count(
    spec: &FieldSpec,
    schema: &RecordSchema,
    decoded: &[FieldValue],
) -> Result<usize, DecodeError> {
    let invalid = || DecodeError::InvalidCount {
        field: spec.name,
        count_field: spec.count_field.unwrap_or(""),
    };
    let count_field = spec.count_field.ok_or_else(invalid)?;
    let index = schema.index_of(count_field).ok_or_else(invalid)?;
    decoded
        .get(index)
        .and_then(FieldValue::as_u64)
        .map(|count| count as usize)
        .ok_or_else(invalid)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

macro_rules! read_fixed {
    ($name:ident, $ty:ty, $width:expr) => {
        fn $name(&mut self, field: &'static str) -> Result<$ty, DecodeError> {
            let bytes: [u8; $width] = self.fixed(field)?;
            Ok(match self.order {
                ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                ByteOrder::Big => <$ty>::from_be_bytes(bytes),
            })
        }
    };
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn require(&self, field: &'static str, needed: usize) -> Result<(), DecodeError> {
        if needed > self.remaining() {
            return Err(DecodeError::FieldOverrun {
                field,
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        self.require(field, len)?;
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn fixed<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    fn u1(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    read_fixed!(u2, u16, 2);
    read_fixed!(u4, u32, 4);
    read_fixed!(i2, i16, 2);
    read_fixed!(i4, i32, 4);
    read_fixed!(r4, f32, 4);
    read_fixed!(r8, f64, 8);
}
