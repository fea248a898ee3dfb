//! Record-level reader for STDF byte streams.
//!
//! Splits a stream into `RawRecord`s. Each record is a 4-byte header
//! (`REC_LEN` u16, `REC_TYP` u8, `REC_SUB` u8) followed by exactly
//! `REC_LEN` payload bytes; the length never includes the header itself.

use crate::constants::{FAR_PAYLOAD_LEN, RECORD_HEADER_LEN, cpu_type, record_types};
use crate::error::ReadError;
use crate::models::{ByteOrder, RawRecord};

use std::io::{self, Read};

/// Forward-only iterator over the records of one STDF stream.
///
/// Yields `Err(ReadError::Truncated)` once if the stream ends inside a
/// record, then stops. Records yielded before that point stay valid.
pub struct RecordReader<R> {
    inner: R,
    order: ByteOrder,
    detect_order: bool,
    offset: u64,
    finished: bool,
}

impl<R: Read> RecordReader<R> {
    /// Reader that detects byte order from a leading FAR
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            order: ByteOrder::Little,
            detect_order: true,
            offset: 0,
            finished: false,
        }
    }

    /// Reader with a fixed byte order, ignoring the FAR
    pub fn with_byte_order(inner: R, order: ByteOrder) -> Self {
        Self {
            detect_order: false,
            order,
            ..Self::new(inner)
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Offset of the next record header
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_record(&mut self) -> Result<Option<RawRecord>, ReadError> {
        let record_offset = self.offset;

        let mut header = [0u8; RECORD_HEADER_LEN];
        let filled = read_fully(&mut self.inner, &mut header).map_err(|source| ReadError::Io {
            offset: record_offset,
            source,
        })?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_HEADER_LEN {
            return Err(ReadError::Truncated {
                offset: record_offset,
                needed: RECORD_HEADER_LEN,
                available: filled,
            });
        }

        let type_byte = header[2];
        let subtype_byte = header[3];
        let is_far = (type_byte, subtype_byte) == record_types::FAR;

        if self.detect_order && record_offset == 0 && is_far {
            self.order = detect_from_far_length([header[0], header[1]]).unwrap_or(self.order);
        }

        let length = match self.order {
            ByteOrder::Little => u16::from_le_bytes([header[0], header[1]]),
            ByteOrder::Big => u16::from_be_bytes([header[0], header[1]]),
        } as usize;

        let mut payload = vec![0u8; length];
        let filled = read_fully(&mut self.inner, &mut payload).map_err(|source| ReadError::Io {
            offset: record_offset,
            source,
        })?;
        if filled < length {
            return Err(ReadError::Truncated {
                offset: record_offset,
                needed: RECORD_HEADER_LEN + length,
                available: RECORD_HEADER_LEN + filled,
            });
        }

        if self.detect_order && record_offset == 0 && is_far {
            match payload.first() {
                Some(&cpu_type::BIG_ENDIAN) => self.order = ByteOrder::Big,
                Some(&cpu_type::LITTLE_ENDIAN) => self.order = ByteOrder::Little,
                _ => {}
            }
        }

        self.offset += (RECORD_HEADER_LEN + length) as u64;

        Ok(Some(RawRecord {
            type_byte,
            subtype_byte,
            payload,
            file_offset: record_offset,
        }))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<RawRecord, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for RecordReader<R> {}

/// The FAR payload is always 2 bytes, so its length field reveals the order
fn detect_from_far_length(bytes: [u8; 2]) -> Option<ByteOrder> {
    if u16::from_le_bytes(bytes) == FAR_PAYLOAD_LEN {
        Some(ByteOrder::Little)
    } else if u16::from_be_bytes(bytes) == FAR_PAYLOAD_LEN {
        Some(ByteOrder::Big)
    } else {
        None
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
