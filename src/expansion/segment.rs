//! Per-file segment numbering for repeated measurement keys.

use std::collections::HashMap;

/// Key whose repeats within one file are told apart by `segment`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub device_id: u32,
    pub param_id: u32,
    pub pos_x: i32,
    pub pos_y: i32,
    pub test_flag: u8,
}

/// Hands out 0, 1, 2, ... per key, in call order
#[derive(Debug, Default)]
pub struct SegmentAssigner {
    counters: HashMap<SegmentKey, u32>,
}

impl SegmentAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next segment for `key`; `None` once the key has used every `u16`
    pub fn next(&mut self, key: SegmentKey) -> Option<u16> {
        let counter = self.counters.entry(key).or_insert(0);
        let segment = u16::try_from(*counter).ok();
        if segment.is_some() {
            *counter += 1;
        }
        segment
    }

    /// Distinct keys seen so far
    pub fn key_count(&self) -> usize {
        self.counters.len()
    }
}
