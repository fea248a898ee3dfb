//! Integration tests for the processor module
//!
//! Runs the whole two-phase pipeline over synthetic STDF lots on disk.


use crate::config::MeasureConfig;
use crate::processor::BatchProcessor;
use crate::processor::writer::{MeasurementSink, MemorySink};
use crate::stdf::fixture::StdfBuilder;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Create `<temp>/lots`, the directory test lots are written into
pub fn create_lot_dir(temp_dir: &TempDir) -> PathBuf {
    let lot_dir = temp_dir.path().join("lots");
    fs::create_dir_all(&lot_dir).unwrap();
    lot_dir
}

pub fn write_stdf(dir: &Path, name: &str, builder: StdfBuilder) -> PathBuf {
    let path = dir.join(name);
    builder.write_to(&path);
    path
}

/// A typical lot: two devices, a PTR, an MPR and one unmarked test
pub fn sample_lot(lot_id: &str, devices: &[&str]) -> StdfBuilder {
    let mut builder = StdfBuilder::new().mir(lot_id, 1_700_000_000);
    for (i, device) in devices.iter().enumerate() {
        builder = builder.prr(device, i as i16, 0);
    }
    builder
        .ptr(1, "TEMP;Pixel=R1C2", "", 25.0)
        .mpr(2, "VOLT;Pixel=R0C0", "", &[1.0, 2.0, 3.0])
        .ptr(3, "CONTINUITY", "", 0.5)
}

/// Processor over `input` writing to a memory sink
pub fn memory_processor(input: &Path, config: MeasureConfig) -> (BatchProcessor, Arc<MemorySink>) {
    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn MeasurementSink> = memory.clone();
    let processor = BatchProcessor::new(input.to_path_buf(), None)
        .unwrap()
        .with_config(config)
        .unwrap()
        .with_sink(sink);
    (processor, memory)
}
