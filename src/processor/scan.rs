//! Discovery scan: the first of the two processing phases.
//!
//! Each file is parsed once to hash its bytes and collect the device and
//! parameter names it would emit. No IDs are minted here; the caller
//! commits all names of all files in one serialized step afterwards.

use super::writer::MeasurementSink;
use crate::error::Result;
use crate::expansion::ExpansionEngine;
use crate::identity::ObservedNames;
use crate::models::FileStats;
use crate::stdf::{self, EXPANSION_KINDS, RecordStore};

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reader that hashes every byte passing through it
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consume the rest of the stream and return the lowercase hex digest
    pub fn finish(mut self) -> io::Result<String> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(hex::encode(self.hasher.finalize()))
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// SHA-256 of a whole file, hex encoded
pub fn hash_file(path: &Path) -> Result<String> {
    let reader = HashingReader::new(BufReader::new(File::open(path)?));
    Ok(reader.finish()?)
}

/// What the scan learned about one file
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub file_hash: String,
    pub names: ObservedNames,
    pub stats: FileStats,
    /// The sink already holds this hash
    pub already_processed: bool,
}

/// Parse one file, hash it and collect the names it would emit.
///
/// When `skip_processed` is set and the sink already holds the hash, the
/// file's names are left out so nothing is minted for it.
pub fn scan_file(
    path: &Path,
    engine: &ExpansionEngine,
    sink: &dyn MeasurementSink,
    skip_processed: bool,
    cancel: &CancellationToken,
) -> Result<ScannedFile> {
    let mut reader = HashingReader::new(BufReader::new(File::open(path)?));
    let parsed = stdf::parse_reader(
        &mut reader,
        RecordStore::retaining(EXPANSION_KINDS),
        cancel,
    )?;
    let file_hash = reader.finish()?;

    let already_processed = skip_processed && sink.contains(&file_hash)?;
    let names = if already_processed {
        debug!("Already processed: {} ({})", path.display(), file_hash);
        ObservedNames::default()
    } else {
        engine.collect_names(&parsed.store)
    };

    Ok(ScannedFile {
        path: path.to_path_buf(),
        file_hash,
        names,
        stats: parsed.stats,
        already_processed,
    })
}
