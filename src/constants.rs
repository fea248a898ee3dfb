//! Application constants for the STDF measurement pipeline
//!
//! Record type codes, field sentinels, marker patterns and processing
//! defaults used throughout the crate.

// =============================================================================
// Record Header Layout
// =============================================================================

/// Bytes occupied by the record header (REC_LEN u16, REC_TYP u8, REC_SUB u8)
pub const RECORD_HEADER_LEN: usize = 4;

/// FAR payload length; always 2 (CPU_TYPE, STDF_VER)
pub const FAR_PAYLOAD_LEN: u16 = 2;

/// STDF version this crate decodes
pub const STDF_VERSION: u8 = 4;

/// FAR CPU_TYPE values selecting the byte order of the file
pub mod cpu_type {
    /// Sun / Motorola 68k, big-endian
    pub const BIG_ENDIAN: u8 = 1;

    /// x86 / PC, little-endian
    pub const LITTLE_ENDIAN: u8 = 2;
}

// =============================================================================
// Record Type Codes (REC_TYP, REC_SUB)
// =============================================================================

/// `(REC_TYP, REC_SUB)` pairs as assigned by STDF V4
pub mod record_types {
    pub const FAR: (u8, u8) = (0, 10);
    pub const ATR: (u8, u8) = (0, 20);
    pub const MIR: (u8, u8) = (1, 10);
    pub const MRR: (u8, u8) = (1, 20);
    pub const PCR: (u8, u8) = (1, 30);
    pub const HBR: (u8, u8) = (1, 40);
    pub const SBR: (u8, u8) = (1, 50);
    pub const PMR: (u8, u8) = (1, 60);
    pub const PGR: (u8, u8) = (1, 62);
    pub const PLR: (u8, u8) = (1, 63);
    pub const RDR: (u8, u8) = (1, 70);
    pub const SDR: (u8, u8) = (1, 80);
    pub const WIR: (u8, u8) = (2, 10);
    pub const WRR: (u8, u8) = (2, 20);
    pub const WCR: (u8, u8) = (2, 30);
    pub const PIR: (u8, u8) = (5, 10);
    pub const PRR: (u8, u8) = (5, 20);
    pub const TSR: (u8, u8) = (10, 30);
    pub const PTR: (u8, u8) = (15, 10);
    pub const MPR: (u8, u8) = (15, 15);
    pub const FTR: (u8, u8) = (15, 20);
    pub const BPS: (u8, u8) = (20, 10);
    pub const EPS: (u8, u8) = (20, 20);
    pub const GDR: (u8, u8) = (50, 10);
    pub const DTR: (u8, u8) = (50, 30);
}

// =============================================================================
// Field Sentinels
// =============================================================================

/// Invalid bin number (HARD_BIN / SOFT_BIN not recorded)
pub const INVALID_BIN: u16 = 65535;

/// Invalid die coordinate (X_COORD / Y_COORD not recorded)
pub const INVALID_COORD: i16 = -32768;

/// TEST_FLG bit set when the test failed
pub const TEST_FLG_FAILED: u8 = 0x80;

// =============================================================================
// Measurement Extraction
// =============================================================================

/// Literal marker whose presence selects a test record for extraction
pub const POSITION_MARKER: &str = "Pixel=";

/// Full position marker; row is group 1, column is group 2
pub const POSITION_PATTERN: &str = r"Pixel=R([0-9]+)C([0-9]+)";

/// Marker removed from the middle or end of a parameter name
pub const MARKER_SUFFIX_PATTERN: &str = r";Pixel=R[0-9]+C[0-9]+";

/// Marker removed from the start of a parameter name
pub const MARKER_PREFIX_PATTERN: &str = r"^Pixel=R[0-9]+C[0-9]+;";

/// Separator for multi-valued test text
pub const VALUE_SEPARATOR: char = ',';

// =============================================================================
// Identity Store
// =============================================================================

pub mod identity_tables {
    pub const DEVICE_TABLE: &str = "device_mapping";
    pub const DEVICE_ID_COLUMN: &str = "device_id";
    pub const DEVICE_NAME_COLUMN: &str = "device_dmc";

    pub const PARAM_TABLE: &str = "parameter_info";
    pub const PARAM_ID_COLUMN: &str = "param_id";
    pub const PARAM_NAME_COLUMN: &str = "param_name";
}

/// Names per `IN (...)` lookup; well under SQLite's bound-parameter limit
pub const LOOKUP_CHUNK_SIZE: usize = 500;

/// Attempts to reconcile freshly assigned IDs against a shared store
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

/// File name of the default identity database
pub const IDENTITY_DB_FILE: &str = "identity.sqlite";

/// Application directory under the user data dir
pub const APP_DIR_NAME: &str = "stdf-measure";

// =============================================================================
// Processing Defaults
// =============================================================================

/// Glob patterns selecting STDF files during discovery
pub const DEFAULT_FILE_PATTERNS: &[&str] = &["*.stdf", "*.std"];

/// Memory usage fraction above which file concurrency is halved
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.8;

/// Hex characters of the file hash used in output file names
pub const OUTPUT_HASH_PREFIX_LEN: usize = 16;

/// Extension of in-progress output files
pub const PARTIAL_EXTENSION: &str = "partial";

// =============================================================================
// Parquet Output
// =============================================================================

/// Default rows per row group when no adaptive sizing applies
pub const DEFAULT_ROW_GROUP_SIZE: usize = 250_000;

/// Default data page size in bytes
pub const DEFAULT_DATA_PAGE_SIZE: usize = 1024 * 1024;

/// Approximate encoded width of one measurement row in bytes
pub const ESTIMATED_ROW_BYTES: usize = 96;
