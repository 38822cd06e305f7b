use std::error::Error;
use std::fmt::{Debug, Display};
use std::path::PathBuf;

/// Errors the core decode pipeline can surface.
///
/// `Corrupt` and `UnsupportedField` are only ever returned outside of
/// [`crate::tps::file::OpenOptions::check`] mode — inside check mode the
/// same conditions are pushed onto [`crate::tps::file::TpsFile::anomalies`]
/// as warnings instead, and decoding continues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TpsError {
    NotFound(PathBuf),
    Io(String),
    BadMagic,
    Corrupt(String),
    UnsupportedField(String),
}

impl Display for TpsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TpsError::NotFound(path) => write!(f, "file not found: {}", path.display()),
            TpsError::Io(msg) => write!(f, "io error: {msg}"),
            TpsError::BadMagic => write!(
                f,
                "header marker mismatch (corrupt file or wrong password)"
            ),
            TpsError::Corrupt(msg) => write!(f, "corrupt structure: {msg}"),
            TpsError::UnsupportedField(msg) => write!(f, "unsupported field: {msg}"),
        }
    }
}

impl Error for TpsError {}

impl From<std::io::Error> for TpsError {
    fn from(e: std::io::Error) -> Self {
        TpsError::Io(e.to_string())
    }
}

/// A non-fatal structural anomaly recorded while `check` mode is on.
///
/// These mirror the warnings the reference implementation raises via
/// `warnings.warn`: they never abort a scan, but a caller asking "was this
/// file actually well-formed" needs them without scraping log output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anomaly {
    FileSizeNotBlockAligned { file_size: u64 },
    PageOffsetMismatch { page_ref: u32, expected: u64, actual: u32 },
    PageOutsideBlocks { page_ref: u32 },
    PageIntersection { page_ref: u32, other_ref: u32 },
    RecordSizeMismatch { table_number: u32, expected: u16, actual: usize },
}

impl Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::FileSizeNotBlockAligned { file_size } => {
                write!(f, "file size {file_size} is not a multiple of 64 bytes")
            }
            Anomaly::PageOffsetMismatch { page_ref, expected, actual } => write!(
                f,
                "page ref {page_ref}: offset {actual} does not match expected {expected}"
            ),
            Anomaly::PageOutsideBlocks { page_ref } => {
                write!(f, "page ref {page_ref} is not inside any declared block")
            }
            Anomaly::PageIntersection { page_ref, other_ref } => write!(
                f,
                "page ref {page_ref} intersects with page ref {other_ref}"
            ),
            Anomaly::RecordSizeMismatch { table_number, expected, actual } => write!(
                f,
                "table {table_number}: record size {actual} does not match schema {expected}"
            ),
        }
    }
}
