use std::io;
use thiserror::Error;

use crate::codec::CodecError;

/// Structural problems with the container or its record-0 headers.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Container truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("Unrecognised database type {found:?} (expected BOOKMOBI or TEXtREAd)")]
    BadMagic { found: String },
    #[error("Container declares no records")]
    NoRecords,
    #[error("Record directory declares {declared} records but only {available} fit in the file")]
    DirectoryOverflow { declared: usize, available: usize },
    #[error("Record {index} starts at {offset}, inside the record directory")]
    RecordInsideDirectory { index: usize, offset: usize },
    #[error("Record {index} offset {offset} does not follow previous offset {previous}")]
    OffsetsNotIncreasing { index: usize, offset: usize, previous: usize },
    #[error("Record {index} offset {offset} exceeds container length {len}")]
    RecordOutOfBounds { index: usize, offset: usize, len: usize },
    #[error("Record {0} does not exist")]
    MissingRecord(usize),
    #[error("Record 0 too short for {what}: need {needed} bytes, have {available}")]
    HeaderTooShort { what: &'static str, needed: usize, available: usize },
    #[error("Record 0 is missing the MOBI header magic")]
    BadMobiHeader,
    #[error("Unknown compression type {0}")]
    UnknownCompression(u16),
    #[error("{what} range {offset}..{end} lies outside record 0 ({len} bytes)")]
    FieldOutOfBounds { what: &'static str, offset: usize, end: usize, len: usize },
    #[error("DRM key material not initialised: the book carries no vouchers")]
    NoKeyMaterial,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Every way a single-book unlock can fail.
///
/// `NoMatchingKey` is the ordinary "wrong serial" outcome; `Corruption` means
/// a voucher validated but the text still does not decode to the declared
/// length, whether a record fails to decode or the total is wrong.
#[derive(Error, Debug)]
pub enum DrmError {
    #[error("Malformed container: {0}")]
    Format(#[from] FormatError),
    #[error("Unsupported encryption (type {code}): {reason}")]
    UnsupportedEncryption { code: u16, reason: &'static str },
    #[error("Invalid serial number {serial:?}: {reason}")]
    InvalidSerial { serial: String, reason: &'static str },
    #[error("Invalid PID {pid:?}: {reason}")]
    InvalidPid { pid: String, reason: &'static str },
    #[error("No matching key: none of the {tried} candidate PID(s) unlock this book")]
    NoMatchingKey { tried: usize },
    #[error("Decrypted text is corrupt: header declares {expected} bytes, decoded {actual}{}", detail_suffix(.detail))]
    Corruption {
        expected: u64,
        actual:   u64,
        #[source]
        detail:   Option<DecodeFailure>,
    },
    #[error("Records fed out of order: expected record {expected}, got {got}")]
    OutOfOrder { expected: usize, got: usize },
    #[error("Record {index} changed length during decryption ({expected} -> {actual})")]
    RecordLength { index: usize, expected: usize, actual: usize },
}

impl DrmError {
    /// True for failures that mean a key validated but produced wrong plaintext.
    pub fn is_corruption(&self) -> bool {
        matches!(self, DrmError::Corruption { .. })
    }
}

/// The record whose decompression stopped a text-length check early.
#[derive(Error, Debug)]
#[error("record {record} does not decode: {source}")]
pub struct DecodeFailure {
    pub record: usize,
    pub source: CodecError,
}

fn detail_suffix(detail: &Option<DecodeFailure>) -> String {
    detail.as_ref().map(|d| format!("; {d}")).unwrap_or_default()
}

pub type Result<T, E = DrmError> = std::result::Result<T, E>;
