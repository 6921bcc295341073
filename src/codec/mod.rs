//! Text decompression: PalmDOC LZ77 and HUFF/CDIC.
//!
//! Decompression only serves to validate a decryption: the rewritten book
//! keeps its records compressed. A key that unwraps a voucher but yields
//! text which does not decode to the declared length is reported as
//! corruption rather than success.

pub mod huffcdic;
pub mod palmdoc;

use thiserror::Error;
use tracing::debug;

use crate::container::{Container, RecordKind};
use crate::decrypt::{trailing_entries_size, DecryptedRecord};
use crate::error::{DecodeFailure, DrmError};
use crate::metadata::{Compression, FormatMetadata};
pub use huffcdic::HuffCdicCodec;
pub use palmdoc::PalmDocCodec;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Back-reference distance {distance} exceeds the {available} bytes decoded so far")]
    BadBackReference { distance: usize, available: usize },
    #[error("Literal run at {position} wants {wanted} bytes past end of input")]
    TruncatedLiteral { position: usize, wanted: usize },
    #[error("Back-reference at {position} is missing its second byte")]
    TruncatedBackReference { position: usize },
    #[error("Bit stream truncated at byte {position}")]
    Truncated { position: usize },
    #[error("Bad HUFF record: {0}")]
    BadHuff(String),
    #[error("Bad CDIC record: {0}")]
    BadCdic(String),
    #[error("Code refers to phrase {0}, which no CDIC record defines")]
    MissingPhrase(usize),
    #[error("Phrases nest deeper than {0} levels")]
    RecursionLimit(usize),
    #[error("Record expands past the {0}-byte decoding budget")]
    OutputLimit(usize),
    #[error("HUFF/CDIC dictionary unavailable: {0}")]
    MissingDictionary(String),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> Compression { Compression::None }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve the codec for a book. HUFF/CDIC loads its dictionary records.
pub fn get_codec(container: &Container, meta: &FormatMetadata) -> Result<Box<dyn Codec>, CodecError> {
    match meta.compression {
        Compression::None    => Ok(Box::new(NoneCodec)),
        Compression::PalmDoc => Ok(Box::new(PalmDocCodec)),
        Compression::HuffCdic => {
            let range = meta
                .huffman_records()
                .ok_or_else(|| CodecError::MissingDictionary("MOBI header names no HUFF record".into()))?;
            let mut huff = None;
            let mut cdics = Vec::with_capacity(range.len().saturating_sub(1));
            for index in range {
                match container.view(index, meta) {
                    Ok(RecordKind::Huffman(bytes)) => huff = Some(bytes),
                    Ok(RecordKind::Cdic(bytes))    => cdics.push(bytes),
                    Ok(_) | Err(_) => {
                        return Err(CodecError::MissingDictionary(format!("record {index} is not a dictionary record")))
                    }
                }
            }
            let huff = huff.ok_or_else(|| CodecError::MissingDictionary("empty HUFF range".into()))?;
            // A record never holds more than its declared size of text.
            let limit = 4 * (meta.text_record_size as usize).max(4096);
            Ok(Box::new(HuffCdicCodec::new(huff, &cdics)?.with_output_limit(limit)))
        }
    }
}

/// Decompress a single self-contained record. HUFF/CDIC needs the book's
/// dictionary and goes through [`get_codec`] instead.
pub fn decompress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>, CodecError> {
    match compression {
        Compression::None     => NoneCodec.decompress(bytes),
        Compression::PalmDoc  => palmdoc::decompress(bytes),
        Compression::HuffCdic => Err(CodecError::MissingDictionary("no dictionary supplied".into())),
    }
}

/// Decode every decrypted text record and check the total against the
/// declared text length. Returns the decoded length.
pub fn validate_text_length(
    container: &Container,
    meta:      &FormatMetadata,
    records:   &[DecryptedRecord],
) -> Result<u64, DrmError> {
    let expected = meta.text_length as u64;
    let corrupt = |actual: u64, record: usize, source: CodecError| DrmError::Corruption {
        expected,
        actual,
        detail: Some(DecodeFailure { record, source }),
    };

    let dictionary_record = meta.huffman_records().map_or(0, |r| r.start);
    let codec = get_codec(container, meta).map_err(|source| corrupt(0, dictionary_record, source))?;

    let mut total = 0u64;
    for record in records {
        let trailing = trailing_entries_size(&record.data, meta.extra_data_flags);
        let body = &record.data[..record.data.len() - trailing];
        let text = codec.decompress(body).map_err(|source| corrupt(total, record.index, source))?;
        total += text.len() as u64;
    }

    debug!(expected, decoded = total, codec = codec.compression().name(), "validated text length");
    if total != expected {
        return Err(DrmError::Corruption { expected, actual: total, detail: None });
    }
    Ok(total)
}
