//! Ordered decryption of the text records.
//!
//! The cipher state is threaded through the records in ascending index
//! order by a single [`RecordDecryptor`]; there is no per-record entry point.
//! Trailing data entries at the end of each record are stored in the clear
//! and copied through untouched.

use serde::Serialize;
use tracing::{debug, trace};

use crate::container::{Container, RecordKind};
use crate::crypto::{ContentKey, Pc1};
use crate::error::{DrmError, FormatError};
use crate::metadata::FormatMetadata;

/// How the PC1 state relates across text records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum KeystreamMode {
    /// One cipher state runs through every text record.
    #[default]
    Cumulative,
    /// The cipher is re-keyed at the start of each record.
    PerRecord,
}

/// A text record after decryption; same length as the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedRecord {
    pub index: usize,
    pub data:  Vec<u8>,
}

#[derive(Debug)]
pub struct RecordDecryptor {
    key:            ContentKey,
    cipher:         Pc1,
    mode:           KeystreamMode,
    trailing_flags: u16,
    next:           usize,
}

impl RecordDecryptor {
    /// `first` is the index of the first record this decryptor will accept.
    pub fn new(key: &ContentKey, mode: KeystreamMode, trailing_flags: u16, first: usize) -> Self {
        Self {
            key: key.clone(),
            cipher: key.cipher(),
            mode,
            trailing_flags,
            next: first,
        }
    }

    /// Index the decryptor expects next.
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Decrypt record `index`; it must be exactly the next expected record.
    pub fn decrypt_next(&mut self, index: usize, record: &[u8]) -> Result<DecryptedRecord, DrmError> {
        if index != self.next {
            return Err(DrmError::OutOfOrder { expected: self.next, got: index });
        }
        if self.mode == KeystreamMode::PerRecord {
            self.cipher = self.key.cipher();
        }
        let trailing = trailing_entries_size(record, self.trailing_flags);
        let body_len = record.len() - trailing;

        let mut data = record.to_vec();
        self.cipher.decrypt_in_place(&mut data[..body_len]);
        trace!(index, body_len, trailing, "decrypted record");

        self.next += 1;
        Ok(DecryptedRecord { index, data })
    }
}

/// Decrypt every text record (1..=text_record_count) in order.
pub fn decrypt_records(
    container: &Container,
    meta:      &FormatMetadata,
    key:       &ContentKey,
    mode:      KeystreamMode,
) -> Result<Vec<DecryptedRecord>, DrmError> {
    let last = meta.text_record_count as usize;
    let mut decryptor = RecordDecryptor::new(key, mode, meta.cipher_trailing_flags(), 1);
    let mut out = Vec::with_capacity(last);
    for index in 1..=last {
        match container.view(index, meta)? {
            RecordKind::Text(bytes) => out.push(decryptor.decrypt_next(index, bytes)?),
            _ => return Err(FormatError::MissingRecord(index).into()),
        }
    }
    debug!(records = out.len(), ?mode, "decrypted text records");
    Ok(out)
}

/// Total size of the trailing entries at the end of `record`.
///
/// Bits 1..15 of `flags` each announce one entry whose size is stored as a
/// backward varint in its last bytes. Bit 0 announces multibyte overlap bytes,
/// counted by the low two bits of the byte before the other entries.
pub fn trailing_entries_size(record: &[u8], flags: u16) -> usize {
    let mut total = 0usize;
    let mut pending = flags >> 1;
    while pending != 0 {
        if pending & 1 != 0 {
            let remaining = record.len().saturating_sub(total);
            total += backward_varint(&record[..remaining]);
        }
        pending >>= 1;
    }
    if flags & 1 != 0 {
        if let Some(&b) = record.len().checked_sub(total + 1).and_then(|i| record.get(i)) {
            total += (b & 0x3) as usize + 1;
        }
    }
    total.min(record.len())
}

/// Varint read backwards from the end of `data`; the byte with the high bit
/// set terminates it.
fn backward_varint(data: &[u8]) -> usize {
    let mut value = 0usize;
    let mut shift = 0;
    for &b in data.iter().rev() {
        value |= ((b & 0x7F) as usize) << shift;
        shift += 7;
        if b & 0x80 != 0 || shift >= 28 {
            break;
        }
    }
    value
}
