//! EXTH extended-metadata block: typed key/value entries following the MOBI header.
//!
//! ```text
//! "EXTH" | header_len u32 | count u32 | count × (tag u32 | size u32 | payload[size-8])
//! ```

use byteorder::{BigEndian, ByteOrder};
use tracing::warn;

pub const EXTH_MAGIC: &[u8; 4] = b"EXTH";
/// Bit in the MOBI header's EXTH flags announcing an EXTH block.
pub const EXTH_PRESENT: u32 = 0x40;

pub mod tag {
    pub const AUTHOR:         u32 = 100;
    pub const PUBLISHER:      u32 = 101;
    pub const WATERMARK:      u32 = 208;
    pub const TAMPER_KEYS:    u32 = 209;
    pub const CLIPPING_LIMIT: u32 = 401;
    pub const TTS_DISABLED:   u32 = 404;
    pub const RENTAL_EXPIRY:  u32 = 406;
    pub const CDE_TYPE:       u32 = 501;
    pub const UPDATED_TITLE:  u32 = 503;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExthEntry {
    pub tag:    u32,
    /// Offset of the payload within record 0.
    pub offset: usize,
    pub data:   Vec<u8>,
}

impl ExthEntry {
    pub fn as_u32(&self) -> Option<u32> {
        (self.data.len() == 4).then(|| BigEndian::read_u32(&self.data))
    }

    pub fn as_u64(&self) -> Option<u64> {
        (self.data.len() == 8).then(|| BigEndian::read_u64(&self.data))
    }
}

/// Material the book-bound PID is hashed from: EXTH 209 and the entries it names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidSeed {
    pub rec209: Vec<u8>,
    pub token:  Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Exth {
    pub entries: Vec<ExthEntry>,
}

impl Exth {
    /// Parse the block starting at `start` within record 0.
    ///
    /// Malformed blocks are not fatal: parsing stops at the first entry that
    /// overruns the record and keeps what was read so far.
    pub fn parse(record0: &[u8], start: usize) -> Self {
        let mut entries = Vec::new();
        let block = match record0.get(start..) {
            Some(b) if b.len() >= 12 && &b[..4] == EXTH_MAGIC => b,
            _ => {
                warn!(offset = start, "EXTH flag set but no EXTH block found");
                return Self { entries };
            }
        };

        let count = BigEndian::read_u32(&block[8..12]);
        let mut pos = 12usize;
        for i in 0..count {
            let Some(head) = block.get(pos..pos + 8) else {
                warn!(entry = i, count, "EXTH entry header runs past record 0");
                break;
            };
            let tag = BigEndian::read_u32(&head[0..4]);
            let size = BigEndian::read_u32(&head[4..8]) as usize;
            if size < 8 || pos + size > block.len() {
                warn!(entry = i, tag, size, "EXTH entry size is invalid");
                break;
            }
            entries.push(ExthEntry {
                tag,
                offset: start + pos + 8,
                data:   block[pos + 8..pos + size].to_vec(),
            });
            pos += size;
        }
        Self { entries }
    }

    /// Later entries override earlier ones with the same tag.
    pub fn get(&self, tag: u32) -> Option<&ExthEntry> {
        self.entries.iter().rev().find(|e| e.tag == tag)
    }

    pub fn tags(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.tag).collect()
    }

    /// EXTH 209 is a list of 5-byte groups; the last four bytes of each group
    /// name another EXTH tag whose payload is appended to the token.
    pub fn pid_seed(&self) -> Option<PidSeed> {
        let rec209 = self.get(tag::TAMPER_KEYS)?.data.clone();
        let mut token = Vec::new();
        for group in rec209.chunks_exact(5) {
            let referenced = BigEndian::read_u32(&group[1..5]);
            if let Some(entry) = self.get(referenced) {
                token.extend_from_slice(&entry.data);
            }
        }
        Some(PidSeed { rec209, token })
    }
}
