//! HUFF/CDIC decoding: canonical Huffman codes over a phrase dictionary.
//!
//! The HUFF record carries two tables. `dict1` is indexed by the top 8 bits
//! of the next code and gives the code length, a terminal flag and the
//! maximum code; non-terminal entries fall through to the per-length
//! `mincode`/`maxcode` tables built from `dict2`. Each decoded code selects
//! a phrase from the CDIC records; phrases without the literal flag are
//! themselves compressed and are expanded recursively.

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

use super::{Codec, CodecError};
use crate::metadata::Compression;

pub const HUFF_MAGIC: &[u8; 8] = b"HUFF\x00\x00\x00\x18";
pub const CDIC_MAGIC: &[u8; 8] = b"CDIC\x00\x00\x00\x10";

const CDIC_HEADER_LEN: usize = 16;
const PHRASE_LITERAL:  u16 = 0x8000;
const MAX_CODE_LEN:    usize = 32;
/// Nesting bound for phrases that reference other phrases.
const MAX_DEPTH: usize = 32;
/// Output and code budget per record unless the book sets a tighter one.
pub const DEFAULT_OUTPUT_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Copy)]
struct CodeEntry {
    len:      u8,
    terminal: bool,
    max:      u64,
}

#[derive(Debug, Clone)]
struct Phrase {
    data:    Vec<u8>,
    literal: bool,
}

pub struct HuffCdicCodec {
    dict1:   Vec<CodeEntry>,
    mincode: [u64; MAX_CODE_LEN + 1],
    maxcode: [u64; MAX_CODE_LEN + 1],
    phrases: Vec<Phrase>,
    limit:   usize,
}

impl HuffCdicCodec {
    /// Build a decoder from the HUFF record and its CDIC records, in order.
    pub fn new(huff: &[u8], cdics: &[&[u8]]) -> Result<Self, CodecError> {
        let mut codec = Self::load_huff(huff)?;
        for cdic in cdics {
            codec.load_cdic(cdic)?;
        }
        debug!(phrases = codec.phrases.len(), cdic_records = cdics.len(), "loaded HUFF/CDIC dictionary");
        Ok(codec)
    }

    /// Cap both the bytes and the codes one record may produce. Nested
    /// phrases can otherwise expand exponentially.
    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn load_huff(huff: &[u8]) -> Result<Self, CodecError> {
        if huff.len() < 16 || &huff[..8] != HUFF_MAGIC {
            return Err(CodecError::BadHuff("missing HUFF header".into()));
        }
        let off1 = BigEndian::read_u32(&huff[8..12]) as usize;
        let off2 = BigEndian::read_u32(&huff[12..16]) as usize;
        let table1 = huff
            .get(off1..off1 + 256 * 4)
            .ok_or_else(|| CodecError::BadHuff(format!("code table at {off1} past end of record")))?;
        let table2 = huff
            .get(off2..off2 + 64 * 4)
            .ok_or_else(|| CodecError::BadHuff(format!("length table at {off2} past end of record")))?;

        let mut dict1 = Vec::with_capacity(256);
        for (i, raw) in table1.chunks_exact(4).enumerate() {
            let v = BigEndian::read_u32(raw);
            let len = (v & 0x1F) as u8;
            let terminal = v & 0x80 != 0;
            if len == 0 {
                return Err(CodecError::BadHuff(format!("code table entry {i} has zero length")));
            }
            if len <= 8 && !terminal {
                return Err(CodecError::BadHuff(format!("short code {i} is not terminal")));
            }
            let max = (((v >> 8) as u64 + 1) << (32 - len as u32)) - 1;
            dict1.push(CodeEntry { len, terminal, max });
        }

        // Index 0 is a sentinel; lengths run 1..=32.
        let mut mincode = [0u64; MAX_CODE_LEN + 1];
        let mut maxcode = [0u64; MAX_CODE_LEN + 1];
        maxcode[0] = (1u64 << 32) - 1;
        for (i, pair) in table2.chunks_exact(8).enumerate() {
            let len = i + 1;
            let lo = BigEndian::read_u32(&pair[..4]) as u64;
            let hi = BigEndian::read_u32(&pair[4..]) as u64;
            mincode[len] = lo << (32 - len);
            maxcode[len] = ((hi + 1) << (32 - len)) - 1;
        }

        Ok(Self { dict1, mincode, maxcode, phrases: Vec::new(), limit: DEFAULT_OUTPUT_LIMIT })
    }

    fn load_cdic(&mut self, cdic: &[u8]) -> Result<(), CodecError> {
        if cdic.len() < CDIC_HEADER_LEN || &cdic[..8] != CDIC_MAGIC {
            return Err(CodecError::BadCdic("missing CDIC header".into()));
        }
        let total = BigEndian::read_u32(&cdic[8..12]) as usize;
        let bits = BigEndian::read_u32(&cdic[12..16]);
        if bits > 16 {
            return Err(CodecError::BadCdic(format!("{bits}-bit phrase index")));
        }
        let n = (1usize << bits).min(total.saturating_sub(self.phrases.len()));
        let table = cdic
            .get(CDIC_HEADER_LEN..CDIC_HEADER_LEN + n * 2)
            .ok_or_else(|| CodecError::BadCdic(format!("offset table for {n} phrases past end of record")))?;

        for raw in table.chunks_exact(2) {
            let at = CDIC_HEADER_LEN + BigEndian::read_u16(raw) as usize;
            let header = cdic
                .get(at..at + 2)
                .ok_or_else(|| CodecError::BadCdic(format!("phrase at {at} past end of record")))?;
            let blen = BigEndian::read_u16(header);
            let len = (blen & !PHRASE_LITERAL) as usize;
            let data = cdic
                .get(at + 2..at + 2 + len)
                .ok_or_else(|| CodecError::BadCdic(format!("phrase at {at} overruns record")))?;
            self.phrases.push(Phrase { data: data.to_vec(), literal: blen & PHRASE_LITERAL != 0 });
        }
        trace!(added = n, total = self.phrases.len(), "loaded CDIC record");
        Ok(())
    }

    fn unpack(&self, data: &[u8], depth: usize, steps: &mut usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::RecursionLimit(MAX_DEPTH));
        }
        let mut padded = Vec::with_capacity(data.len() + 8);
        padded.extend_from_slice(data);
        padded.extend_from_slice(&[0u8; 8]);

        let mut bits_left = data.len() as i64 * 8;
        let mut pos = 0usize;
        let mut x = BigEndian::read_u64(&padded[pos..]);
        let mut n: i32 = 32;

        loop {
            if n <= 0 {
                pos += 4;
                x = padded
                    .get(pos..pos + 8)
                    .map(BigEndian::read_u64)
                    .ok_or(CodecError::Truncated { position: pos })?;
                n += 32;
            }
            let code = (x >> n) & 0xFFFF_FFFF;

            let entry = self.dict1[(code >> 24) as usize];
            let mut len = entry.len as usize;
            let mut max = entry.max;
            if !entry.terminal {
                while len <= MAX_CODE_LEN && code < self.mincode[len] {
                    len += 1;
                }
                if len > MAX_CODE_LEN {
                    return Err(CodecError::BadHuff(format!("no code length matches {code:#010x}")));
                }
                max = self.maxcode[len];
            }

            n -= len as i32;
            bits_left -= len as i64;
            if bits_left < 0 {
                break;
            }

            let index = max
                .checked_sub(code)
                .map(|d| (d >> (32 - len)) as usize)
                .ok_or_else(|| CodecError::BadHuff(format!("code {code:#010x} above its maximum")))?;
            let phrase = self.phrases.get(index).ok_or(CodecError::MissingPhrase(index))?;
            *steps += 1;
            if *steps > self.limit {
                return Err(CodecError::OutputLimit(self.limit));
            }
            if phrase.literal {
                out.extend_from_slice(&phrase.data);
                if out.len() > self.limit {
                    return Err(CodecError::OutputLimit(self.limit));
                }
            } else {
                self.unpack(&phrase.data, depth + 1, steps, out)?;
            }
        }
        Ok(())
    }
}

impl Codec for HuffCdicCodec {
    fn compression(&self) -> Compression {
        Compression::HuffCdic
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(data.len() * 3);
        self.unpack(data, 0, &mut 0, &mut out)?;
        Ok(out)
    }
}
