//! PalmDOC LZ77 decoding.
//!
//! | Byte        | Meaning                                                  |
//! |-------------|----------------------------------------------------------|
//! | 0x00        | literal                                                  |
//! | 0x01..=0x08 | copy the next n bytes verbatim                           |
//! | 0x09..=0x7F | literal                                                  |
//! | 0x80..=0xBF | with the next byte: 11-bit distance, 3-bit length (+3)   |
//! | 0xC0..=0xFF | a space followed by `byte ^ 0x80`                        |

use super::{Codec, CodecError};
use crate::metadata::Compression;

pub struct PalmDocCodec;

impl Codec for PalmDocCodec {
    fn compression(&self) -> Compression {
        Compression::PalmDoc
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        decompress(data)
    }
}

pub fn decompress(src: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(src.len() * 2);
    let mut i = 0;
    while i < src.len() {
        let c = src[i];
        i += 1;
        match c {
            0x00 | 0x09..=0x7F => out.push(c),
            0x01..=0x08 => {
                let n = c as usize;
                let run = src.get(i..i + n).ok_or(CodecError::TruncatedLiteral {
                    position: i - 1,
                    wanted:   n,
                })?;
                out.extend_from_slice(run);
                i += n;
            }
            0x80..=0xBF => {
                let low = *src.get(i).ok_or(CodecError::TruncatedBackReference { position: i - 1 })?;
                i += 1;
                let pair = u16::from_be_bytes([c, low]);
                let distance = ((pair & 0x3FFF) >> 3) as usize;
                let length = (pair & 0x07) as usize + 3;
                if distance == 0 || distance > out.len() {
                    return Err(CodecError::BadBackReference { distance, available: out.len() });
                }
                // Byte-by-byte: the source may overlap the bytes being written.
                let start = out.len() - distance;
                for k in 0..length {
                    let b = out[start + k];
                    out.push(b);
                }
            }
            0xC0..=0xFF => {
                out.push(b' ');
                out.push(c ^ 0x80);
            }
        }
    }
    Ok(out)
}
