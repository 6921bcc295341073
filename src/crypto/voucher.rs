//! DRM vouchers: per-PID wrapped copies of the content key stored in record 0.
//!
//! Each voucher is 0x30 bytes, big-endian:
//!
//! ```text
//! verification u32 | size u32 | type u32 | checksum u8 | pad[3] | cookie[32]
//! ```
//!
//! A PID is turned into a wrapping key by PC1-encrypting the NUL-padded PID
//! under [`KEY_VECTOR`]. A voucher is tried only when its checksum byte equals
//! the byte sum of that wrapping key. The cookie then decrypts to
//!
//! ```text
//! verification u32 | flags u32 | content_key[16] | expiry u32 | expiry2 u32
//! ```
//!
//! and is accepted when the verification words agree and `flags & 0x1F == 1`.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};
use tracing::{debug, trace};

use super::{pc1_decrypt, pc1_encrypt, ContentKey, KEY_LEN};
use crate::container::Container;
use crate::error::{DrmError, FormatError};
use crate::metadata::FormatMetadata;
use crate::pid::Pid;

pub const VOUCHER_LEN: usize = 0x30;
pub const COOKIE_LEN:  usize = 32;

/// Fixed wrapping key vector of the PID scheme.
pub const KEY_VECTOR: [u8; KEY_LEN] = [
    0x72, 0x38, 0x33, 0xB0, 0xB4, 0xF2, 0xE3, 0xCA,
    0xDF, 0x09, 0x01, 0xD6, 0xE2, 0xE0, 0x3F, 0x96,
];

const FLAG_MASK:  u32 = 0x1F;
const FLAG_VALID: u32 = 1;

#[derive(Debug, Clone)]
pub struct Voucher {
    pub verification: u32,
    pub size:         u32,
    pub kind:         u32,
    pub checksum:     u8,
    pub cookie:       [u8; COOKIE_LEN],
}

impl Voucher {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let verification = reader.read_u32::<BigEndian>()?;
        let size         = reader.read_u32::<BigEndian>()?;
        let kind         = reader.read_u32::<BigEndian>()?;
        let checksum     = reader.read_u8()?;
        let mut pad = [0u8; 3];
        reader.read_exact(&mut pad)?;
        let mut cookie = [0u8; COOKIE_LEN];
        reader.read_exact(&mut cookie)?;
        Ok(Self { verification, size, kind, checksum, cookie })
    }

    /// Unwrap the cookie with `wrapping_key`; `None` if the checksum byte or
    /// the embedded verification does not match.
    fn unwrap_with(&self, wrapping_key: &[u8; KEY_LEN], check_flags: bool) -> Option<ContentKey> {
        if self.checksum != byte_sum(wrapping_key) {
            return None;
        }
        let cookie = Cookie::parse(&pc1_decrypt(wrapping_key, &self.cookie));
        if cookie.verification != self.verification {
            return None;
        }
        if check_flags && cookie.flags & FLAG_MASK != FLAG_VALID {
            return None;
        }
        Some(ContentKey::new(cookie.key))
    }
}

/// Decrypted voucher payload.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub verification: u32,
    pub flags:        u32,
    pub key:          [u8; KEY_LEN],
    pub expiry:       u32,
    pub expiry2:      u32,
}

impl Cookie {
    pub fn parse(raw: &[u8]) -> Self {
        let word = |off: usize| u32::from_be_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&raw[8..8 + KEY_LEN]);
        Self {
            verification: word(0),
            flags:        word(4),
            key,
            expiry:       word(24),
            expiry2:      word(28),
        }
    }
}

/// Low byte of the sum of all key bytes.
pub fn byte_sum(key: &[u8]) -> u8 {
    key.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Wrapping key a voucher for `pid` is sealed with.
pub fn wrapping_key(pid: &Pid) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&pc1_encrypt(&KEY_VECTOR, &pid.padded()));
    key
}

/// Read every voucher in the book's DRM block.
pub fn read_vouchers(container: &Container, meta: &FormatMetadata) -> Result<Vec<Voucher>, FormatError> {
    let drm = match meta.drm() {
        Some(d) if d.is_present() => d,
        _ => return Err(FormatError::NoKeyMaterial),
    };
    let rec0 = container.record_data(0)?;
    let block = &rec0[drm.range()];
    let needed = drm.count as usize * VOUCHER_LEN;
    if needed > block.len() {
        return Err(FormatError::FieldOutOfBounds {
            what:   "DRM vouchers",
            offset: drm.offset as usize,
            end:    drm.offset as usize + needed,
            len:    drm.offset as usize + block.len(),
        });
    }
    block
        .chunks_exact(VOUCHER_LEN)
        .take(drm.count as usize)
        .map(|chunk| Voucher::read(chunk).map_err(FormatError::from))
        .collect()
}

/// Find the content key: each candidate in order, then the publisher default.
///
/// Returns the key together with the PID that unlocked it
/// ([`Pid::DEFAULT`] for the default key).
pub fn resolve(
    container:  &Container,
    meta:       &FormatMetadata,
    candidates: &[Pid],
) -> Result<(ContentKey, Pid), DrmError> {
    let vouchers = read_vouchers(container, meta)?;
    debug!(vouchers = vouchers.len(), candidates = candidates.len(), "resolving content key");

    for pid in candidates {
        let wrapping = wrapping_key(pid);
        trace!(%pid, checksum = byte_sum(&wrapping), "trying candidate");
        if let Some(key) = vouchers.iter().find_map(|v| v.unwrap_with(&wrapping, true)) {
            debug!(%pid, "voucher unwrapped");
            return Ok((key, *pid));
        }
    }

    if let Some(key) = vouchers.iter().find_map(|v| v.unwrap_with(&KEY_VECTOR, false)) {
        debug!("book uses the publisher default key");
        return Ok((key, Pid::DEFAULT));
    }

    Err(DrmError::NoMatchingKey { tried: candidates.len() })
}
