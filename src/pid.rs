//! Device serial → candidate PIDs.
//!
//! Two candidates are produced, book-bound first:
//!
//! - **Book PID** (only when the book carries EXTH 209):
//!   `SHA-1(serial || rec209 || token)`, the first 48 bits read as eight
//!   six-bit groups indexing [`BOOK_PID_ALPHABET`].
//! - **Device PID**: fold the serial into 7 bytes by XOR, XOR each byte with
//!   the big-endian bytes of the serial's CRC-32, map through
//!   [`PID_ALPHABET`] and append `*`.
//!
//! The 10-character display form appends two checksum letters
//! ([`checksum_pid`]). All CRCs here use a zero initial register and no
//! final inversion.

use crc32fast::Hasher;
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::DrmError;
use crate::metadata::PidSeed;

pub const SERIAL_LEN: usize = 16;
pub const PID_LEN:    usize = 8;
/// Length of a PID with its two checksum letters.
pub const CHECKED_PID_LEN: usize = PID_LEN + 2;

/// Letters used by device PIDs and checksums ('O' and '0' are absent).
pub static PID_ALPHABET: &[u8; 34] = b"ABCDEFGHIJKLMNPQRSTUVWXYZ123456789";
pub static BOOK_PID_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const DEVICE_FOLD: usize = 7;

// ── DeviceSerial ──────────────────────────────────────────────────────────────

/// A validated 16-character device serial: digits and upper-case letters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DeviceSerial(String);

impl DeviceSerial {
    pub fn parse(raw: &str) -> Result<Self, DrmError> {
        let invalid = |reason| DrmError::InvalidSerial { serial: raw.to_owned(), reason };
        if raw.len() != SERIAL_LEN || raw.chars().count() != SERIAL_LEN {
            return Err(invalid("must be exactly 16 characters"));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()) {
            return Err(invalid("only digits and upper-case letters are allowed"));
        }
        let serial = Self(raw.to_owned());
        if !serial.is_kindle() {
            warn!(serial = %serial.0, "serial does not start with a known Kindle prefix (B or 9)");
        }
        Ok(serial)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_kindle(&self) -> bool {
        self.0.starts_with('B') || self.0.starts_with('9')
    }
}

impl FromStr for DeviceSerial {
    type Err = DrmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for DeviceSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceSerial({})", self.0)
    }
}

// ── Pid ───────────────────────────────────────────────────────────────────────

/// An 8-character candidate identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid([u8; PID_LEN]);

impl Pid {
    /// PID recorded when a book opens with the publisher default key.
    pub const DEFAULT: Pid = Pid(*b"00000000");

    /// Accepts the bare 8-character form or the 10-character checksummed form.
    /// A bad checksum is only warned about, matching what readers accept.
    pub fn parse(raw: &str) -> Result<Self, DrmError> {
        let invalid = |reason| DrmError::InvalidPid { pid: raw.to_owned(), reason };
        if !raw.is_ascii() {
            return Err(invalid("must be ASCII"));
        }
        let bytes = raw.as_bytes();
        let pid = match bytes.len() {
            PID_LEN => Pid(bytes.try_into().map_err(|_| invalid("must be 8 or 10 characters"))?),
            CHECKED_PID_LEN => {
                let pid = Pid(bytes[..PID_LEN]
                    .try_into()
                    .map_err(|_| invalid("must be 8 or 10 characters"))?);
                let expected = checksum_pid(&pid);
                if expected != raw {
                    warn!(pid = raw, %expected, "PID checksum mismatch, using first 8 characters");
                }
                pid
            }
            _ => return Err(invalid("must be 8 or 10 characters")),
        };
        Ok(pid)
    }

    pub fn as_bytes(&self) -> &[u8; PID_LEN] {
        &self.0
    }

    /// PID right-padded with NULs to a 16-byte cipher key.
    pub fn padded(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..PID_LEN].copy_from_slice(&self.0);
        out
    }

    pub fn with_checksum(&self) -> String {
        checksum_pid(self)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({self})")
    }
}

impl FromStr for Pid {
    type Err = DrmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Derivation ────────────────────────────────────────────────────────────────

/// CRC-32 with a zero initial register and no final inversion.
fn raw_crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(0xFFFF_FFFF);
    hasher.update(data);
    !hasher.finalize()
}

/// Append the two checksum letters to a PID.
pub fn checksum_pid(pid: &Pid) -> String {
    let mut crc = raw_crc32(pid.as_bytes());
    crc ^= crc >> 16;
    let n = PID_ALPHABET.len();
    let mut out = pid.to_string();
    for _ in 0..2 {
        let b = (crc & 0xFF) as usize;
        let pos = (b / n) ^ (b % n);
        out.push(PID_ALPHABET[pos % n] as char);
        crc >>= 8;
    }
    out
}

/// The device-wide PID used by Kindle firmware before book-bound PIDs.
pub fn device_pid(serial: &DeviceSerial) -> Pid {
    let s = serial.as_str().as_bytes();
    let crc = raw_crc32(s).to_be_bytes();

    let mut folded = [0u8; DEVICE_FOLD];
    for (i, &c) in s.iter().enumerate() {
        folded[i % DEVICE_FOLD] ^= c;
    }
    let mut pid = [b'*'; PID_LEN];
    for (i, b) in folded.iter().enumerate() {
        let b = b ^ crc[i & 3];
        let idx = (b >> 7) + (((b >> 5) & 3) ^ (b & 0x1F));
        pid[i] = PID_ALPHABET[idx as usize];
    }
    Pid(pid)
}

/// PID bound to one book through its EXTH 209 tamper-proof keys.
pub fn book_pid(serial: &DeviceSerial, seed: &PidSeed) -> Pid {
    let digest = Sha1::new()
        .chain_update(serial.as_str().as_bytes())
        .chain_update(&seed.rec209)
        .chain_update(&seed.token)
        .finalize();

    let two_bits = |offset: usize| -> usize {
        let shift = 6 - 2 * (offset % 4);
        ((digest[offset / 4] >> shift) & 3) as usize
    };
    let mut pid = [0u8; PID_LEN];
    for (position, slot) in pid.iter_mut().enumerate() {
        let off = position * 3;
        let six = (two_bits(off) << 4) | (two_bits(off + 1) << 2) | two_bits(off + 2);
        *slot = BOOK_PID_ALPHABET[six];
    }
    Pid(pid)
}

/// Ordered, de-duplicated candidates for a validated serial.
pub fn candidates(serial: &DeviceSerial, seed: Option<&PidSeed>) -> Vec<Pid> {
    let mut out = Vec::with_capacity(2);
    if let Some(seed) = seed {
        out.push(book_pid(serial, seed));
    }
    let device = device_pid(serial);
    if !out.contains(&device) {
        out.push(device);
    }
    debug!(count = out.len(), bound = seed.is_some(), "derived candidate PIDs");
    out
}

/// Validate `serial` and derive its candidate PIDs.
pub fn derive(serial: &str, seed: Option<&PidSeed>) -> Result<Vec<Pid>, DrmError> {
    let serial = DeviceSerial::parse(serial)?;
    Ok(candidates(&serial, seed))
}
