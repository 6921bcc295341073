//! Synthetic books for unit tests.

use crate::crypto::pc1_encrypt;
use crate::crypto::voucher::{byte_sum, wrapping_key, COOKIE_LEN, VOUCHER_LEN};
use crate::database::HEADER_SIZE;
use crate::metadata::{exth, Compression, NO_DRM_OFFSET};
use crate::pid::Pid;

pub const MOBI_LEN: u32 = 0xE8;

/// Container whose record 0 is `rec0`, followed by `extra` 4-byte records.
pub fn wrap(magic: &[u8; 8], rec0: &[u8], extra: usize) -> Vec<u8> {
    let text = vec![&b"text"[..]; extra];
    wrap_records(magic, rec0, &text)
}

pub fn wrap_records(magic: &[u8; 8], rec0: &[u8], records: &[&[u8]]) -> Vec<u8> {
    let n = 1 + records.len();
    let mut out = vec![0u8; HEADER_SIZE];
    out[..6].copy_from_slice(b"DbName");
    out[0x3C..0x44].copy_from_slice(magic);
    out[0x4C..0x4E].copy_from_slice(&(n as u16).to_be_bytes());
    let mut off = HEADER_SIZE + n * 8;
    for i in 0..n {
        out.extend_from_slice(&(off as u32).to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, i as u8]);
        off += if i == 0 { rec0.len() } else { records[i - 1].len() };
    }
    out.extend_from_slice(rec0);
    for r in records {
        out.extend_from_slice(r);
    }
    out
}

/// PalmDOC-compressed record 0 for one 4-byte text record.
pub fn mobi_rec0(encryption: u16, codepage: u32, title: &[u8], exth: &[(u32, &[u8])]) -> Vec<u8> {
    let mut r = vec![0u8; 16 + MOBI_LEN as usize];
    r[0..2].copy_from_slice(&Compression::CODE_PALMDOC.to_be_bytes());
    r[4..8].copy_from_slice(&4u32.to_be_bytes());
    r[8..10].copy_from_slice(&1u16.to_be_bytes());
    r[10..12].copy_from_slice(&4096u16.to_be_bytes());
    r[12..14].copy_from_slice(&encryption.to_be_bytes());
    r[0x10..0x14].copy_from_slice(b"MOBI");
    r[0x14..0x18].copy_from_slice(&MOBI_LEN.to_be_bytes());
    r[0x1C..0x20].copy_from_slice(&codepage.to_be_bytes());
    r[0x68..0x6C].copy_from_slice(&6u32.to_be_bytes());
    r[0xA8..0xAC].copy_from_slice(&NO_DRM_OFFSET.to_be_bytes());
    r[0xF2..0xF4].copy_from_slice(&0b11u16.to_be_bytes());
    if !exth.is_empty() {
        r[0x80..0x84].copy_from_slice(&exth::EXTH_PRESENT.to_be_bytes());
        let count = exth.len() as u32;
        let body: usize = exth.iter().map(|(_, d)| d.len() + 8).sum();
        r.extend_from_slice(b"EXTH");
        r.extend_from_slice(&((12 + body) as u32).to_be_bytes());
        r.extend_from_slice(&count.to_be_bytes());
        for (tag, d) in exth {
            r.extend_from_slice(&tag.to_be_bytes());
            r.extend_from_slice(&((d.len() + 8) as u32).to_be_bytes());
            r.extend_from_slice(d);
        }
    }
    let title_offset = r.len() as u32;
    r[0x54..0x58].copy_from_slice(&title_offset.to_be_bytes());
    r[0x58..0x5C].copy_from_slice(&(title.len() as u32).to_be_bytes());
    r.extend_from_slice(title);
    r.extend_from_slice(&[0, 0]);
    r
}

/// Append a voucher block to `rec0` and point the DRM fields at it.
pub fn attach_vouchers(rec0: &mut Vec<u8>, vouchers: &[Vec<u8>]) {
    let offset = rec0.len() as u32;
    let size = (vouchers.len() * VOUCHER_LEN) as u32;
    rec0[0xA8..0xAC].copy_from_slice(&offset.to_be_bytes());
    rec0[0xAC..0xB0].copy_from_slice(&(vouchers.len() as u32).to_be_bytes());
    rec0[0xB0..0xB4].copy_from_slice(&size.to_be_bytes());
    for v in vouchers {
        rec0.extend_from_slice(v);
    }
}

/// A voucher carrying `key`, wrapped for `pid`.
pub fn sealed(pid: &Pid, key: [u8; 16], verification: u32, flags: u32) -> Vec<u8> {
    seal_with(&wrapping_key(pid), key, verification, flags)
}

pub fn seal_with(wrapping: &[u8; 16], key: [u8; 16], verification: u32, flags: u32) -> Vec<u8> {
    let mut cookie = Vec::with_capacity(COOKIE_LEN);
    cookie.extend_from_slice(&verification.to_be_bytes());
    cookie.extend_from_slice(&flags.to_be_bytes());
    cookie.extend_from_slice(&key);
    cookie.extend_from_slice(&[0u8; 8]);
    let mut out = Vec::with_capacity(VOUCHER_LEN);
    out.extend_from_slice(&verification.to_be_bytes());
    out.extend_from_slice(&(VOUCHER_LEN as u32).to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.push(byte_sum(wrapping));
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&pc1_encrypt(wrapping, &cookie));
    out
}
