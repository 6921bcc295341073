//! Synthetic PID-encrypted books for the integration tests.
#![allow(dead_code)]

use unmobi::crypto::voucher::{byte_sum, wrapping_key, VOUCHER_LEN};
use unmobi::crypto::{pc1_encrypt, Pc1};
use unmobi::decrypt::KeystreamMode;
use unmobi::metadata::PidSeed;
use unmobi::pid::{self, Pid};

pub const SERIAL: &str = "1234567890123456";
pub const OTHER_SERIAL: &str = "B0019999999999ZZ";
pub const CONTENT_KEY: [u8; 16] = *b"unit-content-key";

const MOBI_HEADER_LEN: usize = 0xE8;
const WATERMARK_TAG: u32 = 208;
const TAMPER_KEYS_TAG: u32 = 209;
const CLIPPING_TAG: u32 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    PalmDoc,
    HuffCdic,
}

/// Builder for a BOOKMOBI container: record 0, text records, optional
/// HUFF/CDIC records and one trailing resource record.
#[derive(Debug, Clone)]
pub struct BookBuilder {
    pub title:         String,
    pub serial:        String,
    pub chunks:        Vec<Vec<u8>>,
    pub packing:       Packing,
    pub keystream:     KeystreamMode,
    pub trailing:      bool,
    pub book_bound:    bool,
    pub encryption:    u16,
    pub clipping:      Option<u8>,
    /// Declared text length; defaults to the real one.
    pub text_length:   Option<u32>,
}

impl Default for BookBuilder {
    fn default() -> Self {
        Self {
            title:       "A Synthetic Book".into(),
            serial:      SERIAL.into(),
            chunks:      vec![
                b"It was a bright cold day in April, ".to_vec(),
                b"and the clocks were striking thirteen.\n".to_vec(),
            ],
            packing:     Packing::PalmDoc,
            keystream:   KeystreamMode::Cumulative,
            trailing:    true,
            book_bound:  false,
            encryption:  2,
            clipping:    None,
            text_length: None,
        }
    }
}

pub struct Book {
    pub bytes: Vec<u8>,
    /// PID the book's voucher is sealed for.
    pub pid:   Pid,
    pub plain: Vec<u8>,
}

impl BookBuilder {
    pub fn build(&self) -> Book {
        let exth = self.exth_entries();
        let pid = self.owner_pid(&exth);

        // ── Text records ─────────────────────────────────────────────────────
        let mut cipher = Pc1::new(&CONTENT_KEY);
        let mut text_records = Vec::new();
        for chunk in &self.chunks {
            let mut encrypted = match self.packing {
                Packing::PalmDoc  => palmdoc_literals(chunk),
                Packing::HuffCdic => chunk.clone(),
            };
            let mut clear = Vec::new();
            if self.trailing {
                // Multibyte count byte: ciphered for PalmDOC, clear for HUFF/CDIC.
                match self.packing {
                    Packing::PalmDoc  => encrypted.push(0x00),
                    Packing::HuffCdic => clear.push(0x00),
                }
                clear.push(0x81);
            }
            if self.encryption == 2 {
                if self.keystream == KeystreamMode::PerRecord {
                    cipher = Pc1::new(&CONTENT_KEY);
                }
                cipher.encrypt_in_place(&mut encrypted);
            }
            encrypted.extend_from_slice(&clear);
            text_records.push(encrypted);
        }

        let plain: Vec<u8> = self.chunks.concat();
        let mut records = vec![self.record0(&exth, &pid, plain.len() as u32, text_records.len())];
        records.extend(text_records);
        if self.packing == Packing::HuffCdic {
            records.push(huff_record());
            records.push(cdic_record());
        }
        records.push(b"FLIS\x00\x00\x00\x08resource".to_vec());

        Book { bytes: palm_database(&self.title, &records), pid, plain }
    }

    fn exth_entries(&self) -> Vec<(u32, Vec<u8>)> {
        let mut entries = Vec::new();
        if self.book_bound {
            entries.push((WATERMARK_TAG, b"synthetic watermark".to_vec()));
            let mut rec209 = vec![0u8];
            rec209.extend_from_slice(&WATERMARK_TAG.to_be_bytes());
            entries.push((TAMPER_KEYS_TAG, rec209));
        }
        if let Some(limit) = self.clipping {
            entries.push((CLIPPING_TAG, vec![limit]));
        }
        entries
    }

    fn owner_pid(&self, exth: &[(u32, Vec<u8>)]) -> Pid {
        let seed = exth.iter().find(|(t, _)| *t == TAMPER_KEYS_TAG).map(|(_, rec209)| PidSeed {
            rec209: rec209.clone(),
            token:  exth.iter().find(|(t, _)| *t == WATERMARK_TAG).map(|(_, d)| d.clone()).unwrap_or_default(),
        });
        pid::derive(&self.serial, seed.as_ref()).unwrap()[0]
    }

    fn record0(&self, exth: &[(u32, Vec<u8>)], pid: &Pid, text_length: u32, text_records: usize) -> Vec<u8> {
        let compression: u16 = match self.packing {
            Packing::PalmDoc  => 2,
            Packing::HuffCdic => 17480,
        };
        let mut r = vec![0u8; 16 + MOBI_HEADER_LEN];
        r[0..2].copy_from_slice(&compression.to_be_bytes());
        r[4..8].copy_from_slice(&self.text_length.unwrap_or(text_length).to_be_bytes());
        r[8..10].copy_from_slice(&(text_records as u16).to_be_bytes());
        r[10..12].copy_from_slice(&4096u16.to_be_bytes());
        r[12..14].copy_from_slice(&self.encryption.to_be_bytes());
        r[0x10..0x14].copy_from_slice(b"MOBI");
        r[0x14..0x18].copy_from_slice(&(MOBI_HEADER_LEN as u32).to_be_bytes());
        r[0x18..0x1C].copy_from_slice(&2u32.to_be_bytes());
        r[0x1C..0x20].copy_from_slice(&65001u32.to_be_bytes());
        r[0x68..0x6C].copy_from_slice(&6u32.to_be_bytes());
        if self.packing == Packing::HuffCdic {
            r[0x70..0x74].copy_from_slice(&(1 + text_records as u32).to_be_bytes());
            r[0x74..0x78].copy_from_slice(&2u32.to_be_bytes());
        }
        r[0xA8..0xAC].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
        let flags: u16 = if self.trailing { 0b11 } else { 0 };
        r[0xF2..0xF4].copy_from_slice(&flags.to_be_bytes());

        if !exth.is_empty() {
            r[0x80..0x84].copy_from_slice(&0x40u32.to_be_bytes());
            let body: usize = exth.iter().map(|(_, d)| d.len() + 8).sum();
            r.extend_from_slice(b"EXTH");
            r.extend_from_slice(&((12 + body) as u32).to_be_bytes());
            r.extend_from_slice(&(exth.len() as u32).to_be_bytes());
            for (tag, data) in exth {
                r.extend_from_slice(&tag.to_be_bytes());
                r.extend_from_slice(&((data.len() + 8) as u32).to_be_bytes());
                r.extend_from_slice(data);
            }
        }

        let title_offset = r.len() as u32;
        r[0x54..0x58].copy_from_slice(&title_offset.to_be_bytes());
        r[0x58..0x5C].copy_from_slice(&(self.title.len() as u32).to_be_bytes());
        r.extend_from_slice(self.title.as_bytes());
        r.extend_from_slice(&[0, 0]);

        if self.encryption == 2 {
            let decoy = Pid::parse("ZZZZZZZZ").unwrap();
            let vouchers = [seal(&decoy, [0xEE; 16]), seal(pid, CONTENT_KEY)];
            let offset = r.len() as u32;
            r[0xA8..0xAC].copy_from_slice(&offset.to_be_bytes());
            r[0xAC..0xB0].copy_from_slice(&(vouchers.len() as u32).to_be_bytes());
            r[0xB0..0xB4].copy_from_slice(&((vouchers.len() * VOUCHER_LEN) as u32).to_be_bytes());
            for v in &vouchers {
                r.extend_from_slice(v);
            }
        }
        r
    }
}

/// A voucher carrying `key`, wrapped for `pid`.
pub fn seal(pid: &Pid, key: [u8; 16]) -> Vec<u8> {
    let wrapping = wrapping_key(pid);
    let verification = 0x0BAD_F00Du32;
    let mut cookie = Vec::with_capacity(32);
    cookie.extend_from_slice(&verification.to_be_bytes());
    cookie.extend_from_slice(&1u32.to_be_bytes());
    cookie.extend_from_slice(&key);
    cookie.extend_from_slice(&[0u8; 8]);

    let mut out = Vec::with_capacity(VOUCHER_LEN);
    out.extend_from_slice(&verification.to_be_bytes());
    out.extend_from_slice(&(VOUCHER_LEN as u32).to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.push(byte_sum(&wrapping));
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&pc1_encrypt(&wrapping, &cookie));
    out
}

/// PalmDOC stream made only of literals and literal runs.
pub fn palmdoc_literals(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        let b = text[i];
        if b == 0x00 || (0x09..=0x7F).contains(&b) {
            out.push(b);
            i += 1;
        } else {
            let n = (text.len() - i).min(8);
            out.push(n as u8);
            out.extend_from_slice(&text[i..i + n]);
            i += n;
        }
    }
    out
}

/// HUFF record in which every byte is a terminal 8-bit code selecting
/// phrase `255 - byte`.
pub fn huff_record() -> Vec<u8> {
    let mut out = b"HUFF\x00\x00\x00\x18".to_vec();
    out.extend_from_slice(&24u32.to_be_bytes());
    out.extend_from_slice(&(24u32 + 1024).to_be_bytes());
    out.extend_from_slice(&[0u8; 8]);
    for _ in 0..256 {
        out.extend_from_slice(&((255u32 << 8) | 0x80 | 8).to_be_bytes());
    }
    out.extend_from_slice(&[0u8; 256]);
    out
}

/// CDIC record in which phrase `p` is the literal byte `255 - p`.
pub fn cdic_record() -> Vec<u8> {
    let mut out = b"CDIC\x00\x00\x00\x10".to_vec();
    out.extend_from_slice(&256u32.to_be_bytes());
    out.extend_from_slice(&8u32.to_be_bytes());
    for p in 0..256u32 {
        out.extend_from_slice(&((512 + 3 * p) as u16).to_be_bytes());
    }
    for p in 0..256u32 {
        out.extend_from_slice(&0x8001u16.to_be_bytes());
        out.push((255 - p) as u8);
    }
    out
}

/// Wrap `records` in a Palm database header and record directory.
pub fn palm_database(name: &str, records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 78];
    let name = name.as_bytes();
    let n = name.len().min(31);
    out[..n].copy_from_slice(&name[..n]);
    out[0x24..0x28].copy_from_slice(&0x7000_0000u32.to_be_bytes());
    out[0x3C..0x44].copy_from_slice(b"BOOKMOBI");
    out[0x4C..0x4E].copy_from_slice(&(records.len() as u16).to_be_bytes());
    let mut offset = 78 + records.len() * 8 + 2;
    for (i, r) in records.iter().enumerate() {
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.push(0);
        out.extend_from_slice(&((2 * i as u32).to_be_bytes()[1..]));
        offset += r.len();
    }
    out.extend_from_slice(&[0, 0]);
    for r in records {
        out.extend_from_slice(r);
    }
    out
}
