//! Record-0 headers: PalmDOC, MOBI and EXTH.
//!
//! Offsets below are relative to the start of record 0.
//!
//! PalmDOC header (16 bytes):
//!   0x00 compression u16, 0x04 text length u32, 0x08 text record count u16,
//!   0x0A text record size u16, 0x0C encryption type u16.
//!
//! MOBI header (BOOKMOBI only, starts at 0x10 with `MOBI`):
//!   0x14 header length, 0x1C codepage, 0x54/0x58 full title offset/length,
//!   0x68 format version, 0x70/0x74 HUFF record index/count, 0x80 EXTH flags,
//!   0xA8..0xB8 DRM offset/count/size/flags, 0xF2 extra record data flags.

pub mod exth;

use byteorder::{BigEndian, ByteOrder};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::Serialize;
use std::ops::Range;
use tracing::{debug, warn};

use crate::container::Container;
use crate::database::DatabaseKind;
use crate::error::{DrmError, FormatError};
pub use exth::{Exth, ExthEntry, PidSeed};

pub const PALMDOC_HEADER_LEN: usize = 16;
pub const ENCRYPTION_FIELD: Range<usize> = 0x0C..0x0E;
pub const DRM_FIELDS: Range<usize> = 0xA8..0xB8;
/// Record 0 must reach past the DRM fields for a BOOKMOBI header to be usable.
const MOBI_MIN_RECORD0: usize = 0xB8;
const MOBI_MAGIC: &[u8; 4] = b"MOBI";
/// `drm_offset` value meaning "no DRM block".
pub const NO_DRM_OFFSET: u32 = 0xFFFF_FFFF;

pub const CODEPAGE_UTF8:   u32 = 65001;
pub const CODEPAGE_CP1252: u32 = 1252;

// ── Enumerations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Compression {
    None,
    PalmDoc,
    HuffCdic,
}

impl Compression {
    pub const CODE_NONE:      u16 = 1;
    pub const CODE_PALMDOC:   u16 = 2;
    /// `DH` in ASCII.
    pub const CODE_HUFF_CDIC: u16 = 17480;

    pub fn from_code(code: u16) -> Result<Self, FormatError> {
        match code {
            Self::CODE_NONE      => Ok(Compression::None),
            Self::CODE_PALMDOC   => Ok(Compression::PalmDoc),
            Self::CODE_HUFF_CDIC => Ok(Compression::HuffCdic),
            other                => Err(FormatError::UnknownCompression(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None     => "none",
            Compression::PalmDoc  => "palmdoc",
            Compression::HuffCdic => "huff/cdic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Encryption {
    None,
    /// Any scheme other than the PID scheme, e.g. the legacy type-1 Mobipocket key.
    Unsupported(u16),
    PidScheme,
}

impl Encryption {
    pub const CODE_NONE: u16 = 0;
    pub const CODE_PID:  u16 = 2;

    pub fn code(self) -> u16 {
        match self {
            Encryption::None           => Self::CODE_NONE,
            Encryption::Unsupported(c) => c,
            Encryption::PidScheme      => Self::CODE_PID,
        }
    }
}

impl From<u16> for Encryption {
    fn from(code: u16) -> Self {
        match code {
            Self::CODE_NONE => Encryption::None,
            Self::CODE_PID  => Encryption::PidScheme,
            other           => Encryption::Unsupported(other),
        }
    }
}

// ── MOBI header ───────────────────────────────────────────────────────────────

/// Location of the voucher block inside record 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrmBlock {
    pub offset: u32,
    pub count:  u32,
    pub size:   u32,
    pub flags:  u32,
}

impl DrmBlock {
    pub fn is_present(&self) -> bool {
        self.offset != NO_DRM_OFFSET && self.count > 0 && self.size > 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset as usize..self.offset as usize + self.size as usize
    }
}

#[derive(Debug, Clone)]
pub struct MobiHeader {
    pub header_length:      u32,
    pub mobi_type:          u32,
    pub codepage:           u32,
    pub unique_id:          u32,
    pub file_version:       u32,
    pub title_offset:       u32,
    pub title_length:       u32,
    pub format_version:     u32,
    pub first_image:        u32,
    pub huff_record_offset: u32,
    pub huff_record_count:  u32,
    pub exth_flags:         u32,
    pub drm:                DrmBlock,
}

// ── FormatMetadata ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FormatMetadata {
    pub kind:              DatabaseKind,
    pub compression:       Compression,
    pub encryption:        Encryption,
    pub text_length:       u32,
    pub text_record_count: u16,
    pub text_record_size:  u16,
    pub mobi:              Option<MobiHeader>,
    pub exth:              Exth,
    /// Trailing-entry flags as declared; bit 0 marks multibyte overlap bytes.
    pub extra_data_flags:  u16,
}

impl FormatMetadata {
    pub fn extract(container: &Container) -> Result<Self, FormatError> {
        let rec0 = container.record_data(0)?;
        ensure_len(rec0, PALMDOC_HEADER_LEN, "PalmDOC header")?;

        let compression       = Compression::from_code(BigEndian::read_u16(&rec0[0x00..]))?;
        let text_length       = BigEndian::read_u32(&rec0[0x04..]);
        let text_record_count = BigEndian::read_u16(&rec0[0x08..]);
        let text_record_size  = BigEndian::read_u16(&rec0[0x0A..]);
        let encryption        = Encryption::from(BigEndian::read_u16(&rec0[ENCRYPTION_FIELD]));

        if text_record_count as usize >= container.record_count() {
            return Err(FormatError::MissingRecord(text_record_count as usize));
        }

        let mut meta = Self {
            kind: container.kind(),
            compression,
            encryption,
            text_length,
            text_record_count,
            text_record_size,
            mobi: None,
            exth: Exth::default(),
            extra_data_flags: 0,
        };
        if meta.kind == DatabaseKind::PalmDoc {
            debug!(?compression, ?encryption, "PalmDOC book without MOBI header");
            return Ok(meta);
        }

        ensure_len(rec0, MOBI_MIN_RECORD0, "MOBI header")?;
        if &rec0[0x10..0x14] != MOBI_MAGIC {
            return Err(FormatError::BadMobiHeader);
        }
        let u32_at = |off: usize| BigEndian::read_u32(&rec0[off..off + 4]);
        let mobi = MobiHeader {
            header_length:      u32_at(0x14),
            mobi_type:          u32_at(0x18),
            codepage:           u32_at(0x1C),
            unique_id:          u32_at(0x20),
            file_version:       u32_at(0x24),
            title_offset:       u32_at(0x54),
            title_length:       u32_at(0x58),
            format_version:     u32_at(0x68),
            first_image:        u32_at(0x6C),
            huff_record_offset: u32_at(0x70),
            huff_record_count:  u32_at(0x74),
            exth_flags:         u32_at(0x80),
            drm: DrmBlock {
                offset: u32_at(0xA8),
                count:  u32_at(0xAC),
                size:   u32_at(0xB0),
                flags:  u32_at(0xB4),
            },
        };

        check_range(
            rec0,
            "full title",
            mobi.title_offset as usize,
            mobi.title_length as usize,
        )?;
        if mobi.drm.is_present() {
            check_range(rec0, "DRM block", mobi.drm.offset as usize, mobi.drm.size as usize)?;
        }

        if mobi.header_length >= 0xE4 && mobi.format_version >= 5 && rec0.len() >= 0xF4 {
            meta.extra_data_flags = BigEndian::read_u16(&rec0[0xF2..0xF4]);
        }
        if mobi.exth_flags & exth::EXTH_PRESENT != 0 {
            meta.exth = Exth::parse(rec0, PALMDOC_HEADER_LEN + mobi.header_length as usize);
        }

        debug!(
            ?compression,
            ?encryption,
            text_length,
            text_record_count,
            version = mobi.format_version,
            extra_flags = meta.extra_data_flags,
            exth_entries = meta.exth.entries.len(),
            "extracted format metadata"
        );
        meta.mobi = Some(mobi);
        Ok(meta)
    }

    /// Fail fast unless this book uses the PID scheme and is not a loan.
    pub fn require_pid_scheme(&self) -> Result<(), DrmError> {
        match self.encryption {
            Encryption::PidScheme => {}
            Encryption::None => {
                return Err(DrmError::UnsupportedEncryption {
                    code:   Encryption::CODE_NONE,
                    reason: "book is not encrypted",
                })
            }
            Encryption::Unsupported(code) => {
                return Err(DrmError::UnsupportedEncryption {
                    code,
                    reason: "only the device-serial PID scheme is supported",
                })
            }
        }
        let rental = self
            .exth
            .get(exth::tag::RENTAL_EXPIRY)
            .and_then(ExthEntry::as_u64)
            .unwrap_or(0);
        if rental != 0 {
            return Err(DrmError::UnsupportedEncryption {
                code:   Encryption::CODE_PID,
                reason: "library and rental books cannot be unlocked",
            });
        }
        Ok(())
    }

    /// Trailing entries excluded from the cipher.
    ///
    /// PalmDOC books encrypt the multibyte overlap bytes along with the text,
    /// so bit 0 only stays set for HUFF/CDIC books.
    pub fn cipher_trailing_flags(&self) -> u16 {
        if self.compression == Compression::HuffCdic {
            self.extra_data_flags
        } else {
            self.extra_data_flags & 0xFFFE
        }
    }

    pub fn drm(&self) -> Option<DrmBlock> {
        self.mobi.as_ref().map(|m| m.drm)
    }

    /// Record indices of the HUFF record followed by its CDIC records.
    pub fn huffman_records(&self) -> Option<Range<usize>> {
        let mobi = self.mobi.as_ref()?;
        if self.compression != Compression::HuffCdic || mobi.huff_record_count == 0 {
            return None;
        }
        let start = mobi.huff_record_offset as usize;
        Some(start..start + mobi.huff_record_count as usize)
    }

    pub fn codepage(&self) -> u32 {
        self.mobi.as_ref().map_or(CODEPAGE_CP1252, |m| m.codepage)
    }

    /// EXTH payload decoded as text in the book's codepage.
    pub fn exth_string(&self, tag: u32) -> Option<String> {
        let entry = self.exth.get(tag)?;
        Some(decode_text(encoding_for_codepage(self.codepage()), &entry.data)).filter(|s| !s.is_empty())
    }

    /// Book title: EXTH 503, else the full-title field, else the database name.
    pub fn title(&self, container: &Container) -> String {
        let encoding = encoding_for_codepage(self.codepage());
        let mut raw: &[u8] = &[];
        if let Some(entry) = self.exth.get(exth::tag::UPDATED_TITLE) {
            raw = &entry.data;
        } else if let (Some(mobi), Ok(rec0)) = (self.mobi.as_ref(), container.record_data(0)) {
            let start = mobi.title_offset as usize;
            raw = rec0.get(start..start + mobi.title_length as usize).unwrap_or(&[]);
        }
        let title = decode_text(encoding, raw);
        if title.is_empty() {
            container.header.name()
        } else {
            title
        }
    }
}

pub fn encoding_for_codepage(codepage: u32) -> &'static Encoding {
    match codepage {
        CODEPAGE_UTF8   => UTF_8,
        CODEPAGE_CP1252 => WINDOWS_1252,
        other => {
            warn!(codepage = other, "unknown codepage, decoding as windows-1252");
            WINDOWS_1252
        }
    }
}

fn decode_text(encoding: &'static Encoding, raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let (text, _) = encoding.decode_without_bom_handling(&raw[..end]);
    text.trim().to_owned()
}

fn ensure_len(rec0: &[u8], needed: usize, what: &'static str) -> Result<(), FormatError> {
    if rec0.len() < needed {
        return Err(FormatError::HeaderTooShort { what, needed, available: rec0.len() });
    }
    Ok(())
}

fn check_range(rec0: &[u8], what: &'static str, offset: usize, len: usize) -> Result<(), FormatError> {
    let end = offset.saturating_add(len);
    if end > rec0.len() {
        return Err(FormatError::FieldOutOfBounds { what, offset, end, len: rec0.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MOBI_MAGIC as DB_MOBI, PALMDOC_MAGIC};
    use crate::testutil::{mobi_rec0, wrap};

    #[test]
    fn extracts_mobi_fields() {
        let bytes = wrap(DB_MOBI, &mobi_rec0(2, CODEPAGE_UTF8, b"A Title", &[]), 1);
        let c = Container::parse(&bytes).unwrap();
        let meta = FormatMetadata::extract(&c).unwrap();
        assert_eq!(meta.compression, Compression::PalmDoc);
        assert_eq!(meta.encryption, Encryption::PidScheme);
        assert_eq!(meta.text_record_count, 1);
        assert_eq!(meta.extra_data_flags, 0b11);
        assert_eq!(meta.cipher_trailing_flags(), 0b10);
        assert!(!meta.drm().unwrap().is_present());
        assert_eq!(meta.title(&c), "A Title");
    }

    #[test]
    fn exth_title_takes_precedence() {
        let rec0 = mobi_rec0(2, CODEPAGE_UTF8, b"Header Title", &[(exth::tag::UPDATED_TITLE, "Über".as_bytes())]);
        let bytes = wrap(DB_MOBI, &rec0, 1);
        let c = Container::parse(&bytes).unwrap();
        assert_eq!(FormatMetadata::extract(&c).unwrap().title(&c), "Über");
    }

    #[test]
    fn cp1252_title_is_decoded() {
        let bytes = wrap(DB_MOBI, &mobi_rec0(2, CODEPAGE_CP1252, b"Caf\xe9 \x93Noir\x94", &[]), 1);
        let c = Container::parse(&bytes).unwrap();
        assert_eq!(FormatMetadata::extract(&c).unwrap().title(&c), "Café \u{201c}Noir\u{201d}");
    }

    #[test]
    fn empty_title_falls_back_to_database_name() {
        let bytes = wrap(DB_MOBI, &mobi_rec0(2, CODEPAGE_UTF8, b"", &[]), 1);
        let c = Container::parse(&bytes).unwrap();
        assert_eq!(FormatMetadata::extract(&c).unwrap().title(&c), "DbName");
    }

    #[test]
    fn title_out_of_bounds_is_rejected() {
        let mut rec0 = mobi_rec0(2, CODEPAGE_UTF8, b"T", &[]);
        rec0[0x58..0x5C].copy_from_slice(&10_000u32.to_be_bytes());
        let bytes = wrap(DB_MOBI, &rec0, 1);
        let c = Container::parse(&bytes).unwrap();
        assert!(matches!(
            FormatMetadata::extract(&c).unwrap_err(),
            FormatError::FieldOutOfBounds { what: "full title", .. }
        ));
    }

    #[test]
    fn unencrypted_book_is_refused() {
        let bytes = wrap(DB_MOBI, &mobi_rec0(0, CODEPAGE_UTF8, b"T", &[]), 1);
        let c = Container::parse(&bytes).unwrap();
        let err = FormatMetadata::extract(&c).unwrap().require_pid_scheme().unwrap_err();
        assert!(matches!(err, DrmError::UnsupportedEncryption { code: 0, .. }));
    }

    #[test]
    fn legacy_scheme_is_refused() {
        let bytes = wrap(DB_MOBI, &mobi_rec0(1, CODEPAGE_UTF8, b"T", &[]), 1);
        let c = Container::parse(&bytes).unwrap();
        let meta = FormatMetadata::extract(&c).unwrap();
        assert_eq!(meta.encryption, Encryption::Unsupported(1));
        assert!(matches!(
            meta.require_pid_scheme().unwrap_err(),
            DrmError::UnsupportedEncryption { code: 1, .. }
        ));
    }

    #[test]
    fn rental_book_is_refused() {
        let expiry = 1_700_000_000u64.to_be_bytes();
        let rec0 = mobi_rec0(2, CODEPAGE_UTF8, b"T", &[(exth::tag::RENTAL_EXPIRY, &expiry[..])]);
        let bytes = wrap(DB_MOBI, &rec0, 1);
        let c = Container::parse(&bytes).unwrap();
        assert!(FormatMetadata::extract(&c).unwrap().require_pid_scheme().is_err());
    }

    #[test]
    fn missing_mobi_magic() {
        let mut rec0 = mobi_rec0(2, CODEPAGE_UTF8, b"T", &[]);
        rec0[0x10..0x14].copy_from_slice(b"XXXX");
        let bytes = wrap(DB_MOBI, &rec0, 1);
        let c = Container::parse(&bytes).unwrap();
        assert!(matches!(FormatMetadata::extract(&c).unwrap_err(), FormatError::BadMobiHeader));
    }

    #[test]
    fn text_records_must_exist() {
        let bytes = wrap(DB_MOBI, &mobi_rec0(2, CODEPAGE_UTF8, b"T", &[]), 0);
        let c = Container::parse(&bytes).unwrap();
        assert!(matches!(FormatMetadata::extract(&c).unwrap_err(), FormatError::MissingRecord(1)));
    }

    #[test]
    fn palmdoc_book_has_no_mobi_header() {
        let mut rec0 = vec![0u8; 16];
        rec0[0..2].copy_from_slice(&Compression::CODE_NONE.to_be_bytes());
        rec0[8..10].copy_from_slice(&1u16.to_be_bytes());
        rec0[12..14].copy_from_slice(&1u16.to_be_bytes());
        let bytes = wrap(PALMDOC_MAGIC, &rec0, 1);
        let c = Container::parse(&bytes).unwrap();
        let meta = FormatMetadata::extract(&c).unwrap();
        assert!(meta.mobi.is_none());
        assert_eq!(meta.compression, Compression::None);
        assert_eq!(meta.title(&c), "DbName");
    }

    #[test]
    fn unknown_compression() {
        let mut rec0 = mobi_rec0(2, CODEPAGE_UTF8, b"T", &[]);
        rec0[0..2].copy_from_slice(&99u16.to_be_bytes());
        let bytes = wrap(DB_MOBI, &rec0, 1);
        let c = Container::parse(&bytes).unwrap();
        assert!(matches!(FormatMetadata::extract(&c).unwrap_err(), FormatError::UnknownCompression(99)));
    }

    #[test]
    fn exth_strings_use_codepage() {
        let rec0 = mobi_rec0(2, CODEPAGE_CP1252, b"T", &[(exth::tag::AUTHOR, &b"Bront\xeb"[..]), (exth::tag::PUBLISHER, &b""[..])]);
        let bytes = wrap(DB_MOBI, &rec0, 1);
        let c = Container::parse(&bytes).unwrap();
        let meta = FormatMetadata::extract(&c).unwrap();
        assert_eq!(meta.exth_string(exth::tag::AUTHOR).as_deref(), Some("Brontë"));
        assert_eq!(meta.exth_string(exth::tag::PUBLISHER), None);
        assert_eq!(meta.exth_string(exth::tag::CDE_TYPE), None);
    }
}
